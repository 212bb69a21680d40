use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_core::collab::{ChatOwnership, HistoryLookup, TurnPersistence};
use parley_core::HistoryWindow;
use parley_store::{Database, SqliteCollaborators};
use parley_stream::{HealthCheck, ModelTransport};

use crate::annotations;
use crate::auth::{IdentityResolver, PassThroughIdentity};
use crate::handlers;
use crate::health::{HealthMonitor, DEFAULT_PING_INTERVAL};
use crate::hub::ConnectionHub;
use crate::orchestrator::{OrchestratorSettings, StreamOrchestrator};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Outbound queue length per annotation socket.
    pub max_send_queue: usize,
    pub history_window: HistoryWindow,
    pub stream_timeout: Option<Duration>,
    /// Shared secret for `/graph_log_writer`. Empty disables the endpoint.
    pub service_secret: SecretString,
    /// Exact origin allowed by CORS; `None` allows any origin.
    pub front_origin: Option<String>,
    pub transcriber_ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
            history_window: HistoryWindow::default(),
            stream_timeout: None,
            service_secret: SecretString::from(String::new()),
            front_origin: None,
            transcriber_ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

/// Everything the server talks to outside its own process.
pub struct Services {
    pub history: Arc<dyn HistoryLookup>,
    pub ownership: Arc<dyn ChatOwnership>,
    pub persistence: Arc<dyn TurnPersistence>,
    pub transport: Arc<dyn ModelTransport>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Pinged periodically for `/health`; `None` reports it unavailable.
    pub transcriber: Option<Arc<dyn HealthCheck>>,
}

impl Services {
    /// SQLite collaborators with pass-through identity.
    pub fn sqlite(db: Database, transport: Arc<dyn ModelTransport>) -> Self {
        let collaborators = Arc::new(SqliteCollaborators::new(db));
        Self {
            history: collaborators.clone(),
            ownership: collaborators.clone(),
            persistence: collaborators,
            transport,
            identity: Arc::new(PassThroughIdentity),
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn HealthCheck>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<StreamOrchestrator>,
    pub hub: Arc<ConnectionHub>,
    pub identity: Arc<dyn IdentityResolver>,
    pub transcriber: HealthMonitor,
    pub service_secret: Arc<SecretString>,
}

impl AppState {
    pub fn new(config: &ServerConfig, services: Services, transcriber: HealthMonitor) -> Self {
        let settings = OrchestratorSettings {
            history_window: config.history_window,
            stream_timeout: config.stream_timeout,
        };
        let orchestrator = StreamOrchestrator::new(
            services.history,
            services.ownership,
            services.persistence,
            services.transport,
            settings,
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            hub: Arc::new(ConnectionHub::new(config.max_send_queue)),
            identity: services.identity,
            transcriber,
            service_secret: Arc::new(config.service_secret.clone()),
        }
    }
}

/// CORS for the configured front-end origin, or permissive when unset.
pub fn cors_layer(front_origin: Option<&str>) -> CorsLayer {
    let Some(origin) = front_origin.filter(|o| !o.is_empty() && *o != "*") else {
        return CorsLayer::permissive();
    };
    match HeaderValue::from_str(origin) {
        Ok(value) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(value))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
        Err(e) => {
            warn!(origin, error = %e, "invalid front origin, allowing any origin");
            CorsLayer::permissive()
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, front_origin: Option<&str>) -> Router {
    Router::new()
        .route("/message_stream/{chat_id}", post(handlers::message_stream))
        .route("/graph_log/{chat_id}", get(annotations::viewer_ws))
        .route("/graph_log_writer/{chat_id}", get(annotations::writer_ws))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(cors_layer(front_origin))
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps it running.
pub async fn start(config: ServerConfig, services: Services) -> Result<ServerHandle, std::io::Error> {
    let (transcriber, pinger) = match services.transcriber.clone() {
        Some(t) => {
            let (monitor, handle) = HealthMonitor::spawn(t, config.transcriber_ping_interval);
            (monitor, Some(handle))
        }
        None => (HealthMonitor::disabled(), None),
    };

    let state = AppState::new(&config, services, transcriber);
    let hub = Arc::clone(&state.hub);
    let router = build_router(state, config.front_origin.as_deref());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(
        port = local_addr.port(),
        history_window = ?config.history_window,
        stream_timeout = ?config.stream_timeout,
        "parley server started"
    );

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        hub,
        server,
        pinger,
    })
}

/// Handle returned by `start()`. Dropping it stops the server and the health pinger.
pub struct ServerHandle {
    pub port: u16,
    hub: Arc<ConnectionHub>,
    server: JoinHandle<()>,
    pinger: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.server.abort();
        if let Some(pinger) = &self.pinger {
            pinger.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_stream::MockTransport;

    fn services() -> Services {
        let db = Database::in_memory().unwrap();
        Services::sqlite(db, Arc::new(MockTransport::new(vec![])))
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };

        let handle = start(config, services()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["transcriber_available"], false);
        assert_eq!(body["rooms"], 0);
    }

    #[tokio::test]
    async fn health_reports_reachable_transcriber() {
        let config = ServerConfig {
            port: 0,
            transcriber_ping_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let services = services().with_transcriber(Arc::new(MockTransport::new(vec![])));
        let handle = start(config, services).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["transcriber_available"], true);
    }

    #[test]
    fn build_router_creates_routes() {
        let config = ServerConfig::default();
        let state = AppState::new(&config, services(), HealthMonitor::disabled());
        let _router = build_router(state, Some("http://localhost:5173"));
    }

    #[test]
    fn invalid_origin_falls_back_to_permissive() {
        let _layer = cors_layer(Some("bad\norigin"));
        let _layer = cors_layer(None);
    }
}
