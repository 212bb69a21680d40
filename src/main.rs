use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use secrecy::SecretString;
use tracing::Level;

use parley_core::HistoryWindow;
use parley_server::{ServerConfig, Services};
use parley_store::Database;
use parley_stream::{HealthCheck, PingClient, TransportClient, TransportConfig};
use parley_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Streaming chat relay and annotation hub.
#[derive(Debug, Parser)]
#[command(name = "parley", version)]
struct Args {
    #[arg(long, env = "PARLEY_PORT", default_value_t = 8080)]
    port: u16,

    /// Base URL of the model backend.
    #[arg(long, env = "MODEL_URL", default_value = "http://ml-api:8000")]
    model_url: String,

    #[arg(long, env = "MODEL_PATH", default_value = "/message_stream")]
    model_path: String,

    /// Prior turns sent with each question; negative sends the whole chat.
    #[arg(long, env = "HISTORY_LEN", default_value_t = 5, allow_hyphen_values = true)]
    history_len: i64,

    /// Cut the model stream off after this many seconds.
    #[arg(long, env = "STREAM_TIMEOUT_SECS")]
    stream_timeout_secs: Option<u64>,

    /// Transcription backend pinged for `/health`.
    #[arg(long, env = "TRANSCRIBER_URL")]
    transcriber_url: Option<String>,

    #[arg(long, env = "DATABASE_PATH", default_value = "data/parley.db")]
    database_path: PathBuf,

    /// Secret expected by `/graph_log_writer`.
    #[arg(long, env = "SERVICE_SECRET", default_value = "", hide_env_values = true)]
    service_secret: String,

    #[arg(long, env = "FRONT_ORIGIN", default_value = "http://localhost:5173")]
    front_origin: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Per-module overrides, e.g. `parley_stream=debug,parley_store=warn`.
    #[arg(long, env = "LOG_MODULES", default_value = "")]
    log_modules: String,

    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Start even when the model backend does not answer `/ping`.
    #[arg(long)]
    skip_startup_ping: bool,
}

fn module_levels(raw: &str) -> anyhow::Result<Vec<(String, Level)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (module, level) = pair
                .split_once('=')
                .with_context(|| format!("expected module=level, got {pair:?}"))?;
            let level = level
                .parse::<Level>()
                .with_context(|| format!("bad level for {module}"))?;
            Ok((module.to_string(), level))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        module_levels: module_levels(&args.log_modules)?,
        format: args.log_format,
    });

    tracing::info!("starting parley");

    let db = Database::open(&args.database_path)
        .with_context(|| format!("opening database at {}", args.database_path.display()))?;

    let transport = TransportClient::new(TransportConfig {
        base_url: args.model_url.clone(),
        path: args.model_path.clone(),
        ..TransportConfig::default()
    })
    .context("configuring model transport")?;

    if args.skip_startup_ping {
        tracing::warn!(url = %args.model_url, "skipping model backend ping");
    } else if let Err(e) = transport.ping().await {
        bail!("model backend at {} is unreachable: {e}", args.model_url);
    }

    let mut services = Services::sqlite(db, Arc::new(transport));
    if let Some(url) = args.transcriber_url.as_deref().filter(|u| !u.is_empty()) {
        let transcriber = PingClient::new(url).context("configuring transcriber health check")?;
        services = services.with_transcriber(Arc::new(transcriber));
    }

    let config = ServerConfig {
        port: args.port,
        history_window: HistoryWindow::from_config(args.history_len),
        stream_timeout: args.stream_timeout_secs.map(Duration::from_secs),
        service_secret: SecretString::from(args.service_secret),
        front_origin: Some(args.front_origin).filter(|o| !o.is_empty()),
        ..ServerConfig::default()
    };

    let handle = parley_server::start(config, services)
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}
