//! Annotation sockets: viewers of a chat and backend writers exchange
//! `{tag, answer_id, message}` frames through the [`ConnectionHub`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use parley_core::{ChatId, UserId};

use crate::auth::secret_matches;
use crate::hub::ConnectionHub;
use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// One annotation exchanged between participants of a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFrame {
    pub tag: String,
    pub answer_id: i64,
    pub message: String,
}

/// Validate an inbound frame and return the JSON to broadcast.
pub fn normalize_frame(raw: &str) -> Result<String, serde_json::Error> {
    let frame: AnnotationFrame = serde_json::from_str(raw)?;
    serde_json::to_string(&frame)
}

fn greeting(user_id: &UserId) -> String {
    serde_json::json!({
        "type": "connection_established",
        "uuid": user_id.as_str(),
    })
    .to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewerQuery {
    #[serde(default)]
    jwt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WriterQuery {
    #[serde(default)]
    secret: String,
}

fn reject(status: StatusCode, error: &str) -> Response {
    (status, Json(serde_json::json!({ "error": error }))).into_response()
}

/// `GET /graph_log/{chat_id}?jwt=...`
pub async fn viewer_ws(
    ws: WebSocketUpgrade,
    Path(raw_chat_id): Path<String>,
    Query(query): Query<ViewerQuery>,
    State(state): State<AppState>,
) -> Response {
    let chat_id: ChatId = match raw_chat_id.parse() {
        Ok(id) => id,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "Invalid chat ID format"),
    };
    let user_id = match state.identity.resolve(&query.jwt).await {
        Ok(user) => user,
        Err(e) => {
            warn!(chat_id = %chat_id, error = %e, "rejected annotation viewer");
            return reject(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    };

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| run_session(socket, hub, chat_id, user_id))
}

/// `GET /graph_log_writer/{chat_id}?secret=...`
pub async fn writer_ws(
    ws: WebSocketUpgrade,
    Path(raw_chat_id): Path<String>,
    Query(query): Query<WriterQuery>,
    State(state): State<AppState>,
) -> Response {
    let chat_id: ChatId = match raw_chat_id.parse() {
        Ok(id) => id,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "Invalid chat ID format"),
    };
    if !secret_matches(state.service_secret.expose_secret(), &query.secret) {
        warn!(chat_id = %chat_id, "rejected annotation writer");
        return reject(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| run_session(socket, hub, chat_id, UserId::service()))
}

/// Register the socket, greet, then relay frames until either side closes.
async fn run_session(mut socket: WebSocket, hub: Arc<ConnectionHub>, chat_id: ChatId, user_id: UserId) {
    let (conn, mut rx) = hub.join(chat_id, user_id.clone());
    // Keep only the id: the hub's copy is the sole sender, so replacing or
    // releasing the entry ends the writer below.
    let conn_id = conn.id.clone();
    drop(conn);

    info!(chat_id = %chat_id, user_id = %user_id, connection_id = %conn_id, "annotation socket opened");

    if let Err(e) = socket.send(WsMessage::Text(greeting(&user_id).into())).await {
        warn!(chat_id = %chat_id, error = %e, "failed to send greeting");
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    trace!("sent ping");
                }
            }
        }
    });

    let reader_hub = Arc::clone(&hub);
    let reader_user = user_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => match normalize_frame(text.as_str()) {
                    Ok(json) => {
                        let report = reader_hub.broadcast(chat_id, &reader_user, &json);
                        debug!(
                            chat_id = %chat_id,
                            delivered = report.delivered,
                            failed = report.failed,
                            "annotation broadcast"
                        );
                    }
                    Err(e) => warn!(chat_id = %chat_id, error = %e, "skipping invalid annotation frame"),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {},
        _ = &mut reader => {},
    }
    writer.abort();
    reader.abort();

    let released = hub.release(chat_id, &user_id, &conn_id);
    info!(chat_id = %chat_id, user_id = %user_id, released, "annotation socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_valid_frame() {
        let json = normalize_frame(r#"{"tag":"plan","answer_id":7,"message":"step 1","extra":true}"#).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, serde_json::json!({"tag":"plan","answer_id":7,"message":"step 1"}));
    }

    #[test]
    fn normalize_rejects_bad_frames() {
        assert!(normalize_frame("not json").is_err());
        assert!(normalize_frame(r#"{"tag":"t","answer_id":"seven","message":"m"}"#).is_err());
        assert!(normalize_frame(r#"{"tag":"t","message":"m"}"#).is_err());
    }

    #[test]
    fn greeting_shape() {
        let value: serde_json::Value = serde_json::from_str(&greeting(&UserId::service())).unwrap();
        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["uuid"], "00000000-0000-0000-0000-000000000000");
    }
}
