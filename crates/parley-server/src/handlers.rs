use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::bearer_token;
use crate::orchestrator::TurnError;
use crate::server::AppState;

/// `POST /message_stream/{chat_id}`: run one turn and stream it back as SSE.
pub async fn message_stream(
    State(state): State<AppState>,
    Path(raw_chat_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, TurnError> {
    let token = bearer_token(&headers).ok_or_else(|| TurnError::Unauthorized("missing bearer token".into()))?;
    let user_id = state.identity.resolve(token).await.map_err(|e| {
        warn!(error = %e, "rejected message stream request");
        TurnError::Unauthorized(e.to_string())
    })?;

    let prepared = state.orchestrator.prepare(&user_id, &raw_chat_id, &body).await?;
    debug!(chat_id = %prepared.chat_id, answer_id = %prepared.meta.answer_id, "relaying turn");

    // The relay task owns persistence; the response only reads from it.
    let (records, _relay) = state.orchestrator.relay(prepared);
    let events = records
        .into_stream()
        .map(|json| Ok::<_, Infallible>(Event::default().data(json)));

    Ok(Sse::new(events).into_response())
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub transcriber_available: bool,
    pub rooms: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        transcriber_available: state.transcriber.is_available(),
        rooms: state.hub.room_count(),
    })
}
