//! Stream orchestrator: drives one user turn from request validation through
//! relaying model output to the caller and persisting the final answer.
//!
//! `prepare` runs the synchronous phases (validation, history, allocation,
//! opening the model stream) so failures still map to a plain JSON error.
//! `relay` moves the opened stream onto its own task, which keeps running to
//! persist the answer even if the caller disconnects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use parley_core::collab::{ChatOwnership, HistoryLookup, TurnPersistence};
use parley_core::{
    AnswerId, ChatId, HistoryEntry, HistoryWindow, NewTurn, QuestionId, RepositoryError,
    StreamRequest, TransportError, UserId,
};
use parley_stream::rendezvous::{rendezvous, RendezvousReceiver, RendezvousSender};
use parley_stream::{FragmentStream, ModelTransport};

/// Lifecycle of one streamed turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Validating,
    HistoryLoaded,
    Requesting,
    Relaying,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::HistoryLoaded => "history_loaded",
            Self::Requesting => "requesting",
            Self::Relaying => "relaying",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Errors raised before relaying starts. Each renders as a JSON error body.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Unauthorized")]
    Unauthorized(String),
    #[error("Invalid chat ID format")]
    InvalidChatId(String),
    #[error("Chat ID does not correspond to user")]
    NotOwner,
    #[error("Invalid JSON format")]
    InvalidBody(String),
    #[error("Error in database")]
    Repository {
        phase: TurnPhase,
        #[source]
        source: RepositoryError,
    },
    #[error("Error starting stream")]
    Transport(#[from] TransportError),
}

impl TurnError {
    /// The phase the turn was in when it failed.
    pub fn phase(&self) -> TurnPhase {
        match self {
            Self::Unauthorized(_) | Self::InvalidChatId(_) | Self::NotOwner | Self::InvalidBody(_) => {
                TurnPhase::Validating
            }
            Self::Repository { phase, .. } => *phase,
            Self::Transport(_) => TurnPhase::Requesting,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotOwner => StatusCode::FORBIDDEN,
            Self::InvalidChatId(_) | Self::InvalidBody(_) | Self::Repository { .. } | Self::Transport(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Unauthorized(d) | Self::InvalidChatId(d) | Self::InvalidBody(d) => Some(d.clone()),
            Self::NotOwner => None,
            Self::Repository { source, .. } => Some(source.to_string()),
            Self::Transport(e) => Some(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            details: self.details(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Body of `POST /message_stream/{chat_id}`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MessageIn {
    pub question: String,
    pub voice_url: String,
    pub file_url: String,
    pub tag: String,
    pub mode: String,
}

/// First record of every event stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaRecord {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub question_time: DateTime<Utc>,
    pub tag: String,
}

/// One relayed piece of the answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub content: String,
    pub time: DateTime<Utc>,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl ChunkRecord {
    fn delta(content: &str) -> Self {
        Self {
            content: content.to_string(),
            time: Utc::now(),
            done: false,
            file_url: None,
        }
    }

    fn done(file_url: Option<&str>) -> Self {
        Self {
            content: String::new(),
            time: Utc::now(),
            done: true,
            file_url: file_url.map(str::to_string),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub history_window: HistoryWindow,
    /// When set, the model stream is cut off this long after it opens.
    pub stream_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            history_window: HistoryWindow::default(),
            stream_timeout: None,
        }
    }
}

/// A turn that passed validation and has an open model stream.
pub struct PreparedTurn {
    pub chat_id: ChatId,
    pub meta: MetaRecord,
    fragments: FragmentStream,
    response_tag: String,
}

/// What happened during relaying, for logging and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayOutcome {
    pub answer: String,
    /// A terminal fragment arrived and the final record was produced.
    pub completed: bool,
    /// The caller went away before relaying finished.
    pub caller_gone: bool,
    pub persisted: bool,
    /// `Done` after a completed relay and a successful write, `Failed` when
    /// the relay was cut short, `Persisting` when the final write failed.
    pub phase: TurnPhase,
}

pub struct StreamOrchestrator {
    history: Arc<dyn HistoryLookup>,
    ownership: Arc<dyn ChatOwnership>,
    persistence: Arc<dyn TurnPersistence>,
    transport: Arc<dyn ModelTransport>,
    settings: OrchestratorSettings,
}

impl StreamOrchestrator {
    pub fn new(
        history: Arc<dyn HistoryLookup>,
        ownership: Arc<dyn ChatOwnership>,
        persistence: Arc<dyn TurnPersistence>,
        transport: Arc<dyn ModelTransport>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            history,
            ownership,
            persistence,
            transport,
            settings,
        }
    }

    /// Run every phase up to (not including) relaying.
    #[instrument(skip_all, fields(user_id = %user_id, chat_id = raw_chat_id))]
    pub async fn prepare(
        &self,
        user_id: &UserId,
        raw_chat_id: &str,
        body: &[u8],
    ) -> Result<PreparedTurn, TurnError> {
        let question_time = Utc::now();

        // Validating
        let chat_id: ChatId = raw_chat_id
            .parse()
            .map_err(|e: parley_core::ids::InvalidChatId| TurnError::InvalidChatId(e.to_string()))?;
        let owns = self
            .ownership
            .belongs_to(user_id, chat_id)
            .await
            .map_err(|source| TurnError::Repository {
                phase: TurnPhase::Validating,
                source,
            })?;
        if !owns {
            warn!(chat_id = %chat_id, "chat does not belong to user");
            return Err(TurnError::NotOwner);
        }
        let input: MessageIn =
            serde_json::from_slice(body).map_err(|e| TurnError::InvalidBody(e.to_string()))?;

        // HistoryLoaded
        let history = self
            .history
            .get(chat_id, user_id, self.settings.history_window, &input.tag)
            .await
            .map_err(|source| TurnError::Repository {
                phase: TurnPhase::HistoryLoaded,
                source,
            })?;
        debug!(turns = history.len(), phase = %TurnPhase::HistoryLoaded, "history loaded");

        // Requesting
        let (question_id, answer_id) = self
            .persistence
            .allocate_empty_turn(NewTurn {
                chat_id,
                question: input.question.clone(),
                question_time,
                tag: input.tag.clone(),
                voice_url: input.voice_url.clone(),
                file_url: input.file_url.clone(),
            })
            .await
            .map_err(|source| TurnError::Repository {
                phase: TurnPhase::Requesting,
                source,
            })?;

        let request = StreamRequest::build(
            chat_id,
            &history,
            HistoryEntry::user(question_id.get(), input.question.clone()),
        )
        .tag(input.tag.clone())
        .mode(input.mode.clone())
        .file_url(input.file_url.clone())
        .voice_url(&input.voice_url)
        .finish();

        let opened = match self.settings.stream_timeout {
            Some(timeout) => self.transport.open_with_timeout(&request, timeout).await,
            None => self.transport.open(&request).await,
        }
        .map_err(|e| {
            error!(error = %e, kind = e.error_kind(), %answer_id, "failed to open model stream");
            TurnError::Transport(e)
        })?;

        info!(%question_id, %answer_id, response_tag = %opened.tag, "model stream opened");

        Ok(PreparedTurn {
            chat_id,
            meta: MetaRecord {
                question_id,
                answer_id,
                question_time,
                tag: input.tag,
            },
            fragments: opened.fragments,
            response_tag: opened.tag,
        })
    }

    /// Spawn the relay task. Records arrive on the returned receiver already
    /// serialized as JSON, one per event.
    pub fn relay(&self, turn: PreparedTurn) -> (RendezvousReceiver<String>, JoinHandle<RelayOutcome>) {
        let (tx, rx) = rendezvous();
        let persistence = Arc::clone(&self.persistence);
        let handle = tokio::spawn(relay_turn(turn, tx, persistence));
        (rx, handle)
    }
}

async fn emit<T: Serialize>(tx: &mut RendezvousSender<String>, record: &T) -> bool {
    match serde_json::to_string(record) {
        Ok(json) => tx.send(json).await.is_ok(),
        Err(e) => {
            error!(error = %e, "failed to encode stream record");
            true
        }
    }
}

#[instrument(skip_all, fields(chat_id = %turn.chat_id, answer_id = %turn.meta.answer_id))]
async fn relay_turn(
    turn: PreparedTurn,
    mut tx: RendezvousSender<String>,
    persistence: Arc<dyn TurnPersistence>,
) -> RelayOutcome {
    let PreparedTurn {
        meta,
        mut fragments,
        response_tag,
        ..
    } = turn;

    debug!(phase = %TurnPhase::Relaying, "relaying model stream");
    let mut answer = String::new();
    let mut completed = false;
    let mut caller_gone = !emit(&mut tx, &meta).await;

    while !caller_gone {
        let Some(fragment) = fragments.next().await else {
            break;
        };
        answer.push_str(fragment.content());

        if fragment.is_terminal() {
            if !fragment.content().is_empty() && !emit(&mut tx, &ChunkRecord::delta(fragment.content())).await {
                caller_gone = true;
                break;
            }
            caller_gone = !emit(&mut tx, &ChunkRecord::done(fragment.attachment())).await;
            completed = true;
            break;
        }

        caller_gone = !emit(&mut tx, &ChunkRecord::delta(fragment.content())).await;
    }

    // Closing both ends here ends the response body and cancels upstream.
    drop(tx);
    drop(fragments);

    if caller_gone {
        info!(len = answer.len(), "caller disconnected, persisting partial answer");
    } else if !completed {
        warn!(len = answer.len(), "model stream ended without a terminal fragment");
    }

    debug!(phase = %TurnPhase::Persisting, "persisting answer");
    let result = if response_tag.is_empty() || response_tag == meta.tag {
        persistence.update_answer(meta.answer_id, &answer).await
    } else {
        info!(requested = %meta.tag, routed = %response_tag, "backend re-tagged question");
        persistence
            .update_answer_and_tag(meta.answer_id, meta.question_id, &answer, &response_tag)
            .await
    };
    let persisted = match result {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "failed to persist answer");
            false
        }
    };

    let phase = if !persisted {
        TurnPhase::Persisting
    } else if completed && !caller_gone {
        TurnPhase::Done
    } else {
        TurnPhase::Failed
    };
    debug!(phase = %phase, "relay finished");

    RelayOutcome {
        answer,
        completed,
        caller_gone,
        persisted,
        phase,
    }
}
