pub mod annotations;
pub mod auth;
pub mod handlers;
pub mod health;
pub mod hub;
pub mod orchestrator;
pub mod server;

pub use auth::{IdentityResolver, PassThroughIdentity};
pub use hub::ConnectionHub;
pub use orchestrator::{OrchestratorSettings, StreamOrchestrator, TurnError, TurnPhase};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle, Services};
