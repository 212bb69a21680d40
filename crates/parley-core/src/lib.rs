pub mod collab;
pub mod errors;
pub mod fragment;
pub mod ids;
pub mod request;
pub mod turn;

pub use errors::{RepositoryError, TransportError};
pub use fragment::Fragment;
pub use ids::{AnswerId, ChatId, ConnectionId, QuestionId, UserId};
pub use request::{HistoryEntry, Role, StreamRequest};
pub use turn::{HistoryWindow, NewTurn, Turn};
