pub mod chats;
pub mod collab;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod turns;

pub use chats::ChatRepo;
pub use collab::SqliteCollaborators;
pub use database::Database;
pub use error::StoreError;
pub use turns::TurnRepo;
