//! Persistence layer — libSQL-backed storage for applications, groups,
//! the chat log, and user profiles.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ApplicationSink, ChatLogEntry, Database, Group, UserProfile};
