//! SQLite-backed implementations of the domain repositories.

pub mod database;

pub use database::{
    connect, ensure_schema, SqliteAgentRegistry, SqliteEventLog, SqliteTaskQueue,
};
