//! Database layer for the change journal

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use migrations::run as run_migrations;
pub use repository::{JournalRepository, SqliteJournalRepository};
