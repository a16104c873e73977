//! Error types for fieldsync-core

use thiserror::Error;

use crate::models::EntryStatus;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Journal entry not found
    #[error("Journal entry not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Logical clock exhausted its value space; scale error, never wrapped
    #[error("Lamport clock overflow")]
    ClockOverflow,

    /// Attempted an illegal status transition (terminal states are immutable)
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the entry was in
        from: EntryStatus,
        /// Status the caller tried to move it to
        to: EntryStatus,
    },
}
