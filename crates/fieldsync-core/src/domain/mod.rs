//! Domain-entity collaborator seam
//!
//! The sync engine never constructs domain SQL or touches entity schemas;
//! it hands ordered mutations to an [`EntityApplier`] and records the
//! outcome on the journal entry. [`SqliteEntityStore`] is the shipped
//! adapter: a generic versioned document store.

mod entity_store;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::Operation;

pub use entity_store::{EntityRecord, SqliteEntityStore};

/// A single ordered mutation handed to the domain layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub operation: Operation,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    /// Idempotency key of the journal entry; the domain layer uses it for
    /// its applied-set check
    pub dedup_key: String,
}

/// Outcome of a successful (or already-performed) application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Entity version after the mutation
    pub version: i64,
    /// `true` when the mutation had already been applied and the domain
    /// state was left untouched
    pub already_applied: bool,
}

/// Failure modes of a domain application
///
/// The distinction drives retry policy: `Storage` failures are retried
/// with backoff, `Invalid` payloads can never succeed and fail permanently
/// on first sight.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The payload violates a domain invariant; retrying cannot fix it
    #[error("invalid mutation: {0}")]
    Invalid(String),

    /// The domain storage layer failed; worth retrying
    #[error("domain storage error: {0}")]
    Storage(String),
}

impl ApplyError {
    /// Whether retrying this failure could ever succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<rusqlite::Error> for ApplyError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// The business-mutation capability consumed by the applier
///
/// Implementations must be idempotent with respect to `dedup_key`:
/// re-applying an already-applied mutation reports `already_applied`
/// without mutating twice. Called from a blocking worker thread.
pub trait EntityApplier: Send + Sync {
    /// Perform the mutation and report its outcome
    fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ApplyError>;
}
