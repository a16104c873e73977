//! Journal entry model and status transitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a journal entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Mutation kind carried by a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Canonical wire/storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// Processing status of a journal entry
///
/// `Done` and `Conflict` are terminal. `Error` is terminal once its retry
/// budget is exhausted (no `next_retry_at` remains on the entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Done,
    Error,
    Conflict,
}

impl EntryStatus {
    /// Canonical wire/storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Conflict => "conflict",
        }
    }

    /// Whether the status itself forbids any further transition
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Conflict)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown status: {other}"))),
        }
    }
}

/// Derive the idempotency key for a mutation
///
/// Re-submission of an entry with an identical key is a no-op at the ingest
/// boundary.
#[must_use]
pub fn dedup_key(
    operation: Operation,
    entity_type: &str,
    entity_id: &str,
    client_id: &str,
    lamport_clock: u64,
) -> String {
    format!("{operation}:{entity_type}:{entity_id}:{client_id}:{lamport_clock}")
}

/// A mutation as submitted by a client, before the authority assigns
/// server-side fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub operation: Operation,
    pub entity_type: String,
    pub entity_id: String,
    /// Opaque mutation data, applied by the domain collaborator
    pub payload: Value,
    /// Producer's logical clock value for this mutation
    pub lamport_clock: u64,
    /// Producer wall-clock time (unix ms); informational, never ordering
    pub client_timestamp: i64,
}

/// A durable journal record: the unit of synchronization and the audit trail
///
/// Entries are never physically deleted. Status moves through
/// `Pending -> Processing -> {Done, Error, Conflict}`; the transition
/// methods below are the only legal mutations and reject everything else.
/// Retry policy (backoff, ceiling) is decided by the caller and passed in —
/// the record carries no policy and no storage concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub operation: Operation,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    pub client_id: String,
    pub lamport_clock: u64,
    /// Producer wall-clock time (unix ms)
    pub client_timestamp: i64,
    /// Set when the authority first stored the entry; refreshed on apply
    pub server_timestamp: i64,
    pub status: EntryStatus,
    /// Count of failed application attempts
    pub attempts: u32,
    /// When the entry becomes retry-eligible; `None` on a non-error entry
    /// or once the retry budget is exhausted
    pub next_retry_at: Option<i64>,
    /// Set while the entry is in `Processing`; used for crash recovery
    pub processing_since: Option<i64>,
    /// Last failure detail, or the conflict explanation
    pub error_message: Option<String>,
    /// Outcome of the last successful application
    pub result: Option<Value>,
}

impl JournalEntry {
    /// Admit a client submission into the journal as a pending entry
    #[must_use]
    pub fn admit(new: NewEntry, client_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: EntryId::new(),
            operation: new.operation,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            payload: new.payload,
            client_id: client_id.into(),
            lamport_clock: new.lamport_clock,
            client_timestamp: new.client_timestamp,
            server_timestamp: now_ms,
            status: EntryStatus::Pending,
            attempts: 0,
            next_retry_at: None,
            processing_since: None,
            error_message: None,
            result: None,
        }
    }

    /// The idempotency key of this entry
    #[must_use]
    pub fn dedup_key(&self) -> String {
        dedup_key(
            self.operation,
            &self.entity_type,
            &self.entity_id,
            &self.client_id,
            self.lamport_clock,
        )
    }

    /// Entity the entry targets, as the resolver's grouping key
    #[must_use]
    pub fn entity_key(&self) -> (String, String) {
        (self.entity_type.clone(), self.entity_id.clone())
    }

    /// `Error` with no retry time left: a permanent failure needing
    /// operator or client intervention
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.status, EntryStatus::Error) && self.next_retry_at.is_none()
    }

    /// Whether any further processing of this entry is forbidden
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.status.is_terminal() || self.is_exhausted()
    }

    /// `Pending -> Processing`, recording when the attempt started
    pub fn begin_processing(&mut self, now_ms: i64) -> Result<()> {
        self.guard(EntryStatus::Pending, EntryStatus::Processing)?;
        self.status = EntryStatus::Processing;
        self.processing_since = Some(now_ms);
        Ok(())
    }

    /// `Processing -> Done` with the application outcome
    pub fn complete(&mut self, result: Value, now_ms: i64) -> Result<()> {
        self.guard(EntryStatus::Processing, EntryStatus::Done)?;
        self.status = EntryStatus::Done;
        self.result = Some(result);
        self.server_timestamp = now_ms;
        self.processing_since = None;
        self.next_retry_at = None;
        self.error_message = None;
        Ok(())
    }

    /// `Processing -> Error`, counting the attempt
    ///
    /// `next_retry_at` is the caller-computed backoff deadline, or `None`
    /// when the retry budget is exhausted (or the failure is permanent).
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        next_retry_at: Option<i64>,
    ) -> Result<()> {
        self.guard(EntryStatus::Processing, EntryStatus::Error)?;
        self.status = EntryStatus::Error;
        self.attempts += 1;
        self.error_message = Some(message.into());
        self.next_retry_at = next_retry_at;
        self.processing_since = None;
        Ok(())
    }

    /// `Pending -> Conflict` with an explanation naming the winning entry
    pub fn mark_conflict(&mut self, message: impl Into<String>) -> Result<()> {
        self.guard(EntryStatus::Pending, EntryStatus::Conflict)?;
        self.status = EntryStatus::Conflict;
        self.error_message = Some(message.into());
        self.next_retry_at = None;
        Ok(())
    }

    /// Return the entry to `Pending` for another pass
    ///
    /// Legal from `Error` while retry budget remains, and from a stale
    /// `Processing` (crash recovery). Exhausted errors stay put.
    pub fn requeue(&mut self) -> Result<()> {
        match self.status {
            EntryStatus::Error if self.next_retry_at.is_some() => {}
            EntryStatus::Processing => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    to: EntryStatus::Pending,
                })
            }
        }
        self.status = EntryStatus::Pending;
        self.next_retry_at = None;
        self.processing_since = None;
        Ok(())
    }

    fn guard(&self, expected: EntryStatus, to: EntryStatus) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

/// Journal totals per status, for operational dashboards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub error: u64,
    pub conflict: u64,
}

impl StatusCounts {
    /// Fraction of entries that reached `Done`; zero on an empty journal
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pending_entry() -> JournalEntry {
        JournalEntry::admit(
            NewEntry {
                operation: Operation::Update,
                entity_type: "asset".to_string(),
                entity_id: "7".to_string(),
                payload: json!({"condition": "worn"}),
                lamport_clock: 5,
                client_timestamp: 1_000,
            },
            "tablet-a",
            2_000,
        )
    }

    #[test]
    fn test_entry_id_unique() {
        assert_ne!(EntryId::new(), EntryId::new());
    }

    #[test]
    fn test_entry_id_parse() {
        let id = EntryId::new();
        let parsed: EntryId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn dedup_key_format() {
        let entry = pending_entry();
        assert_eq!(entry.dedup_key(), "update:asset:7:tablet-a:5");
        assert_eq!(
            dedup_key(Operation::Create, "unit", "u-1", "phone-b", 12),
            "create:unit:u-1:phone-b:12"
        );
    }

    #[test]
    fn admit_populates_server_fields() {
        let entry = pending_entry();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.server_timestamp, 2_000);
        assert_eq!(entry.attempts, 0);
        assert!(entry.next_retry_at.is_none());
        assert!(entry.result.is_none());
    }

    #[test]
    fn happy_path_transitions() {
        let mut entry = pending_entry();
        entry.begin_processing(2_100).unwrap();
        assert_eq!(entry.status, EntryStatus::Processing);
        assert_eq!(entry.processing_since, Some(2_100));

        entry.complete(json!({"version": 1}), 2_200).unwrap();
        assert_eq!(entry.status, EntryStatus::Done);
        assert_eq!(entry.server_timestamp, 2_200);
        assert!(entry.processing_since.is_none());
        assert!(entry.is_settled());
    }

    #[test]
    fn fail_counts_attempts_and_schedules_retry() {
        let mut entry = pending_entry();
        entry.begin_processing(2_100).unwrap();
        entry.fail("storage unavailable", Some(4_100)).unwrap();

        assert_eq!(entry.status, EntryStatus::Error);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.next_retry_at, Some(4_100));
        assert!(!entry.is_exhausted());
    }

    #[test]
    fn fail_without_retry_time_is_exhausted() {
        let mut entry = pending_entry();
        entry.begin_processing(2_100).unwrap();
        entry.fail("payload rejected", None).unwrap();

        assert!(entry.is_exhausted());
        assert!(entry.is_settled());
        assert!(entry.requeue().is_err());
    }

    #[test]
    fn requeue_from_retryable_error() {
        let mut entry = pending_entry();
        entry.begin_processing(2_100).unwrap();
        entry.fail("transient", Some(4_100)).unwrap();
        entry.requeue().unwrap();

        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(entry.next_retry_at.is_none());
        // Attempt count survives the requeue
        assert_eq!(entry.attempts, 1);
        // Last failure detail is retained for operators
        assert_eq!(entry.error_message.as_deref(), Some("transient"));
    }

    #[test]
    fn requeue_from_stale_processing() {
        let mut entry = pending_entry();
        entry.begin_processing(2_100).unwrap();
        entry.requeue().unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(entry.processing_since.is_none());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut done = pending_entry();
        done.begin_processing(0).unwrap();
        done.complete(json!({}), 0).unwrap();
        assert!(done.begin_processing(0).is_err());
        assert!(done.requeue().is_err());
        assert!(done.fail("x", None).is_err());

        let mut conflict = pending_entry();
        conflict.mark_conflict("conflicts with update:asset:7:phone-b:5").unwrap();
        assert!(conflict.begin_processing(0).is_err());
        assert!(conflict.requeue().is_err());
    }

    #[test]
    fn conflict_only_from_pending() {
        let mut entry = pending_entry();
        entry.begin_processing(0).unwrap();
        assert!(entry.mark_conflict("too late").is_err());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            EntryStatus::Pending,
            EntryStatus::Processing,
            EntryStatus::Done,
            EntryStatus::Error,
            EntryStatus::Conflict,
        ] {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
        assert!("finished".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn success_ratio() {
        let counts = StatusCounts {
            total: 4,
            done: 3,
            ..StatusCounts::default()
        };
        assert!((counts.success_ratio() - 0.75).abs() < f64::EPSILON);
        assert!((StatusCounts::default().success_ratio()).abs() < f64::EPSILON);
    }
}
