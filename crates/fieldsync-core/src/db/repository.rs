//! Journal entry repository implementation

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores clocks/counts as i64

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{EntryId, JournalEntry, StatusCounts};

/// Trait for journal storage operations
///
/// Entries are never physically deleted; the journal is the durable causal
/// log and audit trail.
pub trait JournalRepository {
    /// Atomically insert an entry unless its dedup key is already present.
    ///
    /// Returns `true` when the entry was stored, `false` on a duplicate —
    /// duplicates are a no-op, never an error.
    fn insert_if_absent(&self, entry: &JournalEntry) -> Result<bool>;

    /// Get an entry by ID
    fn get(&self, id: &EntryId) -> Result<Option<JournalEntry>>;

    /// Get an entry by its dedup key
    fn get_by_dedup_key(&self, dedup_key: &str) -> Result<Option<JournalEntry>>;

    /// Persist the mutable fields of an entry
    fn save(&self, entry: &JournalEntry) -> Result<()>;

    /// Distinct `(entity_type, entity_id)` pairs with pending entries
    fn pending_entity_keys(&self) -> Result<Vec<(String, String)>>;

    /// Pending entries for one entity, oldest server timestamp first
    fn pending_for_entity(&self, entity_type: &str, entity_id: &str)
        -> Result<Vec<JournalEntry>>;

    /// Error entries whose retry deadline has elapsed
    fn due_retries(&self, now_ms: i64) -> Result<Vec<JournalEntry>>;

    /// Processing entries whose attempt started at or before the cutoff
    fn stale_processing(&self, cutoff_ms: i64) -> Result<Vec<JournalEntry>>;

    /// Highest Lamport clock value ever recorded; clock restoration floor
    fn max_lamport_clock(&self) -> Result<u64>;

    /// Journal totals per status
    fn status_counts(&self) -> Result<StatusCounts>;
}

const ENTRY_COLUMNS: &str = "id, operation, entity_type, entity_id, payload, client_id, \
     lamport_clock, client_timestamp, server_timestamp, status, attempts, \
     next_retry_at, processing_since, error_message, result";

/// `SQLite` implementation of `JournalRepository`
pub struct SqliteJournalRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteJournalRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<JournalEntry> {
        let id: String = row.get(0)?;
        let operation: String = row.get(1)?;
        let status: String = row.get(9)?;
        Ok(JournalEntry {
            id: id
                .parse()
                .map_err(|e| conversion_error(0, e))?,
            operation: operation
                .parse()
                .map_err(|e| conversion_error(1, e))?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            payload: row.get(4)?,
            client_id: row.get(5)?,
            lamport_clock: row.get::<_, i64>(6)? as u64,
            client_timestamp: row.get(7)?,
            server_timestamp: row.get(8)?,
            status: status
                .parse()
                .map_err(|e| conversion_error(9, e))?,
            attempts: row.get::<_, i64>(10)? as u32,
            next_retry_at: row.get(11)?,
            processing_since: row.get(12)?,
            error_message: row.get(13)?,
            result: row.get(14)?,
        })
    }

    fn select_many(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn conversion_error(
    column: usize,
    source: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(source),
    )
}

impl JournalRepository for SqliteJournalRepository<'_> {
    fn insert_if_absent(&self, entry: &JournalEntry) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO journal_entries
                 (id, dedup_key, operation, entity_type, entity_id, payload,
                  client_id, lamport_clock, client_timestamp, server_timestamp,
                  status, attempts, next_retry_at, processing_since,
                  error_message, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(dedup_key) DO NOTHING",
            params![
                entry.id.as_str(),
                entry.dedup_key(),
                entry.operation.as_str(),
                entry.entity_type,
                entry.entity_id,
                entry.payload,
                entry.client_id,
                entry.lamport_clock as i64,
                entry.client_timestamp,
                entry.server_timestamp,
                entry.status.as_str(),
                i64::from(entry.attempts),
                entry.next_retry_at,
                entry.processing_since,
                entry.error_message,
                entry.result,
            ],
        )?;

        Ok(inserted == 1)
    }

    fn get(&self, id: &EntryId) -> Result<Option<JournalEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = ?1"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn get_by_dedup_key(&self, dedup_key: &str) -> Result<Option<JournalEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE dedup_key = ?1"),
                params![dedup_key],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn save(&self, entry: &JournalEntry) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE journal_entries
             SET status = ?2, attempts = ?3, next_retry_at = ?4,
                 processing_since = ?5, error_message = ?6, result = ?7,
                 server_timestamp = ?8
             WHERE id = ?1",
            params![
                entry.id.as_str(),
                entry.status.as_str(),
                i64::from(entry.attempts),
                entry.next_retry_at,
                entry.processing_since,
                entry.error_message,
                entry.result,
                entry.server_timestamp,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(entry.id.to_string()));
        }

        Ok(())
    }

    fn pending_entity_keys(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT entity_type, entity_id
             FROM journal_entries
             WHERE status = 'pending'",
        )?;
        let keys = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn pending_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<JournalEntry>> {
        self.select_many(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM journal_entries
                 WHERE entity_type = ?1 AND entity_id = ?2 AND status = 'pending'
                 ORDER BY server_timestamp ASC"
            ),
            params![entity_type, entity_id],
        )
    }

    fn due_retries(&self, now_ms: i64) -> Result<Vec<JournalEntry>> {
        self.select_many(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM journal_entries
                 WHERE status = 'error' AND next_retry_at IS NOT NULL
                   AND next_retry_at <= ?1
                 ORDER BY next_retry_at ASC"
            ),
            params![now_ms],
        )
    }

    fn stale_processing(&self, cutoff_ms: i64) -> Result<Vec<JournalEntry>> {
        self.select_many(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM journal_entries
                 WHERE status = 'processing' AND processing_since IS NOT NULL
                   AND processing_since <= ?1
                 ORDER BY processing_since ASC"
            ),
            params![cutoff_ms],
        )
    }

    fn max_lamport_clock(&self) -> Result<u64> {
        let max: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(lamport_clock), 0) FROM journal_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(max as u64)
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM journal_entries GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count as u64;
            counts.total += count;
            match status.as_str() {
                "pending" => counts.pending = count,
                "processing" => counts.processing = count,
                "done" => counts.done = count,
                "error" => counts.error = count,
                "conflict" => counts.conflict = count,
                other => {
                    return Err(Error::InvalidInput(format!(
                        "unknown status in journal: {other}"
                    )))
                }
            }
        }
        Ok(counts)
    }
}
