//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: the change journal
///
/// Entries are append-mostly and never deleted; the table doubles as the
/// causal log and audit trail. Indexes back the three hot queries: dedup
/// lookups at ingest, the resolver's per-entity grouping, and the retry
/// sweep.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS journal_entries (
            id TEXT PRIMARY KEY,
            dedup_key TEXT NOT NULL UNIQUE,
            operation TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            client_id TEXT NOT NULL,
            lamport_clock INTEGER NOT NULL,
            client_timestamp INTEGER NOT NULL,
            server_timestamp INTEGER NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER,
            processing_since INTEGER,
            error_message TEXT,
            result TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_journal_entity_status
            ON journal_entries(entity_type, entity_id, status);
        CREATE INDEX IF NOT EXISTS idx_journal_retry
            ON journal_entries(status, next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_journal_client
            ON journal_entries(client_id, lamport_clock);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
