//! Database connection management

use std::path::Path;

use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

use super::migrations;

/// Wrapper around the journal's `SQLite` connection
///
/// The connection is guarded by an async mutex so the engine's concurrent
/// tasks (ingest, resolution, sweeps) can share it. Repository access goes
/// through [`lock`](Self::lock); see `SqliteJournalRepository`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the journal database at the given path, creating it if needed
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection for a batch of repository calls
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Blocking variant of [`lock`](Self::lock) for synchronous callers
    ///
    /// Panics if called from within an async context.
    pub fn blocking_lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.blocking_lock()
    }
}

/// Configure `SQLite` for concurrent use
fn configure(conn: &Connection) -> Result<()> {
    // WAL is unavailable for in-memory databases; ignore the refusal
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}
