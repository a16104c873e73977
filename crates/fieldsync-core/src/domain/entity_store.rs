//! Generic versioned document store: the default domain adapter

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::models::Operation;

use super::{ApplyError, ApplyOutcome, ApplyRequest, EntityApplier};

/// A domain entity as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub document: Value,
    pub version: i64,
    pub is_deleted: bool,
}

/// `SQLite`-backed [`EntityApplier`]
///
/// Entities are JSON documents keyed by `(entity_type, entity_id)` with a
/// version counter and a delete tombstone. Every applied mutation is
/// recorded in `applied_mutations` within the same transaction as the
/// mutation itself, which is what makes replays detectable.
///
/// Owns its own connection: domain state is a collaborator of the journal,
/// not part of it.
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Open the entity store at the given path, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ApplyError> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self, ApplyError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ApplyError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                document TEXT NOT NULL,
                version INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            );
            CREATE TABLE IF NOT EXISTS applied_mutations (
                dedup_key TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                applied_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetch an entity, including tombstoned ones
    pub fn get(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<EntityRecord>, ApplyError> {
        let conn = self.lock()?;
        fetch(&conn, entity_type, entity_id)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ApplyError> {
        self.conn
            .lock()
            .map_err(|_| ApplyError::Storage("entity store lock poisoned".to_string()))
    }
}

impl EntityApplier for SqliteEntityStore {
    fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ApplyError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ApplyError::from)?;

        // Applied-set check: a replayed mutation short-circuits untouched
        let replay: Option<i64> = tx
            .query_row(
                "SELECT version FROM applied_mutations WHERE dedup_key = ?1",
                params![request.dedup_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(ApplyError::from)?;
        if let Some(version) = replay {
            return Ok(ApplyOutcome {
                version,
                already_applied: true,
            });
        }

        let existing = fetch(&tx, &request.entity_type, &request.entity_id)?;
        let now = chrono::Utc::now().timestamp_millis();

        let version = match request.operation {
            Operation::Create => {
                let document = object_payload(&request.payload)?;
                match existing {
                    Some(record) if !record.is_deleted => {
                        return Err(ApplyError::Invalid(format!(
                            "{}/{} already exists",
                            request.entity_type, request.entity_id
                        )));
                    }
                    // Re-creating over a tombstone resurrects the entity
                    Some(record) => {
                        let version = record.version + 1;
                        upsert(&tx, request, &Value::Object(document), version, false, now)?;
                        version
                    }
                    None => {
                        upsert(&tx, request, &Value::Object(document), 1, false, now)?;
                        1
                    }
                }
            }
            Operation::Update => {
                let patch = object_payload(&request.payload)?;
                let record = live(existing, request)?;
                let mut document = match record.document {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                for (field, value) in patch {
                    document.insert(field, value);
                }
                let version = record.version + 1;
                upsert(&tx, request, &Value::Object(document), version, false, now)?;
                version
            }
            Operation::Delete => {
                let record = live(existing, request)?;
                let version = record.version + 1;
                upsert(&tx, request, &record.document, version, true, now)?;
                version
            }
        };

        tx.execute(
            "INSERT INTO applied_mutations (dedup_key, entity_type, entity_id, version, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.dedup_key,
                request.entity_type,
                request.entity_id,
                version,
                now,
            ],
        )
        .map_err(ApplyError::from)?;

        tx.commit().map_err(ApplyError::from)?;
        Ok(ApplyOutcome {
            version,
            already_applied: false,
        })
    }
}

fn fetch(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Option<EntityRecord>, ApplyError> {
    conn.query_row(
        "SELECT document, version, is_deleted FROM entities
         WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type, entity_id],
        |row| {
            Ok(EntityRecord {
                document: row.get(0)?,
                version: row.get(1)?,
                is_deleted: row.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(ApplyError::from)
}

fn upsert(
    conn: &Connection,
    request: &ApplyRequest,
    document: &Value,
    version: i64,
    is_deleted: bool,
    now: i64,
) -> Result<(), ApplyError> {
    conn.execute(
        "INSERT INTO entities (entity_type, entity_id, document, version, is_deleted, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(entity_type, entity_id) DO UPDATE SET
             document = excluded.document,
             version = excluded.version,
             is_deleted = excluded.is_deleted,
             updated_at = excluded.updated_at",
        params![
            request.entity_type,
            request.entity_id,
            document,
            version,
            i64::from(is_deleted),
            now,
        ],
    )
    .map_err(ApplyError::from)?;
    Ok(())
}

fn live(existing: Option<EntityRecord>, request: &ApplyRequest) -> Result<EntityRecord, ApplyError> {
    match existing {
        Some(record) if !record.is_deleted => Ok(record),
        _ => Err(ApplyError::Invalid(format!(
            "{}/{} does not exist",
            request.entity_type, request.entity_id
        ))),
    }
}

fn object_payload(payload: &Value) -> Result<Map<String, Value>, ApplyError> {
    payload
        .as_object()
        .cloned()
        .ok_or_else(|| ApplyError::Invalid("payload must be a JSON object".to_string()))
}
