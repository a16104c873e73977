//! Ingest gateway: the write boundary for client batches

use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::LamportClock;
use crate::db::{JournalRepository, SqliteJournalRepository};
use crate::error::{Error, Result};
use crate::models::{EntryId, EntryStatus, JournalEntry, NewEntry, Operation};

/// Longest accepted identifier (entity type/id, client id)
const MAX_IDENT_LEN: usize = 120;

/// A batch of mutations from one client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitBatch {
    pub client_id: String,
    pub entries: Vec<NewEntry>,
}

/// Per-entry ingest outcome reported back to the client
///
/// A `duplicate` is not an error: retransmission of an already-accepted
/// entry returns the stored entry's current status, making at-least-once
/// delivery safe. A `rejected` entry was structurally invalid and was
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum EntryOutcome {
    Accepted {
        dedup_key: String,
        entry_id: EntryId,
        status: EntryStatus,
    },
    Duplicate {
        dedup_key: String,
        entry_id: EntryId,
        status: EntryStatus,
    },
    Rejected {
        reason: String,
    },
}

/// Admit a batch into the journal, one outcome per entry
///
/// A failure on one entry never blocks the others. Malformed entries are
/// rejected synchronously and never stored; everything else is persisted
/// pending (or recognized as a duplicate) and the producer's clock value
/// is merged into `clock`.
pub fn admit_batch(
    conn: &Connection,
    clock: &LamportClock,
    batch: SubmitBatch,
    now_ms: i64,
) -> Result<Vec<EntryOutcome>> {
    if !valid_ident(&batch.client_id) {
        return Err(Error::InvalidInput(format!(
            "malformed client_id: {:?}",
            batch.client_id
        )));
    }

    let repo = SqliteJournalRepository::new(conn);
    let mut outcomes = Vec::with_capacity(batch.entries.len());
    let mut last_clock: Option<u64> = None;

    for new in batch.entries {
        if let Err(reason) = validate_entry(&new, last_clock) {
            tracing::warn!(
                client = %batch.client_id,
                entity_type = %new.entity_type,
                entity_id = %new.entity_id,
                %reason,
                "Rejected journal entry"
            );
            outcomes.push(EntryOutcome::Rejected { reason });
            continue;
        }
        last_clock = Some(new.lamport_clock);

        let entry = JournalEntry::admit(new, batch.client_id.clone(), now_ms);
        let dedup_key = entry.dedup_key();

        if repo.insert_if_absent(&entry)? {
            clock.observe(entry.lamport_clock)?;
            tracing::debug!(
                client = %batch.client_id,
                %dedup_key,
                "Accepted journal entry"
            );
            outcomes.push(EntryOutcome::Accepted {
                dedup_key,
                entry_id: entry.id,
                status: entry.status,
            });
        } else {
            let existing = repo
                .get_by_dedup_key(&dedup_key)?
                .ok_or_else(|| Error::NotFound(dedup_key.clone()))?;
            tracing::debug!(
                client = %batch.client_id,
                %dedup_key,
                status = %existing.status,
                "Duplicate journal entry"
            );
            outcomes.push(EntryOutcome::Duplicate {
                dedup_key,
                entry_id: existing.id,
                status: existing.status,
            });
        }
    }

    Ok(outcomes)
}

/// Structural validation; returns the rejection reason on failure
fn validate_entry(new: &NewEntry, last_clock: Option<u64>) -> std::result::Result<(), String> {
    if !valid_ident(&new.entity_type) {
        return Err(format!("malformed entity_type: {:?}", new.entity_type));
    }
    if !valid_ident(&new.entity_id) {
        return Err(format!("malformed entity_id: {:?}", new.entity_id));
    }
    if new.lamport_clock == 0 {
        return Err("lamport_clock must be positive".to_string());
    }
    if i64::try_from(new.lamport_clock).is_err() {
        return Err("lamport_clock exceeds storable range".to_string());
    }
    if let Some(last) = last_clock {
        if new.lamport_clock <= last {
            return Err(format!(
                "lamport_clock {} does not increase over {} within the batch",
                new.lamport_clock, last
            ));
        }
    }
    match new.operation {
        Operation::Create | Operation::Update => {
            if !new.payload.is_object() {
                return Err(format!("{} payload must be a JSON object", new.operation));
            }
        }
        Operation::Delete => {
            if !matches!(new.payload, Value::Object(_) | Value::Null) {
                return Err("delete payload must be a JSON object or null".to_string());
            }
        }
    }
    Ok(())
}

fn valid_ident(value: &str) -> bool {
    let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex");
    value.len() <= MAX_IDENT_LEN && re.is_match(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn update(entity_id: &str, clock: u64) -> NewEntry {
        NewEntry {
            operation: Operation::Update,
            entity_type: "asset".to_string(),
            entity_id: entity_id.to_string(),
            payload: json!({"condition": "worn"}),
            lamport_clock: clock,
            client_timestamp: 500,
        }
    }

    fn batch(entries: Vec<NewEntry>) -> SubmitBatch {
        SubmitBatch {
            client_id: "tablet-a".to_string(),
            entries,
        }
    }

    #[test]
    fn accepts_and_stores_pending() {
        let conn = setup();
        let clock = LamportClock::new();

        let outcomes = admit_batch(&conn, &clock, batch(vec![update("7", 5)]), 1_000).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0],
            EntryOutcome::Accepted { dedup_key, status: EntryStatus::Pending, .. }
                if dedup_key == "update:asset:7:tablet-a:5"
        ));
        // The authority's clock stays ahead of everything observed
        assert_eq!(clock.current(), 5);
    }

    #[test]
    fn resubmission_is_a_noop_duplicate() {
        let conn = setup();
        let clock = LamportClock::new();

        let first = admit_batch(&conn, &clock, batch(vec![update("7", 5)]), 1_000).unwrap();
        let second = admit_batch(&conn, &clock, batch(vec![update("7", 5)]), 2_000).unwrap();

        let EntryOutcome::Accepted { dedup_key, entry_id, .. } = &first[0] else {
            panic!("expected accepted outcome");
        };
        let EntryOutcome::Duplicate {
            dedup_key: dup_key,
            entry_id: dup_id,
            status,
        } = &second[0]
        else {
            panic!("expected duplicate outcome");
        };

        assert_eq!(dup_key, dedup_key);
        assert_eq!(dup_id, entry_id);
        assert_eq!(*status, EntryStatus::Pending);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM journal_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn one_bad_entry_does_not_block_the_rest() {
        let conn = setup();
        let clock = LamportClock::new();

        let outcomes = admit_batch(
            &conn,
            &clock,
            batch(vec![
                update("7", 5),
                NewEntry {
                    payload: json!("not an object"),
                    ..update("8", 6)
                },
                update("9", 7),
            ]),
            1_000,
        )
        .unwrap();

        assert!(matches!(outcomes[0], EntryOutcome::Accepted { .. }));
        assert!(matches!(outcomes[1], EntryOutcome::Rejected { .. }));
        assert!(matches!(outcomes[2], EntryOutcome::Accepted { .. }));
    }

    #[test]
    fn rejects_non_monotonic_clocks_within_batch() {
        let conn = setup();
        let clock = LamportClock::new();

        let outcomes = admit_batch(
            &conn,
            &clock,
            batch(vec![update("7", 5), update("8", 5), update("9", 4)]),
            1_000,
        )
        .unwrap();

        assert!(matches!(outcomes[0], EntryOutcome::Accepted { .. }));
        assert!(matches!(outcomes[1], EntryOutcome::Rejected { .. }));
        assert!(matches!(outcomes[2], EntryOutcome::Rejected { .. }));
    }

    #[test]
    fn rejects_malformed_fields() {
        let conn = setup();
        let clock = LamportClock::new();

        let cases = vec![
            NewEntry {
                entity_type: String::new(),
                ..update("7", 1)
            },
            NewEntry {
                entity_id: "has spaces".to_string(),
                ..update("7", 2)
            },
            NewEntry {
                lamport_clock: 0,
                ..update("7", 3)
            },
        ];
        for case in cases {
            let outcomes =
                admit_batch(&conn, &clock, batch(vec![case]), 1_000).unwrap();
            assert!(matches!(outcomes[0], EntryOutcome::Rejected { .. }));
        }
        // Nothing malformed was stored
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM journal_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn malformed_client_id_rejects_the_batch() {
        let conn = setup();
        let clock = LamportClock::new();

        let result = admit_batch(
            &conn,
            &clock,
            SubmitBatch {
                client_id: " ".to_string(),
                entries: vec![update("7", 5)],
            },
            1_000,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn delete_payload_may_be_null() {
        let conn = setup();
        let clock = LamportClock::new();

        let outcomes = admit_batch(
            &conn,
            &clock,
            batch(vec![NewEntry {
                operation: Operation::Delete,
                payload: Value::Null,
                ..update("7", 5)
            }]),
            1_000,
        )
        .unwrap();
        assert!(matches!(outcomes[0], EntryOutcome::Accepted { .. }));
    }
}
