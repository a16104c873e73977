//! Ordered, idempotent application of resolved entries

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::db::{Database, JournalRepository, SqliteJournalRepository};
use crate::domain::{ApplyRequest, EntityApplier};
use crate::error::Result;
use crate::models::JournalEntry;

use super::scheduler;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Apply one entity's planned entries in causal order
///
/// Each entry is marked `processing` and persisted before the attempt, so
/// a crash mid-apply is observable and recoverable. The domain call runs
/// on a blocking thread under the configured timeout. A failure halts the
/// remainder of this entity's batch — a later write must not overtake a
/// failed earlier one — but callers process other entities independently.
pub(crate) async fn apply_ordered(
    db: &Database,
    domain: &Arc<dyn EntityApplier>,
    config: &SyncConfig,
    entries: Vec<JournalEntry>,
) -> Result<()> {
    for mut entry in entries {
        entry.begin_processing(now_ms())?;
        {
            let conn = db.lock().await;
            SqliteJournalRepository::new(&conn).save(&entry)?;
        }

        let request = ApplyRequest {
            operation: entry.operation,
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            payload: entry.payload.clone(),
            dedup_key: entry.dedup_key(),
        };
        let worker = Arc::clone(domain);
        let attempt = tokio::time::timeout(
            config.apply_timeout,
            tokio::task::spawn_blocking(move || worker.apply(&request)),
        )
        .await;

        let now = now_ms();
        let failed = match attempt {
            Ok(Ok(Ok(outcome))) => {
                if outcome.already_applied {
                    tracing::debug!(
                        dedup_key = %entry.dedup_key(),
                        "Mutation was already applied; completing without re-applying"
                    );
                }
                entry.complete(serde_json::to_value(&outcome)?, now)?;
                tracing::debug!(
                    dedup_key = %entry.dedup_key(),
                    version = outcome.version,
                    "Applied journal entry"
                );
                false
            }
            Ok(Ok(Err(err))) => {
                record_failure(&mut entry, &err.to_string(), err.is_retryable(), config, now)?;
                true
            }
            Ok(Err(join_err)) => {
                record_failure(
                    &mut entry,
                    &format!("application task failed: {join_err}"),
                    true,
                    config,
                    now,
                )?;
                true
            }
            Err(_elapsed) => {
                record_failure(&mut entry, "application attempt timed out", true, config, now)?;
                true
            }
        };

        {
            let conn = db.lock().await;
            SqliteJournalRepository::new(&conn).save(&entry)?;
        }

        if failed {
            // Later entries for this entity stay pending until the retry
            // (or operator) resolves the earlier failure
            break;
        }
    }

    Ok(())
}

fn record_failure(
    entry: &mut JournalEntry,
    message: &str,
    retryable: bool,
    config: &SyncConfig,
    now: i64,
) -> Result<()> {
    let next_retry = if retryable {
        scheduler::next_retry_at(entry.attempts + 1, config, now)
    } else {
        // A structurally invalid payload can never succeed; fail it
        // permanently on first sight instead of burning the retry budget
        None
    };
    entry.fail(message, next_retry)?;

    if entry.is_exhausted() {
        tracing::warn!(
            dedup_key = %entry.dedup_key(),
            attempts = entry.attempts,
            %message,
            "Journal entry failed permanently; operator intervention required"
        );
    } else {
        tracing::info!(
            dedup_key = %entry.dedup_key(),
            attempts = entry.attempts,
            next_retry_at = entry.next_retry_at,
            %message,
            "Journal entry failed; retry scheduled"
        );
    }
    Ok(())
}
