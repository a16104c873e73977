//! The sync engine: wiring, scheduling, and the per-entity lock boundary

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};

use crate::clock::LamportClock;
use crate::config::SyncConfig;
use crate::db::{Database, JournalRepository, SqliteJournalRepository};
use crate::domain::EntityApplier;
use crate::error::{Error, Result};
use crate::models::{EntryId, EntryStatus, JournalEntry, StatusCounts};

use super::applier::{self, now_ms};
use super::ingest::{self, EntryOutcome, SubmitBatch};
use super::resolver;

type EntityKey = (String, String);

/// Journal totals plus the derived success ratio, for dashboards
#[derive(Debug, Clone, Copy, Serialize)]
pub struct JournalMetrics {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub error: u64,
    pub conflict: u64,
    pub success_ratio: f64,
}

impl From<StatusCounts> for JournalMetrics {
    fn from(counts: StatusCounts) -> Self {
        Self {
            total: counts.total,
            pending: counts.pending,
            processing: counts.processing,
            done: counts.done,
            error: counts.error,
            conflict: counts.conflict,
            success_ratio: counts.success_ratio(),
        }
    }
}

/// The synchronization authority
///
/// Ingestion runs fully in parallel across clients; resolution and
/// application for one `(entity_type, entity_id)` are serialized behind a
/// per-entity mutex while distinct entities proceed in parallel. Ingestion
/// and processing are decoupled by the pending queue: no entry's
/// processing ever blocks a submit.
pub struct SyncEngine {
    db: Arc<Database>,
    clock: LamportClock,
    domain: Arc<dyn EntityApplier>,
    config: SyncConfig,
    entity_locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
    dirty: Notify,
}

impl SyncEngine {
    /// Build an engine over the given journal and domain collaborator
    ///
    /// Restores the Lamport clock from the highest value the journal has
    /// ever recorded, so it never regresses across restarts.
    pub async fn new(
        db: Arc<Database>,
        domain: Arc<dyn EntityApplier>,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        let floor = {
            let conn = db.lock().await;
            SqliteJournalRepository::new(&conn).max_lamport_clock()?
        };
        tracing::debug!(clock_floor = floor, "Restored authority clock");

        Ok(Arc::new(Self {
            db,
            clock: LamportClock::restored(floor),
            domain,
            config,
            entity_locks: Mutex::new(HashMap::new()),
            dirty: Notify::new(),
        }))
    }

    /// The authority's logical clock
    pub const fn clock(&self) -> &LamportClock {
        &self.clock
    }

    /// Accept a batch of mutations from one client
    ///
    /// Returns one outcome per entry and wakes the processing sweep. Safe
    /// to call concurrently from any number of client sessions.
    pub async fn submit_batch(&self, batch: SubmitBatch) -> Result<Vec<EntryOutcome>> {
        let outcomes = {
            let conn = self.db.lock().await;
            ingest::admit_batch(&conn, &self.clock, batch, now_ms())?
        };
        self.dirty.notify_one();
        Ok(outcomes)
    }

    /// Resolve and apply everything pending, entity by entity
    ///
    /// Distinct entities are processed in parallel; one entity's failure
    /// never stalls another.
    pub async fn process_pending(self: &Arc<Self>) -> Result<()> {
        let keys = {
            let conn = self.db.lock().await;
            SqliteJournalRepository::new(&conn).pending_entity_keys()?
        };

        let mut tasks = JoinSet::new();
        for key in keys {
            let engine = Arc::clone(self);
            tasks.spawn(async move { engine.process_entity(key).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(%err, "Entity processing failed"),
                Err(join_err) => tracing::error!(%join_err, "Entity processing task panicked"),
            }
        }
        Ok(())
    }

    /// Resolve and apply one entity's pending entries, serialized per entity
    async fn process_entity(&self, key: EntityKey) -> Result<()> {
        let _entity_guard = self.lock_entity(&key).await;

        let proceed = {
            let conn = self.db.lock().await;
            let repo = SqliteJournalRepository::new(&conn);
            let pending = repo.pending_for_entity(&key.0, &key.1)?;
            if pending.is_empty() {
                return Ok(());
            }

            let plan = resolver::plan(pending);
            for mark in plan.conflicts {
                let mut entry = mark.entry;
                entry.mark_conflict(mark.message.clone())?;
                repo.save(&entry)?;
                tracing::warn!(
                    dedup_key = %entry.dedup_key(),
                    reason = %mark.message,
                    "Journal entry conflicted; external resolution required"
                );
            }
            plan.proceed
        };

        applier::apply_ordered(&self.db, &self.domain, &self.config, proceed).await
    }

    /// Immediately resolve and apply the entity of one entry, out of the
    /// normal sweep cadence
    ///
    /// Settled entries (done, conflict, exhausted error) are returned
    /// as-is: a force on a permanent failure fails deterministically
    /// rather than restarting the retry budget. A retryable error is
    /// requeued first, ignoring its backoff deadline.
    pub async fn force_sync(self: &Arc<Self>, id: &EntryId) -> Result<JournalEntry> {
        let entry = self.entry(id).await?;
        if entry.is_settled() {
            return Ok(entry);
        }

        if entry.status == EntryStatus::Error {
            let conn = self.db.lock().await;
            let repo = SqliteJournalRepository::new(&conn);
            if let Some(mut fresh) = repo.get(id)? {
                if fresh.status == EntryStatus::Error && !fresh.is_exhausted() {
                    fresh.requeue()?;
                    repo.save(&fresh)?;
                }
            }
        }

        self.process_entity(entry.entity_key()).await?;
        self.entry(id).await
    }

    /// Requeue error entries whose backoff deadline has elapsed
    pub async fn retry_sweep(self: &Arc<Self>) -> Result<usize> {
        self.retry_sweep_at(now_ms()).await
    }

    /// [`retry_sweep`](Self::retry_sweep) against an explicit clock
    pub async fn retry_sweep_at(self: &Arc<Self>, now_ms: i64) -> Result<usize> {
        let conn = self.db.lock().await;
        let repo = SqliteJournalRepository::new(&conn);
        let due = repo.due_retries(now_ms)?;
        let requeued = due.len();
        for mut entry in due {
            tracing::info!(
                dedup_key = %entry.dedup_key(),
                attempts = entry.attempts,
                "Requeueing entry for retry"
            );
            entry.requeue()?;
            repo.save(&entry)?;
        }
        Ok(requeued)
    }

    /// Requeue entries stuck in `processing` beyond the timeout threshold
    ///
    /// Covers crashes between the processing marker and the outcome write.
    pub async fn recover_stale(self: &Arc<Self>) -> Result<usize> {
        self.recover_stale_at(now_ms()).await
    }

    /// [`recover_stale`](Self::recover_stale) against an explicit clock
    pub async fn recover_stale_at(self: &Arc<Self>, now_ms: i64) -> Result<usize> {
        let cutoff = now_ms
            - i64::try_from(self.config.processing_timeout.as_millis()).unwrap_or(i64::MAX);
        let conn = self.db.lock().await;
        let repo = SqliteJournalRepository::new(&conn);
        let stale = repo.stale_processing(cutoff)?;
        let recovered = stale.len();
        for mut entry in stale {
            tracing::warn!(
                dedup_key = %entry.dedup_key(),
                processing_since = entry.processing_since,
                "Recovering entry stuck in processing"
            );
            entry.requeue()?;
            repo.save(&entry)?;
        }
        Ok(recovered)
    }

    /// Fetch one entry by id
    pub async fn entry(&self, id: &EntryId) -> Result<JournalEntry> {
        let conn = self.db.lock().await;
        SqliteJournalRepository::new(&conn)
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Fetch one entry by its dedup key
    pub async fn entry_by_dedup_key(&self, dedup_key: &str) -> Result<JournalEntry> {
        let conn = self.db.lock().await;
        SqliteJournalRepository::new(&conn)
            .get_by_dedup_key(dedup_key)?
            .ok_or_else(|| Error::NotFound(dedup_key.to_string()))
    }

    /// Journal totals and success ratio
    pub async fn metrics(&self) -> Result<JournalMetrics> {
        let conn = self.db.lock().await;
        let counts = SqliteJournalRepository::new(&conn).status_counts()?;
        Ok(counts.into())
    }

    /// Spawn the background worker: periodic retry/recovery/processing
    /// sweeps plus immediate wakeups after ingest
    pub fn start(self: &Arc<Self>) -> EngineHandle {
        let engine = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => engine.sweep_once().await,
                    _ = engine.dirty.notified() => {
                        if let Err(err) = engine.process_pending().await {
                            tracing::error!(%err, "Processing sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!("Sync worker stopped");
        });

        EngineHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn sweep_once(self: &Arc<Self>) {
        if let Err(err) = self.retry_sweep().await {
            tracing::error!(%err, "Retry sweep failed");
        }
        if let Err(err) = self.recover_stale().await {
            tracing::error!(%err, "Stale-processing recovery failed");
        }
        if let Err(err) = self.process_pending().await {
            tracing::error!(%err, "Processing sweep failed");
        }
    }

    async fn lock_entity(&self, key: &EntityKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.entity_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Handle to the background worker spawned by [`SyncEngine::start`]
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal the worker to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
