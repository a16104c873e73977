//! The change journal synchronization engine
//!
//! Control flow: clients submit locally-clocked batches through the ingest
//! gateway, which deduplicates and stores them pending. The resolver orders
//! each entity's pending entries causally and marks concurrent conflicting
//! writes. The applier applies the survivors in order through the domain
//! collaborator. The retry scheduler requeues failed entries with
//! exponential backoff until a ceiling, after which they surface as
//! permanent failures.

mod applier;
mod engine;
mod ingest;
mod resolver;
mod scheduler;

pub use engine::{EngineHandle, JournalMetrics, SyncEngine};
pub use ingest::{EntryOutcome, SubmitBatch};
pub use scheduler::{backoff_delay, next_retry_at};
