//! fieldsync-core - Core library for fieldsync
//!
//! The offline change journal and synchronization engine: disconnected
//! field clients record locally-clocked mutations; this crate
//! deduplicates, causally orders, applies, retries, and flags conflicting
//! writes on the authority side.

pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod models;
pub mod sync;

pub use clock::LamportClock;
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{EntryId, EntryStatus, JournalEntry, NewEntry, Operation};
pub use sync::{EntryOutcome, SubmitBatch, SyncEngine};
