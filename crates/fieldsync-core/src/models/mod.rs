//! Data models for fieldsync

mod entry;

pub use entry::{
    dedup_key, EntryId, EntryStatus, JournalEntry, NewEntry, Operation, StatusCounts,
};
