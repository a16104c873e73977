//! Causal ordering and conflict detection for one entity's pending entries

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;

use crate::models::{JournalEntry, Operation};

/// A pending entry that lost against a concurrent write
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConflictMark {
    pub entry: JournalEntry,
    /// Explanation naming the entry it conflicts with
    pub message: String,
}

/// Resolution plan for one entity: what applies, in which order, and what
/// is conflicted out
#[derive(Debug, Default)]
pub(crate) struct Plan {
    /// Entries to apply, in causal order
    pub proceed: Vec<JournalEntry>,
    pub conflicts: Vec<ConflictMark>,
}

/// Order a pending batch and mark concurrent conflicting writes
///
/// The order is a deterministic total order over the Lamport partial
/// order: clock ascending, ties broken by `(client_id, server_timestamp)`
/// and finally the dedup key, so the same input set always resolves
/// identically regardless of arrival order.
///
/// Of a conflicting pair, the later-ordered entry is marked; the earlier
/// one proceeds. An entry is only checked against earlier entries that
/// themselves proceed — losing against an already-conflicted entry means
/// nothing, since that entry will never be applied.
pub(crate) fn plan(mut entries: Vec<JournalEntry>) -> Plan {
    entries.sort_unstable_by(causal_order);

    let mut result = Plan::default();
    'next: for entry in entries {
        for earlier in &result.proceed {
            if let Some(message) = conflict_reason(earlier, &entry) {
                result.conflicts.push(ConflictMark { entry, message });
                continue 'next;
            }
        }
        result.proceed.push(entry);
    }
    result
}

/// Deterministic total order consistent with the Lamport partial order
pub(crate) fn causal_order(a: &JournalEntry, b: &JournalEntry) -> CmpOrdering {
    a.lamport_clock
        .cmp(&b.lamport_clock)
        .then_with(|| a.client_id.cmp(&b.client_id))
        .then_with(|| a.server_timestamp.cmp(&b.server_timestamp))
        .then_with(|| a.dedup_key().cmp(&b.dedup_key()))
}

/// Why `later` cannot be applied given that `earlier` proceeds, if it can't
///
/// Two entries conflict when they are concurrent, touch overlapping state,
/// and at least one of them is an UPDATE or DELETE. Concurrent creation of
/// the same entity by different clients is always a conflict: that is an
/// identity collision, not a causality question.
///
/// A scalar Lamport clock cannot prove causality, only disprove it
/// (`a -> b` implies `C(a) < C(b)`). Entries from different clients with
/// equal clocks are therefore provably concurrent; a strictly greater
/// clock is granted the benefit of causality and ordered normally.
fn conflict_reason(earlier: &JournalEntry, later: &JournalEntry) -> Option<String> {
    if earlier.client_id == later.client_id {
        return None;
    }

    if earlier.operation == Operation::Create && later.operation == Operation::Create {
        return Some(format!(
            "concurrent create of {}/{}; conflicts with {}",
            later.entity_type,
            later.entity_id,
            earlier.dedup_key()
        ));
    }

    let concurrent = earlier.lamport_clock == later.lamport_clock;
    if !concurrent {
        return None;
    }

    let mutating = earlier.operation != Operation::Create || later.operation != Operation::Create;
    if mutating && overlapping(earlier, later) {
        return Some(format!(
            "concurrent write to overlapping fields of {}/{}; conflicts with {}",
            later.entity_type,
            later.entity_id,
            earlier.dedup_key()
        ));
    }

    None
}

/// Whether two entries touch overlapping state
///
/// Granularity is the payload's top-level fields; CREATE and DELETE write
/// the whole document and overlap everything.
fn overlapping(a: &JournalEntry, b: &JournalEntry) -> bool {
    if writes_whole_document(a.operation) || writes_whole_document(b.operation) {
        return true;
    }
    let fields_a = touched_fields(a);
    let fields_b = touched_fields(b);
    fields_a.intersection(&fields_b).next().is_some()
}

const fn writes_whole_document(operation: Operation) -> bool {
    matches!(operation, Operation::Create | Operation::Delete)
}

fn touched_fields(entry: &JournalEntry) -> BTreeSet<&str> {
    entry
        .payload
        .as_object()
        .map(|object| object.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::models::{NewEntry, Operation};

    fn entry(
        client_id: &str,
        clock: u64,
        operation: Operation,
        payload: Value,
        server_ts: i64,
    ) -> JournalEntry {
        JournalEntry::admit(
            NewEntry {
                operation,
                entity_type: "asset".to_string(),
                entity_id: "7".to_string(),
                payload,
                lamport_clock: clock,
                client_timestamp: 0,
            },
            client_id,
            server_ts,
        )
    }

    fn update(client_id: &str, clock: u64, payload: Value) -> JournalEntry {
        entry(client_id, clock, Operation::Update, payload, 1_000)
    }

    #[test]
    fn ordering_is_deterministic_regardless_of_arrival() {
        let a = update("tablet-a", 3, json!({"x": 1}));
        let b = update("tablet-a", 5, json!({"x": 2}));
        let c = update("tablet-a", 9, json!({"x": 3}));

        let forward = plan(vec![a.clone(), b.clone(), c.clone()]);
        let shuffled = plan(vec![c, a, b]);

        let order = |p: &Plan| p.proceed.iter().map(|e| e.lamport_clock).collect::<Vec<_>>();
        assert_eq!(order(&forward), vec![3, 5, 9]);
        assert_eq!(order(&forward), order(&shuffled));
        assert!(forward.conflicts.is_empty());
    }

    #[test]
    fn ties_break_by_client_then_server_timestamp() {
        let b = entry("tablet-b", 5, Operation::Update, json!({"a": 1}), 1_000);
        let a_late = entry("tablet-a", 5, Operation::Update, json!({"b": 1}), 2_000);
        let a_early = entry("tablet-a", 5, Operation::Update, json!({"c": 1}), 1_000);

        let plan = plan(vec![b.clone(), a_late.clone(), a_early.clone()]);
        let ids: Vec<_> = plan.proceed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a_early.id, a_late.id, b.id]);
    }

    #[test]
    fn concurrent_overlapping_updates_yield_one_conflict() {
        let winner = update("tablet-a", 5, json!({"condition": "worn"}));
        let loser = update("tablet-b", 5, json!({"condition": "ok", "note": "x"}));

        let plan = plan(vec![loser.clone(), winner.clone()]);
        assert_eq!(plan.proceed.len(), 1);
        assert_eq!(plan.proceed[0].id, winner.id);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].entry.id, loser.id);
        assert!(plan.conflicts[0].message.contains(&winner.dedup_key()));
    }

    #[test]
    fn concurrent_disjoint_updates_both_proceed() {
        let a = update("tablet-a", 5, json!({"condition": "worn"}));
        let b = update("tablet-b", 5, json!({"location": "warehouse"}));

        let plan = plan(vec![a, b]);
        assert_eq!(plan.proceed.len(), 2);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn causally_ordered_updates_never_conflict() {
        // tablet-b's clock is ahead; it may have observed tablet-a's write
        let a = update("tablet-a", 5, json!({"condition": "worn"}));
        let b = update("tablet-b", 8, json!({"condition": "replaced"}));

        let plan = plan(vec![b, a]);
        assert_eq!(plan.proceed.len(), 2);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn create_vs_create_always_conflicts() {
        // Different clocks: still an identity collision
        let first = entry("tablet-a", 2, Operation::Create, json!({"n": 1}), 1_000);
        let second = entry("tablet-b", 6, Operation::Create, json!({"n": 2}), 1_000);

        let plan = plan(vec![second.clone(), first.clone()]);
        assert_eq!(plan.proceed.len(), 1);
        assert_eq!(plan.proceed[0].id, first.id);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].entry.id, second.id);
    }

    #[test]
    fn concurrent_delete_conflicts_with_update() {
        let update_entry = update("tablet-a", 5, json!({"condition": "worn"}));
        let delete_entry = entry("tablet-b", 5, Operation::Delete, Value::Null, 1_000);

        let plan = plan(vec![delete_entry.clone(), update_entry.clone()]);
        // tablet-a sorts first on the client tie-break
        assert_eq!(plan.proceed[0].id, update_entry.id);
        assert_eq!(plan.conflicts[0].entry.id, delete_entry.id);
    }

    #[test]
    fn same_client_never_conflicts_with_itself() {
        let a = update("tablet-a", 5, json!({"condition": "worn"}));
        let b = entry("tablet-a", 6, Operation::Delete, Value::Null, 1_000);

        let plan = plan(vec![b, a]);
        assert_eq!(plan.proceed.len(), 2);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn losing_against_a_conflicted_entry_means_nothing() {
        // a wins over b; c overlaps b but not a, so c still proceeds
        let a = update("tablet-a", 5, json!({"condition": "worn"}));
        let b = update("tablet-b", 5, json!({"condition": "ok", "note": "x"}));
        let c = update("tablet-c", 5, json!({"note": "y"}));

        let plan = plan(vec![a.clone(), b.clone(), c.clone()]);
        let proceed: Vec<_> = plan.proceed.iter().map(|e| e.id).collect();
        assert_eq!(proceed, vec![a.id, c.id]);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].entry.id, b.id);
    }
}
