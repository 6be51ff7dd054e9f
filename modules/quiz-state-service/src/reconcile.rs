//! Keeps each record's `stand_status` keyed by exactly the current catalog ids.
//!
//! This is the only reconciliation routine; the manager calls it from `get`,
//! after watched reloads, and after control-plane catalog reloads.

use chrono::{DateTime, Utc};
use quiz_state_types::{Record, RecordMap, StandProgress};
use std::collections::BTreeSet;

/// Add missing stands as not done and drop stands no longer in the catalog.
/// Returns true if the record changed. Progress on surviving stands is kept.
pub fn reconcile_record(record: &mut Record, stand_ids: &BTreeSet<String>) -> bool {
    let before = record.stand_status.len();
    record.stand_status.retain(|id, _| stand_ids.contains(id));
    let mut changed = record.stand_status.len() != before;

    for id in stand_ids {
        if !record.stand_status.contains_key(id) {
            record.stand_status.insert(id.clone(), StandProgress::default());
            changed = true;
        }
    }
    changed
}

/// Reconcile every record, touching `updated_at` on the ones that changed.
/// Returns the number of records changed.
pub fn reconcile_all(records: &mut RecordMap, stand_ids: &BTreeSet<String>, now: DateTime<Utc>) -> usize {
    let mut updated = 0;
    for (id, record) in records.iter_mut() {
        if reconcile_record(record, stand_ids) {
            record.touch(now);
            updated += 1;
            log::debug!("[STATE] Synced stands for participant {}", id);
        }
    }
    if updated > 0 {
        log::info!("[STATE] Synced stands for {} participants", updated);
    }
    updated
}
