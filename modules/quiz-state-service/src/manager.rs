//! StateManager - process-local façade over the state file
//!
//! The manager is responsible for:
//! - Lazily creating participant records with catalog-derived defaults
//! - Reconciling `stand_status` against the current catalog
//! - Persisting every mutation through the atomic file store
//! - Picking up writes made by sibling processes via the file watcher
//! - Fanning changes out to in-process subscribers
//!
//! All access to the record map goes through one mutex. Public operations
//! take it exactly once, save while holding it, and notify subscribers after
//! releasing it with a snapshot taken under it, so callbacks may call back in.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::StateError;
use crate::reconcile;
use crate::stats;
use crate::store::{FileStore, SaveOutcome};
use crate::watcher::{EventFilter, FileWatcher, WatchTarget};
use chrono::Utc;
use parking_lot::Mutex;
use quiz_state_types::{META_KEY, ParticipantSummary, Record, RecordMap, StateStats};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Callback invoked with the full record map after every change.
pub type Subscriber = Arc<dyn Fn(&RecordMap) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Shared {
    store: FileStore,
    catalog: Arc<Catalog>,
    records: Mutex<RecordMap>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

pub struct StateManager {
    shared: Arc<Shared>,
    watcher: Mutex<Option<FileWatcher>>,
    debounce: Duration,
}

impl StateManager {
    /// Load the state file (creating it if missing) and reconcile it against
    /// the catalog. The watcher is not started until [`StateManager::start`].
    pub fn open(config: &Config, catalog: Arc<Catalog>) -> Self {
        let store = FileStore::new(&config.state_path, &config.backup_dir, config.settle_delay);
        let loaded = store.load();
        let mut records = loaded.records;
        let synced = reconcile::reconcile_all(&mut records, &catalog.ids(), Utc::now());

        let shared = Shared {
            store,
            catalog,
            records: Mutex::new(RecordMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        };
        if !loaded.existed {
            log::info!("[STATE] Creating new state file at {}", shared.store.path().display());
        }
        if !loaded.existed || loaded.upgraded || synced > 0 {
            shared.persist(&records);
        }
        log::info!(
            "[STATE] Loaded {} participants from {}",
            records.len(),
            shared.store.path().display()
        );
        *shared.records.lock() = records;

        Self {
            shared: Arc::new(shared),
            watcher: Mutex::new(None),
            debounce: config.debounce,
        }
    }

    /// Start watching the state and catalog files. Returns false (and keeps
    /// working without live reload) if the watcher cannot be started.
    pub fn start(&self) -> bool {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return true;
        }

        let mut filter = EventFilter::new();
        filter.add(self.shared.store.path(), WatchTarget::State);
        if let Some(catalog_path) = self.shared.catalog.path() {
            filter.add(catalog_path, WatchTarget::Catalog);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let started = FileWatcher::start(filter, self.debounce, move |target| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_change(target);
            }
        });
        match started {
            Ok(watcher) => {
                *slot = Some(watcher);
                true
            }
            Err(e) => {
                log::error!("[WATCH] Failed to start file monitoring, live reload disabled: {}", e);
                false
            }
        }
    }

    /// Stop the watcher and join its thread. Safe to call more than once.
    pub fn stop(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    pub fn path(&self) -> &Path {
        self.shared.store.path()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.shared.catalog
    }

    /// Record for `id`, created with defaults on first sight. Existing records
    /// are reconciled against the current catalog and have `updated_at`
    /// refreshed; they are persisted only if reconciliation changed them.
    pub fn get(&self, id: &str) -> Record {
        let stand_ids = self.shared.catalog.ids();
        let now = Utc::now();
        if id == META_KEY {
            log::warn!("[STATE] Refusing to store a record under reserved key {}", META_KEY);
            return Record::new(&stand_ids, now);
        }

        let (record, snapshot) = {
            let mut records = self.shared.records.lock();
            match records.get_mut(id) {
                Some(record) => {
                    let changed = reconcile::reconcile_record(record, &stand_ids);
                    record.touch(now);
                    let record = record.clone();
                    if changed {
                        log::info!("[STATE] Synced stands for participant {}", id);
                        self.shared.persist(&records);
                        (record, Some(records.clone()))
                    } else {
                        (record, None)
                    }
                }
                None => {
                    log::info!("[STATE] Creating new participant: {}", id);
                    let record = Record::new(&stand_ids, now);
                    records.insert(id.to_string(), record.clone());
                    self.shared.persist(&records);
                    (record, Some(records.clone()))
                }
            }
        };

        if let Some(snapshot) = snapshot {
            self.shared.notify(&snapshot);
        }
        record
    }

    /// Shallow-merge top-level fields into an existing record. Timestamps in
    /// `fields` are ignored. Returns `None` (and changes nothing) if the
    /// participant does not exist or the merge would produce an invalid record.
    pub fn update(&self, id: &str, fields: Map<String, Value>) -> Option<Record> {
        let keys: Vec<String> = fields.keys().cloned().collect();
        let result = self.mutate(id, |record| {
            let Value::Object(mut merged) = serde_json::to_value(&*record).map_err(|e| e.to_string())? else {
                return Err("record did not serialize to an object".to_string());
            };
            for (key, value) in fields {
                if key == "created_at" || key == "updated_at" {
                    continue;
                }
                merged.insert(key, value);
            }
            let mut next: Record = serde_json::from_value(Value::Object(merged)).map_err(|e| e.to_string())?;
            next.created_at = record.created_at;
            next.updated_at = record.updated_at;
            *record = next;
            Ok(())
        });
        if result.is_some() {
            log::info!("[STATE] Updated participant {}: {:?}", id, keys);
        }
        result
    }

    /// Typed in-place update with the same contract as [`StateManager::update`].
    pub fn update_with<F>(&self, id: &str, f: F) -> Option<Record>
    where
        F: FnOnce(&mut Record),
    {
        self.mutate(id, |record| {
            f(record);
            Ok(())
        })
    }

    /// Snapshot of every participant record.
    pub fn list(&self) -> RecordMap {
        self.shared.records.lock().clone()
    }

    pub fn stats(&self) -> StateStats {
        let records = self.list();
        stats::compute_stats(&records, self.shared.catalog.len(), Utc::now())
    }

    pub fn summaries(&self) -> Vec<ParticipantSummary> {
        let records = self.list();
        stats::summarize(&records, self.shared.catalog.len())
    }

    /// Remove every participant.
    pub fn clear_all(&self) {
        let snapshot = {
            let mut records = self.shared.records.lock();
            records.clear();
            self.shared.persist(&records);
            records.clone()
        };
        log::info!("[STATE] Cleared all data");
        self.shared.notify(&snapshot);
    }

    /// Re-read the state file now. Returns true if the content changed.
    pub fn refresh(&self) -> bool {
        self.shared.reload_state()
    }

    /// Reconcile every record against the current catalog. Returns the number
    /// of records that changed.
    pub fn reconcile_all(&self) -> usize {
        self.shared.reconcile_all()
    }

    /// Re-read the catalog file, then reconcile every record against it.
    pub fn reload_catalog(&self) -> Result<usize, StateError> {
        let stands = self.shared.catalog.reload()?;
        self.shared.reconcile_all();
        Ok(stands)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RecordMap) -> Result<(), String> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.subscribers.lock().push((id, Arc::new(callback)));
        log::debug!("[STATE] Added subscriber {:?}", id);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        let removed = subscribers.len() != before;
        if removed {
            log::debug!("[STATE] Removed subscriber {:?}", id);
        }
        removed
    }

    /// Apply `f` to an existing record, then touch, persist and notify.
    fn mutate<F>(&self, id: &str, f: F) -> Option<Record>
    where
        F: FnOnce(&mut Record) -> Result<(), String>,
    {
        let (record, snapshot) = {
            let mut records = self.shared.records.lock();
            let Some(existing) = records.get_mut(id) else {
                log::warn!("[STATE] Tried to update non-existent participant {}", id);
                return None;
            };
            let mut candidate = existing.clone();
            if let Err(e) = f(&mut candidate) {
                log::warn!("[STATE] Rejected update for participant {}: {}", id, e);
                return None;
            }
            candidate.touch(Utc::now());
            *existing = candidate.clone();
            self.shared.persist(&records);
            (candidate, records.clone())
        };
        self.shared.notify(&snapshot);
        Some(record)
    }
}

impl Shared {
    fn persist(&self, records: &RecordMap) {
        match self.store.save(records) {
            Ok(SaveOutcome::Committed) => {}
            Ok(SaveOutcome::BackedUp(path)) => {
                log::warn!("[STATE] State only written to backup {}", path.display());
            }
            Err(e) => {
                log::error!("[STATE] State not persisted, keeping in-memory copy: {}", e);
            }
        }
    }

    fn notify(&self, snapshot: &RecordMap) {
        let subscribers: Vec<(SubscriptionId, Subscriber)> = self.subscribers.lock().clone();
        for (id, callback) in subscribers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("[STATE] Error notifying subscriber {:?}: {}", id, e),
                Err(_) => log::error!("[STATE] Subscriber {:?} panicked", id),
            }
        }
    }

    fn handle_change(&self, target: WatchTarget) {
        match target {
            WatchTarget::State => {
                self.reload_state();
            }
            WatchTarget::Catalog => {
                if let Err(e) = self.catalog.reload() {
                    log::error!("[CATALOG] Reload failed, keeping previous stands: {}", e);
                }
                self.reconcile_all();
            }
        }
    }

    /// Replace the in-memory map with the file's content, reconcile it, and
    /// notify if the result differs from what was held before. Our own last
    /// save is not a change.
    fn reload_state(&self) -> bool {
        let snapshot = {
            let mut records = self.records.lock();
            let Some(loaded) = self.store.load_external() else {
                return false;
            };
            let mut next = loaded.records;
            keep_local_touches(&records, &mut next);
            let synced = reconcile::reconcile_all(&mut next, &self.catalog.ids(), Utc::now());
            if loaded.upgraded || synced > 0 {
                self.persist(&next);
            }
            if next == *records {
                log::debug!("[STATE] Reloaded state unchanged");
                None
            } else {
                *records = next;
                Some(records.clone())
            }
        };
        match snapshot {
            Some(snapshot) => {
                log::info!("[STATE] Reloaded {} participants from disk", snapshot.len());
                self.notify(&snapshot);
                true
            }
            None => false,
        }
    }

    fn reconcile_all(&self) -> usize {
        let (changed, snapshot) = {
            let mut records = self.records.lock();
            let changed = reconcile::reconcile_all(&mut records, &self.catalog.ids(), Utc::now());
            if changed > 0 {
                self.persist(&records);
                (changed, Some(records.clone()))
            } else {
                (changed, None)
            }
        };
        if let Some(snapshot) = snapshot {
            self.notify(&snapshot);
        }
        changed
    }
}

/// `get` refreshes `updated_at` without saving, so the disk copy can be older
/// than ours. A reload never moves a record's `updated_at` backwards.
fn keep_local_touches(current: &RecordMap, next: &mut RecordMap) {
    for (id, incoming) in next.iter_mut() {
        if let Some(local) = current.get(id) {
            if local.updated_at > incoming.updated_at {
                incoming.updated_at = local.updated_at;
            }
        }
    }
}
