//! Filesystem change notifier for the state and catalog files.
//!
//! Each file's parent directory is watched non-recursively and events are
//! filtered down to the exact file names. Bursts are coalesced per target
//! with a trailing-edge debounce: the first event opens a window, later events
//! inside it are absorbed, and one callback fires when the window closes.

use crate::error::StateError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on a single idle wait; the loop wakes at least this often.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchTarget {
    State,
    Catalog,
}

// =====================================================
// Debounce
// =====================================================

pub struct Debouncer {
    window: Duration,
    pending: HashMap<WatchTarget, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Note an event. Returns true if it opened a new window.
    pub fn record(&mut self, target: WatchTarget, now: Instant) -> bool {
        if self.pending.contains_key(&target) {
            return false;
        }
        self.pending.insert(target, now + self.window);
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Targets whose window has closed, in a stable order.
    pub fn take_due(&mut self, now: Instant) -> Vec<WatchTarget> {
        let mut due: Vec<WatchTarget> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(target, _)| *target)
            .collect();
        due.sort();
        for target in &due {
            self.pending.remove(target);
        }
        due
    }
}

// =====================================================
// Event filter
// =====================================================

struct WatchedFile {
    dir: PathBuf,
    name: OsString,
    target: WatchTarget,
}

#[derive(Default)]
pub struct EventFilter {
    files: Vec<WatchedFile>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &Path, target: WatchTarget) {
        let Some(name) = path.file_name() else {
            log::warn!("[WATCH] Cannot watch {}: no file name", path.display());
            return;
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.files.push(WatchedFile {
            dir: dir.canonicalize().unwrap_or(dir),
            name: name.to_os_string(),
            target,
        });
    }

    pub fn dirs(&self) -> BTreeSet<PathBuf> {
        self.files.iter().map(|f| f.dir.clone()).collect()
    }

    /// Targets touched by a create or modify event.
    pub fn matches(&self, event: &Event) -> Vec<WatchTarget> {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for path in &event.paths {
            let (Some(name), Some(parent)) = (path.file_name(), path.parent()) else {
                continue;
            };
            for file in &self.files {
                if file.name.as_os_str() == name && same_dir(parent, &file.dir) && !hits.contains(&file.target) {
                    hits.push(file.target);
                }
            }
        }
        hits
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    a == b || a.canonicalize().map(|c| c == b).unwrap_or(false)
}

// =====================================================
// Watcher thread
// =====================================================

enum WatchMsg {
    Fs(notify::Result<Event>),
    Stop,
}

pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    tx: mpsc::Sender<WatchMsg>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start watching. `on_change` runs on the watcher thread once per
    /// debounced burst.
    pub fn start<F>(filter: EventFilter, debounce: Duration, on_change: F) -> Result<Self, StateError>
    where
        F: FnMut(WatchTarget) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let fs_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = fs_tx.send(WatchMsg::Fs(res));
        })?;

        let mut watched = 0;
        for dir in filter.dirs() {
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    log::info!("[WATCH] Started file monitoring for {}", dir.display());
                    watched += 1;
                }
                Err(e) => log::warn!("[WATCH] Cannot watch {}: {}", dir.display(), e),
            }
        }
        if watched == 0 {
            return Err(StateError::Watch(notify::Error::generic("no watchable directories")));
        }

        let thread = std::thread::Builder::new()
            .name("quiz-state-watch".to_string())
            .spawn(move || run_loop(rx, filter, Debouncer::new(debounce), on_change))
            .map_err(|e| StateError::io(Path::new("quiz-state-watch"), e))?;

        Ok(Self {
            _watcher: watcher,
            tx,
            thread: Some(thread),
        })
    }

    /// Stop the loop and join its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(WatchMsg::Stop);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[WATCH] Watcher thread panicked");
            }
            log::info!("[WATCH] Stopped file monitoring");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<F: FnMut(WatchTarget)>(
    rx: mpsc::Receiver<WatchMsg>,
    filter: EventFilter,
    mut debouncer: Debouncer,
    mut on_change: F,
) {
    loop {
        let wait = debouncer
            .next_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(wait) {
            Ok(WatchMsg::Fs(Ok(event))) => {
                let now = Instant::now();
                for target in filter.matches(&event) {
                    if debouncer.record(target, now) {
                        log::debug!("[WATCH] {:?} changed, waiting for writes to settle", target);
                    }
                }
            }
            Ok(WatchMsg::Fs(Err(e))) => log::warn!("[WATCH] Watch error: {}", e),
            Ok(WatchMsg::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        for target in debouncer.take_due(Instant::now()) {
            log::info!("[WATCH] {:?} file changed, reloading", target);
            on_change(target);
        }
    }
}
