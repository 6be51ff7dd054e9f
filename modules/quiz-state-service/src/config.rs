use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub state_path: PathBuf,
    pub catalog_path: PathBuf,
    pub sync_port: u16,
    pub peer_url: String,
    /// Pause after each committed save so watchers see the rename
    pub settle_delay: Duration,
    pub debounce: Duration,
    pub backup_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("data/state.json"),
            catalog_path: PathBuf::from("data/stands.json"),
            sync_port: 8765,
            peer_url: "http://127.0.0.1:8765".to_string(),
            settle_delay: Duration::from_millis(50),
            debounce: Duration::from_millis(500),
            backup_dir: env::temp_dir(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            state_path: env::var("QUIZ_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            catalog_path: env::var("QUIZ_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            sync_port: parsed("QUIZ_SYNC_PORT").unwrap_or(defaults.sync_port),
            peer_url: env::var("QUIZ_SYNC_PEER_URL").unwrap_or(defaults.peer_url),
            settle_delay: parsed("QUIZ_STATE_SETTLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            debounce: parsed("QUIZ_WATCH_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            backup_dir: env::var("QUIZ_STATE_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            request_timeout: parsed("QUIZ_SYNC_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    /// Config rooted in one directory, used by tests and tools.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            state_path: dir.join("state.json"),
            catalog_path: dir.join("stands.json"),
            backup_dir: dir.join("backup"),
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[CONFIG] Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}
