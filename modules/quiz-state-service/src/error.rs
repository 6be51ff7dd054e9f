//! Error type shared by the store, catalog and watcher.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum StateError {
    /// Reading, writing or renaming a file failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A document could not be encoded or decoded
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The filesystem watcher could not be set up
    Watch(notify::Error),
}

impl StateError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        StateError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Io { path, source } => write!(f, "I/O error on {}: {}", path.display(), source),
            StateError::Json { path, source } => {
                write!(f, "Invalid JSON in {}: {}", path.display(), source)
            }
            StateError::Watch(e) => write!(f, "File watcher error: {}", e),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Io { source, .. } => Some(source),
            StateError::Json { source, .. } => Some(source),
            StateError::Watch(e) => Some(e),
        }
    }
}

impl From<notify::Error> for StateError {
    fn from(e: notify::Error) -> Self {
        StateError::Watch(e)
    }
}
