//! In-memory snapshot of the stand catalog file.
//!
//! The catalog is owned by the admin side; this process only reads it. A
//! missing file is an empty catalog. A malformed file keeps the previous
//! snapshot so a half-edited catalog never wipes everyone's progress.

use crate::error::StateError;
use parking_lot::RwLock;
use quiz_state_types::Stand;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Catalog {
    path: Option<PathBuf>,
    stands: RwLock<Vec<Stand>>,
}

impl Catalog {
    /// Catalog backed by a JSON array file. Load errors are logged.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let catalog = Self {
            path: Some(path.into()),
            stands: RwLock::new(Vec::new()),
        };
        if let Err(e) = catalog.reload() {
            log::error!("[CATALOG] Initial load failed: {}", e);
        }
        catalog
    }

    /// Fixed catalog with no backing file.
    pub fn from_stands(stands: Vec<Stand>) -> Self {
        Self {
            path: None,
            stands: RwLock::new(stands),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the backing file. Returns the number of stands now loaded.
    pub fn reload(&self) -> Result<usize, StateError> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };
        let stands: Vec<Stand> = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| StateError::json(path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("[CATALOG] Stand file not found: {}", path.display());
                Vec::new()
            }
            Err(e) => return Err(StateError::io(path, e)),
        };
        let count = stands.len();
        *self.stands.write() = stands;
        log::info!("[CATALOG] Loaded {} stands from {}", count, path.display());
        Ok(count)
    }

    pub fn stands(&self) -> Vec<Stand> {
        self.stands.read().clone()
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.stands.read().iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.stands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stands.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Write a catalog file with bare stands for the given ids.
    pub(crate) fn write_catalog(path: &Path, ids: &[&str]) {
        let stands: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "title": format!("Stand {}", id),
                    "description": "",
                    "emoji": "🎯",
                    "color": "#3366ff",
                    "questions": [{"question": "Ping?", "answers": ["pong"], "hint": "table tennis"}]
                })
            })
            .collect();
        fs::write(path, serde_json::to_string_pretty(&stands).unwrap()).unwrap();
    }

    #[test]
    fn test_open_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stands.json");
        write_catalog(&path, &["a", "b", "c"]);

        let catalog = Catalog::open(&path);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.stands()[0].questions[0].answers, vec!["pong".to_string()]);

        write_catalog(&path, &["a", "b"]);
        assert_eq!(catalog.reload().unwrap(), 2);
        assert_eq!(catalog.ids(), ["a", "b"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn test_missing_file_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("absent.json"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_malformed_file_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stands.json");
        write_catalog(&path, &["a", "b"]);
        let catalog = Catalog::open(&path);

        fs::write(&path, "[{\"id\": ").unwrap();
        assert!(catalog.reload().is_err());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_fixed_catalog_reload_is_a_no_op() {
        let catalog = Catalog::from_stands(vec![Stand {
            id: "x".to_string(),
            title: "X".to_string(),
            description: String::new(),
            emoji: String::new(),
            color: String::new(),
            questions: vec![],
        }]);
        assert!(catalog.path().is_none());
        assert_eq!(catalog.reload().unwrap(), 1);
    }
}
