//! Durable whole-file JSON store.
//!
//! Saves go to a uniquely named temp file next to the target and are then
//! renamed over it, so a reader in another process only ever sees a complete
//! snapshot. A failed save is retried as a timestamped backup file.

use crate::error::StateError;
use crate::migrate::{self, Decoded};
use chrono::Utc;
use parking_lot::Mutex;
use quiz_state_types::RecordMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Committed,
    /// The primary write failed; the snapshot went to this backup file instead
    BackedUp(PathBuf),
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub records: RecordMap,
    pub existed: bool,
    /// The file was rewritten in an older schema and should be saved back
    pub upgraded: bool,
}

enum RawFile {
    Missing,
    /// Exists but could not be read; already logged
    Unreadable,
    Text(String),
}

pub struct FileStore {
    path: PathBuf,
    backup_dir: PathBuf,
    settle_delay: Duration,
    /// Exact text of this store's most recent committed save
    last_committed: Mutex<Option<String>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, settle_delay: Duration) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
            settle_delay,
            last_committed: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file. A missing file is an empty store; an unreadable or
    /// corrupt one is logged and also treated as empty.
    pub fn load(&self) -> LoadOutcome {
        match self.read_raw() {
            RawFile::Text(text) => self.decode(&text),
            RawFile::Unreadable => LoadOutcome {
                existed: true,
                ..LoadOutcome::default()
            },
            RawFile::Missing => LoadOutcome::default(),
        }
    }

    /// Like [`FileStore::load`], but returns `None` when the file still holds
    /// exactly what this store last committed, i.e. nobody else has written.
    pub fn load_external(&self) -> Option<LoadOutcome> {
        match self.read_raw() {
            RawFile::Text(text) => {
                if self.last_committed.lock().as_deref() == Some(text.as_str()) {
                    log::debug!("[STATE] {} unchanged since our last save", self.path.display());
                    return None;
                }
                Some(self.decode(&text))
            }
            RawFile::Unreadable => Some(LoadOutcome {
                existed: true,
                ..LoadOutcome::default()
            }),
            RawFile::Missing => Some(LoadOutcome::default()),
        }
    }

    fn read_raw(&self) -> RawFile {
        match fs::read_to_string(&self.path) {
            Ok(text) => RawFile::Text(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("[STATE] No state file at {}, starting empty", self.path.display());
                RawFile::Missing
            }
            Err(e) => {
                log::error!("[STATE] {}", StateError::io(&self.path, e));
                RawFile::Unreadable
            }
        }
    }

    fn decode(&self, text: &str) -> LoadOutcome {
        let decoded = serde_json::from_str(text)
            .map_err(|e| StateError::json(&self.path, e).to_string())
            .and_then(|doc| migrate::decode_document(doc, Utc::now()));

        match decoded {
            Ok(Decoded {
                records,
                upgraded,
                dropped,
            }) => {
                if dropped > 0 {
                    log::warn!("[STATE] Dropped {} undecodable records from {}", dropped, self.path.display());
                }
                log::debug!("[STATE] Loaded {} records from {}", records.len(), self.path.display());
                LoadOutcome {
                    records,
                    existed: true,
                    upgraded,
                }
            }
            Err(e) => {
                log::error!("[STATE] Corrupted state file, starting fresh: {}", e);
                LoadOutcome {
                    existed: true,
                    ..LoadOutcome::default()
                }
            }
        }
    }

    /// Persist the full mapping. Falls back to a backup file if the primary
    /// write fails; errors only when both fail.
    pub fn save(&self, records: &RecordMap) -> Result<SaveOutcome, StateError> {
        let primary = migrate::encode_document(records)
            .map_err(|e| StateError::json(&self.path, e))
            .and_then(|text| {
                let tmp = self.write_text(&text)?;
                self.commit(&tmp)?;
                Ok(text)
            });
        match primary {
            Ok(text) => {
                *self.last_committed.lock() = Some(text);
                log::debug!("[STATE] Saved {} records to {}", records.len(), self.path.display());
                if !self.settle_delay.is_zero() {
                    std::thread::sleep(self.settle_delay);
                }
                Ok(SaveOutcome::Committed)
            }
            Err(e) => {
                log::error!("[STATE] Error saving state: {}", e);
                match self.write_backup(records) {
                    Ok(backup) => {
                        log::warn!("[STATE] Saved backup to {}", backup.display());
                        Ok(SaveOutcome::BackedUp(backup))
                    }
                    Err(backup_err) => {
                        log::error!("[STATE] Failed to save backup! {}", backup_err);
                        Err(e)
                    }
                }
            }
        }
    }

    /// First half of a save: write and sync the snapshot to a fresh temp file
    /// beside the target. The target itself is not touched.
    pub fn write_temp(&self, records: &RecordMap) -> Result<PathBuf, StateError> {
        let text = migrate::encode_document(records).map_err(|e| StateError::json(&self.path, e))?;
        self.write_text(&text)
    }

    fn write_text(&self, text: &str) -> Result<PathBuf, StateError> {
        let dir = self.ensure_parent()?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let written = fs::File::create(&tmp).and_then(|mut f| {
            f.write_all(text.as_bytes())?;
            f.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StateError::io(&tmp, e));
        }
        Ok(tmp)
    }

    /// Second half of a save: atomically replace the target with `tmp`.
    pub fn commit(&self, tmp: &Path) -> Result<(), StateError> {
        fs::rename(tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(tmp);
            StateError::io(&self.path, e)
        })
    }

    fn write_backup(&self, records: &RecordMap) -> Result<PathBuf, StateError> {
        let text = migrate::encode_document(records).map_err(|e| StateError::json(&self.path, e))?;
        fs::create_dir_all(&self.backup_dir).map_err(|e| StateError::io(&self.backup_dir, e))?;
        let backup = self
            .backup_dir
            .join(format!("state_backup_{}.json", Utc::now().timestamp()));
        fs::write(&backup, text).map_err(|e| StateError::io(&backup, e))?;
        Ok(backup)
    }

    fn ensure_parent(&self) -> Result<PathBuf, StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| StateError::io(&dir, e))?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_state_types::{PendingQuestion, Record};
    use serde_json::json;

    fn sample_records() -> RecordMap {
        let ids = vec!["a".to_string(), "b".to_string()];
        let mut first = Record::new(&ids, Utc::now());
        first.full_name = Some("Ирина Петрова".to_string());
        first.stand_status.get_mut("a").unwrap().done = true;
        first.pending_question = Some(PendingQuestion {
            stand_id: "b".to_string(),
            question_text: "2 + 2?".to_string(),
            accepted_answers: vec!["4".to_string(), "four".to_string()],
            hint: "even".to_string(),
            extra: [("stand_title".to_string(), json!("Arithmetic"))].into_iter().collect(),
        });
        first.extra.insert("menu_message_id".to_string(), json!(314));

        let mut records = RecordMap::new();
        records.insert("42".to_string(), first);
        records.insert("43".to_string(), Record::new(&ids, Utc::now()));
        records
    }

    #[test]
    fn test_save_then_fresh_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/state.json");
        let store = FileStore::new(&path, dir.path().join("backup"), Duration::ZERO);

        let records = sample_records();
        assert_eq!(store.save(&records).unwrap(), SaveOutcome::Committed);

        let reopened = FileStore::new(&path, dir.path().join("backup"), Duration::ZERO);
        let loaded = reopened.load();
        assert!(loaded.existed);
        assert!(!loaded.upgraded);
        assert_eq!(loaded.records, records);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"), dir.path(), Duration::ZERO);
        let loaded = store.load();
        assert!(!loaded.existed);
        assert!(loaded.records.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{\"42\": {\"full_name\": ").unwrap();

        let store = FileStore::new(&path, dir.path(), Duration::ZERO);
        let loaded = store.load();
        assert!(loaded.existed);
        assert!(loaded.records.is_empty());
    }

    #[test]
    fn test_crash_before_rename_leaves_target_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::new(&path, dir.path(), Duration::ZERO);

        let original = sample_records();
        store.save(&original).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let tmp = store.write_temp(&RecordMap::new()).unwrap();
        assert!(tmp.exists());
        assert_eq!(tmp.parent(), path.parent());

        // Rename never happens: the target must be byte-for-byte unchanged.
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(store.load().records, original);

        store.commit(&tmp).unwrap();
        assert!(!tmp.exists());
        assert!(store.load().records.is_empty());
    }

    #[test]
    fn test_output_is_indented_with_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::new(&path, dir.path(), Duration::ZERO);
        store.save(&sample_records()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"42\": {"));
        assert!(text.contains("Ирина Петрова"));
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["meta"]["schema_version"], json!(migrate::SCHEMA_VERSION));
    }

    #[test]
    fn test_unwritable_target_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file, so the primary write cannot succeed.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let backup_dir = dir.path().join("backup");
        let store = FileStore::new(blocker.join("state.json"), &backup_dir, Duration::ZERO);

        let records = sample_records();
        match store.save(&records).unwrap() {
            SaveOutcome::BackedUp(backup) => {
                assert!(backup.starts_with(&backup_dir));
                let restored = FileStore::new(&backup, dir.path(), Duration::ZERO).load();
                assert_eq!(restored.records, records);
            }
            other => panic!("expected backup, got {:?}", other),
        }
    }

    #[test]
    fn test_load_external_skips_own_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::new(&path, dir.path(), Duration::ZERO);
        let records = sample_records();
        store.save(&records).unwrap();
        assert!(store.load_external().is_none());

        let sibling = FileStore::new(&path, dir.path(), Duration::ZERO);
        sibling.save(&RecordMap::new()).unwrap();
        let outside = store.load_external().unwrap();
        assert!(outside.records.is_empty());
        assert!(sibling.load_external().is_none());
    }

    #[test]
    fn test_both_writes_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = FileStore::new(blocker.join("state.json"), blocker.join("backup"), Duration::ZERO);
        assert!(store.save(&sample_records()).is_err());
    }
}
