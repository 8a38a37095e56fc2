//! Sync state store: durable per-artifact [`SyncState`] records.
//!
//! [`JsonFileStateStore`] persists one JSON document per artifact at
//! `<root>/state/<artifact>-<hash>.json`, written with the same atomic
//! `.tmp` + rename pattern used for every other on-disk record. All records
//! are loaded eagerly on open; the in-memory cache answers reads.
//!
//! A record that is missing or cannot be parsed is treated as "never synced"
//! and skipped with a warning, never as an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use duplex_core::{fingerprint, ArtifactKey, SyncState};

use crate::error::{io_err, SyncError};

/// Key/value access to sync state. Implementations are blocking; async
/// callers go through `spawn_blocking`.
pub trait SyncStateStore: Send + Sync {
    fn get(&self, key: &ArtifactKey) -> Option<SyncState>;

    /// Store `state` for `key`.
    ///
    /// The in-memory view is updated before any I/O, so an `Io` error means
    /// the state is live but not durable.
    fn put(&self, key: &ArtifactKey, state: SyncState) -> Result<(), SyncError>;

    /// [`put`](Self::put), but only if the stored checksum still equals
    /// `expected` (`None` = no record yet). Fails with
    /// [`SyncError::StaleWrite`] and leaves the record untouched otherwise.
    fn compare_and_put(
        &self,
        key: &ArtifactKey,
        expected: Option<&str>,
        state: SyncState,
    ) -> Result<(), SyncError>;

    fn list(&self) -> Vec<(ArtifactKey, SyncState)>;

    /// (Re)load every persisted record. Returns the number loaded.
    fn load_all(&self) -> Result<usize, SyncError>;

    /// Write every cached record back to durable storage.
    fn persist_all(&self) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store used when no storage root is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<ArtifactKey, SyncState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStateStore for MemoryStateStore {
    fn get(&self, key: &ArtifactKey) -> Option<SyncState> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(key).cloned()
    }

    fn put(&self, key: &ArtifactKey, state: SyncState) -> Result<(), SyncError> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(key.clone(), state);
        Ok(())
    }

    fn compare_and_put(
        &self,
        key: &ArtifactKey,
        expected: Option<&str>,
        state: SyncState,
    ) -> Result<(), SyncError> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        check_expected(key, states.get(key), expected)?;
        states.insert(key.clone(), state);
        Ok(())
    }

    fn list(&self) -> Vec<(ArtifactKey, SyncState)> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        sorted_entries(&states)
    }

    fn load_all(&self) -> Result<usize, SyncError> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        Ok(states.len())
    }

    fn persist_all(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// On-disk payload: the state plus the key it belongs to, so records can be
/// bulk-loaded without decoding file names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub key: ArtifactKey,
    #[serde(flatten)]
    pub state: SyncState,
}

/// One JSON file per artifact under `<root>/state/`.
#[derive(Debug)]
pub struct JsonFileStateStore {
    root: PathBuf,
    cache: RwLock<HashMap<ArtifactKey, SyncState>>,
}

/// `<root>/state/`
pub fn state_dir_at(root: &Path) -> PathBuf {
    root.join("state")
}

/// `<root>/state/<sanitised key>-<12 hex of key digest>.json`
///
/// The digest suffix keeps keys that sanitise to the same stem apart.
pub fn record_path_at(root: &Path, key: &ArtifactKey) -> PathBuf {
    let stem: String = key
        .0
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = fingerprint::checksum(&key.0);
    state_dir_at(root).join(format!("{stem}-{}.json", &digest[..12]))
}

/// Load one record. `Ok(None)` if the file does not exist.
pub fn load_record_at(path: &Path) -> Result<Option<StateRecord>, SyncError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save one record atomically: `<path>.tmp` then rename.
pub fn save_record_at(root: &Path, record: &StateRecord) -> Result<(), SyncError> {
    let path = record_path_at(root, &record.key);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid state record path"),
        ));
    };

    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

impl JsonFileStateStore {
    /// Open the store rooted at `root`, creating `<root>/state/` and loading
    /// every readable record.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let store = Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        };
        let dir = state_dir_at(&store.root);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let loaded = store.load_all()?;
        tracing::debug!(root = %store.root.display(), loaded, "opened state store");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_through(&self, key: &ArtifactKey, state: &SyncState) -> Result<(), SyncError> {
        let record = StateRecord {
            key: key.clone(),
            state: state.clone(),
        };
        save_record_at(&self.root, &record)
    }
}

impl SyncStateStore for JsonFileStateStore {
    fn get(&self, key: &ArtifactKey) -> Option<SyncState> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(key).cloned()
    }

    fn put(&self, key: &ArtifactKey, state: SyncState) -> Result<(), SyncError> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(key.clone(), state.clone());
        self.write_through(key, &state)
    }

    fn compare_and_put(
        &self,
        key: &ArtifactKey,
        expected: Option<&str>,
        state: SyncState,
    ) -> Result<(), SyncError> {
        // Held across the file write so two writers to one key cannot
        // interleave between check and persist.
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        check_expected(key, cache.get(key), expected)?;
        cache.insert(key.clone(), state.clone());
        self.write_through(key, &state)
    }

    fn list(&self) -> Vec<(ArtifactKey, SyncState)> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        sorted_entries(&cache)
    }

    fn load_all(&self) -> Result<usize, SyncError> {
        let dir = state_dir_at(&self.root);
        let mut loaded = HashMap::new();
        if dir.exists() {
            let mut entries: Vec<_> = std::fs::read_dir(&dir)
                .map_err(|e| io_err(&dir, e))?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let path = entry.path();
                match load_record_at(&path) {
                    Ok(Some(record)) => {
                        loaded.insert(record.key, record.state);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "skipping unreadable state record; artifact treated as never synced",
                        );
                    }
                }
            }
        }

        let count = loaded.len();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = loaded;
        Ok(count)
    }

    fn persist_all(&self) -> Result<(), SyncError> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = cache.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(state) = cache.get(key) {
                self.write_through(key, state)?;
            }
        }
        Ok(())
    }
}

fn check_expected(
    key: &ArtifactKey,
    current: Option<&SyncState>,
    expected: Option<&str>,
) -> Result<(), SyncError> {
    let found = current.map(|s| s.last_sync_checksum.as_str());
    if found == expected {
        return Ok(());
    }
    Err(SyncError::StaleWrite {
        key: key.clone(),
        expected: expected.map(str::to_owned),
        found: found.map(str::to_owned),
    })
}

fn sorted_entries(map: &HashMap<ArtifactKey, SyncState>) -> Vec<(ArtifactKey, SyncState)> {
    let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use duplex_core::VectorClock;
    use tempfile::TempDir;

    fn state(checksum: &str, version: u64) -> SyncState {
        SyncState {
            last_sync_checksum: checksum.to_string(),
            last_sync_time: Utc::now(),
            version,
            vector_clock: VectorClock::new().increment("local"),
            base_content: Some("hello".to_string()),
            base_checksum: Some(checksum.to_string()),
        }
    }

    fn key() -> ArtifactKey {
        ArtifactKey::from("acme:requirements:REQ-1")
    }

    #[test]
    fn empty_store_when_root_is_new() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(tmp.path()).unwrap();
        assert!(store.list().is_empty());
        assert!(store.get(&key()).is_none());
    }

    #[test]
    fn put_is_durable_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(tmp.path()).unwrap();
        store.put(&key(), state("aaa", 1)).unwrap();

        let reopened = JsonFileStateStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.get(&key()), store.get(&key()));
        assert_eq!(reopened.get(&key()).unwrap().version, 1);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(tmp.path()).unwrap();
        store.put(&key(), state("aaa", 1)).unwrap();
        let tmp_path = record_path_at(tmp.path(), &key()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after rename");
    }

    #[test]
    fn record_path_is_sanitised_and_disambiguated() {
        let root = Path::new("/data");
        let a = record_path_at(root, &ArtifactKey::from("p:t:a/b"));
        let b = record_path_at(root, &ArtifactKey::from("p:t:a_b"));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("p_t_a_b-"), "got {name}");
        assert_ne!(a, b);
    }

    #[test]
    fn corrupt_record_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let dir = state_dir_at(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.json"), "{ not json").unwrap();

        let store = JsonFileStateStore::open(tmp.path()).unwrap();
        store.put(&key(), state("aaa", 1)).unwrap();
        assert_eq!(store.load_all().unwrap(), 1);
    }

    #[test]
    fn compare_and_put_rejects_stale_expectation() {
        let store = MemoryStateStore::new();
        store.compare_and_put(&key(), None, state("v1", 1)).unwrap();

        let err = store
            .compare_and_put(&key(), None, state("v2", 2))
            .expect_err("record already exists");
        assert!(matches!(err, SyncError::StaleWrite { .. }));
        assert_eq!(store.get(&key()).unwrap().last_sync_checksum, "v1");

        store
            .compare_and_put(&key(), Some("v1"), state("v2", 2))
            .unwrap();
        assert_eq!(store.get(&key()).unwrap().version, 2);
    }

    #[test]
    fn persist_all_rewrites_deleted_files() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(tmp.path()).unwrap();
        store.put(&key(), state("aaa", 3)).unwrap();
        std::fs::remove_file(record_path_at(tmp.path(), &key())).unwrap();

        store.persist_all().unwrap();
        let record = load_record_at(&record_path_at(tmp.path(), &key()))
            .unwrap()
            .expect("record rewritten");
        assert_eq!(record.state.version, 3);
    }

    #[test]
    fn record_file_uses_camel_case_layout() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStateStore::open(tmp.path()).unwrap();
        store.put(&key(), state("aaa", 1)).unwrap();

        let raw = std::fs::read_to_string(record_path_at(tmp.path(), &key())).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["key"], "acme:requirements:REQ-1");
        assert_eq!(json["lastSyncChecksum"], "aaa");
        assert_eq!(json["version"], 1);
        assert_eq!(json["baseContent"], "hello");
    }
}
