//! Persistent key-value storage.
//!
//! The engine persists a handful of small blobs (configuration, monitoring
//! flag, targets, notification gate, offline queue). The backing store is a
//! collaborator: [`KeyValueStore`] has an in-memory implementation for tests
//! and a single-JSON-file implementation for hosts without a native
//! preferences API. [`PreferenceStore`] layers typed accessors on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::gate::{NotificationRecord, OfflineQueueEntry};
use crate::types::{Target, TargetId};

// ============================================================================
// Error Types
// ============================================================================

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized.
    #[error("Failed to serialize value for '{key}': {source}")]
    Serialize {
        /// Key being written.
        key: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored value did not parse.
    #[error("Stored value for '{key}' is corrupt: {message}")]
    Corrupt {
        /// Key being read.
        key: String,
        /// Parser message.
        message: String,
    },

    /// No platform data directory could be determined.
    #[error("Cannot determine data directory")]
    NoDataDir,
}

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Backends
// ============================================================================

/// Arbitrary get/set of small string blobs.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Backend-specific read failures.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, durably when the backend supports it.
    ///
    /// # Errors
    ///
    /// Backend-specific write failures.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Backend-specific write failures.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// All values in one pretty-printed JSON object on disk.
///
/// Every mutation rewrites the file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
                key: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "Preference file opened");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Backing file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> StorageResult<()> {
        let io_err = |source| StorageError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content =
            serde_json::to_string_pretty(values).map_err(|source| StorageError::Serialize {
                key: self.path.display().to_string(),
                source,
            })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

/// Get the default data directory.
///
/// On Linux: `/var/lib/beacon/`
/// Elsewhere: the platform data dir (e.g. `~/Library/Application Support/beacon/`)
///
/// # Errors
///
/// Returns [`StorageError::NoDataDir`] when no home directory is known.
pub fn default_data_dir() -> StorageResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/beacon"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs =
            directories::ProjectDirs::from("", "", "beacon").ok_or(StorageError::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Get the default preference file path inside `data_dir`.
#[must_use]
pub fn preferences_path(data_dir: &Path) -> PathBuf {
    data_dir.join("preferences.json")
}

// ============================================================================
// Typed preferences
// ============================================================================

const KEY_CONFIG: &str = "sdk_config";
const KEY_MONITORING_ENABLED: &str = "monitoring_enabled";
const KEY_TARGETS: &str = "target_beacons";
const KEY_NOTIFICATIONS: &str = "notification_gate";
const KEY_OFFLINE_QUEUE: &str = "offline_queue";
const KEY_INSTALL_ID: &str = "install_id";

/// Typed accessors over a [`KeyValueStore`].
#[derive(Clone)]
pub struct PreferenceStore {
    backend: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore").finish_non_exhaustive()
    }
}

impl PreferenceStore {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// A store backed by [`MemoryStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.backend.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.backend.set(key, &raw)
    }

    // --- Config ---

    /// Persist the last applied configuration.
    ///
    /// # Errors
    ///
    /// Backend or serialization failures.
    pub fn save_config(&self, config: &EngineConfig) -> StorageResult<()> {
        self.put_json(KEY_CONFIG, config)
    }

    /// The last applied configuration, if any.
    ///
    /// # Errors
    ///
    /// [`StorageError::Corrupt`] when the stored blob does not parse.
    pub fn load_config(&self) -> StorageResult<Option<EngineConfig>> {
        self.get_json(KEY_CONFIG)
    }

    // --- Monitoring flag ---

    /// Record whether monitoring should resume after restart.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn set_monitoring_enabled(&self, enabled: bool) -> StorageResult<()> {
        self.put_json(KEY_MONITORING_ENABLED, &enabled)
    }

    /// Whether monitoring was active when last persisted. Defaults to `false`.
    pub fn is_monitoring_enabled(&self) -> bool {
        match self.get_json::<bool>(KEY_MONITORING_ENABLED) {
            Ok(flag) => flag.unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Monitoring flag unreadable, assuming disabled");
                false
            }
        }
    }

    // --- Targets ---

    /// Replace the persisted target map.
    ///
    /// # Errors
    ///
    /// Backend or serialization failures.
    pub fn save_targets(&self, targets: &BTreeMap<TargetId, String>) -> StorageResult<()> {
        let list: Vec<Target> = targets
            .iter()
            .map(|(id, name)| Target {
                id: id.clone(),
                name: name.clone(),
            })
            .collect();
        self.put_json(KEY_TARGETS, &list)
    }

    /// The persisted target map (empty when none).
    ///
    /// # Errors
    ///
    /// [`StorageError::Corrupt`] when the stored list does not parse.
    pub fn load_targets(&self) -> StorageResult<BTreeMap<TargetId, String>> {
        let list: Vec<Target> = self.get_json(KEY_TARGETS)?.unwrap_or_default();
        Ok(list.into_iter().map(|t| (t.id, t.name)).collect())
    }

    /// Forget the persisted target map.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn clear_targets(&self) -> StorageResult<()> {
        self.backend.remove(KEY_TARGETS)
    }

    // --- Notification gate ---

    /// Persist every per-target notification record.
    ///
    /// # Errors
    ///
    /// Backend or serialization failures.
    pub fn save_notifications(
        &self,
        records: &BTreeMap<TargetId, NotificationRecord>,
    ) -> StorageResult<()> {
        self.put_json(KEY_NOTIFICATIONS, records)
    }

    /// Per-target notification records (empty when none).
    ///
    /// # Errors
    ///
    /// [`StorageError::Corrupt`] when the stored map does not parse.
    pub fn load_notifications(&self) -> StorageResult<BTreeMap<TargetId, NotificationRecord>> {
        Ok(self.get_json(KEY_NOTIFICATIONS)?.unwrap_or_default())
    }

    // --- Offline queue ---

    /// Persist the offline queue.
    ///
    /// # Errors
    ///
    /// Backend or serialization failures.
    pub fn save_offline_queue(&self, queue: &[OfflineQueueEntry]) -> StorageResult<()> {
        self.put_json(KEY_OFFLINE_QUEUE, queue)
    }

    /// The persisted offline queue (empty when none).
    ///
    /// # Errors
    ///
    /// [`StorageError::Corrupt`] when the stored queue does not parse.
    pub fn load_offline_queue(&self) -> StorageResult<Vec<OfflineQueueEntry>> {
        Ok(self.get_json(KEY_OFFLINE_QUEUE)?.unwrap_or_default())
    }

    // --- Install id ---

    /// A stable per-install identifier, created on first use.
    ///
    /// # Errors
    ///
    /// Backend failures while persisting a newly created id.
    pub fn install_id(&self) -> StorageResult<String> {
        if let Some(id) = self.backend.get(KEY_INSTALL_ID)? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.backend.set(KEY_INSTALL_ID, &id)?;
        debug!(install_id = %id, "Install id created");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = preferences_path(dir.path());

        let store = FileStore::open(&path).unwrap();
        store.set("monitoring_enabled", "true").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("monitoring_enabled").unwrap().as_deref(),
            Some("true")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = preferences_path(dir.path());
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_targets_round_trip_normalized() {
        let prefs = PreferenceStore::in_memory();
        let mut targets = BTreeMap::new();
        targets.insert(TargetId::new("aa:bb"), "Lobby".to_string());
        prefs.save_targets(&targets).unwrap();

        let loaded = prefs.load_targets().unwrap();
        assert_eq!(loaded.get(&TargetId::new("AA:BB")).map(String::as_str), Some("Lobby"));

        prefs.clear_targets().unwrap();
        assert!(prefs.load_targets().unwrap().is_empty());
    }

    #[test]
    fn test_monitoring_flag_defaults_false() {
        let prefs = PreferenceStore::in_memory();
        assert!(!prefs.is_monitoring_enabled());
        prefs.set_monitoring_enabled(true).unwrap();
        assert!(prefs.is_monitoring_enabled());
    }

    #[test]
    fn test_config_round_trip() {
        let prefs = PreferenceStore::in_memory();
        assert!(prefs.load_config().unwrap().is_none());
        let config = EngineConfig::new("http://gw.local/api", "http://gw.local/data", "u1");
        prefs.save_config(&config).unwrap();
        assert_eq!(prefs.load_config().unwrap(), Some(config));
    }

    #[test]
    fn test_corrupt_blob_is_reported() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(KEY_TARGETS, "{oops").unwrap();
        let prefs = PreferenceStore::new(backend);
        assert!(matches!(
            prefs.load_targets(),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_install_id_is_stable() {
        let prefs = PreferenceStore::in_memory();
        let first = prefs.install_id().unwrap();
        assert_eq!(prefs.install_id().unwrap(), first);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }
}
