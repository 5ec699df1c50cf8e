// src/storage.rs - Durable state boundary
//
// The engine decides what must survive a restart (profiles, the current
// selection, a tail of the alarm history). Where it goes is up to a
// `PersistenceBackend`.

use crate::error::{BosunError, Result};
use crate::history::AlarmHistoryEntry;
use crate::profiles::ConfigurationProfile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bumped whenever the persisted layout changes incompatibly
pub const SCHEMA_VERSION: u32 = 1;

/// Raw text storage for the engine state document
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Stored document, `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<String>>;

    /// Replace the stored document
    async fn save(&self, text: &str) -> Result<()>;
}

/// JSON file on local disk, replaced atomically
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BosunError::Persistence(format!("read {}: {}", self.path.display(), e))),
        }
    }

    async fn save(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved {} bytes to {}", text.len(), self.path.display());
        Ok(())
    }
}

/// In-process backend for tests and ephemeral installs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(text: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(text.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.contents.lock().clone())
    }

    async fn save(&self, text: &str) -> Result<()> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}

/// Document written by `save_state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub current_profile_id: String,
    pub profiles: Vec<ConfigurationProfile>,
    #[serde(default)]
    pub alarm_history: Vec<AlarmHistoryEntry>,
}

/// Profile-only view used when the history layout is not trusted
#[derive(Debug, Deserialize)]
struct ProfilesOnly {
    current_profile_id: String,
    profiles: Vec<ConfigurationProfile>,
}

/// What could be recovered from a stored document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoredState {
    pub current_profile_id: Option<String>,
    pub profiles: Vec<ConfigurationProfile>,
    pub alarm_history: Vec<AlarmHistoryEntry>,
    /// History was discarded because of a version mismatch or corruption
    pub history_reset: bool,
}

impl PersistedState {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Recover as much as possible from `text`
    ///
    /// Unreadable text yields defaults. A different schema version keeps the
    /// profiles when they still parse and starts the history from scratch.
    pub fn decode(text: &str) -> RestoredState {
        let doc: serde_json::Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Persisted state unreadable, starting from defaults: {}", e);
                return RestoredState {
                    history_reset: true,
                    ..Default::default()
                };
            }
        };

        let version = doc.get("schema_version").and_then(|v| v.as_u64());
        if version == Some(u64::from(SCHEMA_VERSION)) {
            match serde_json::from_value::<PersistedState>(doc.clone()) {
                Ok(state) => {
                    info!(
                        "Loaded state from {}: {} profiles, {} history entries",
                        state.saved_at,
                        state.profiles.len(),
                        state.alarm_history.len()
                    );
                    return RestoredState {
                        current_profile_id: Some(state.current_profile_id),
                        profiles: state.profiles,
                        alarm_history: state.alarm_history,
                        history_reset: false,
                    };
                }
                Err(e) => warn!("Persisted state is damaged, recovering profiles only: {}", e),
            }
        } else {
            warn!(
                "Persisted schema version {:?} differs from {}, resetting history",
                version, SCHEMA_VERSION
            );
        }

        match serde_json::from_value::<ProfilesOnly>(doc) {
            Ok(partial) => RestoredState {
                current_profile_id: Some(partial.current_profile_id),
                profiles: partial.profiles,
                alarm_history: Vec::new(),
                history_reset: true,
            },
            Err(e) => {
                warn!("Persisted profiles unreadable, starting from defaults: {}", e);
                RestoredState {
                    history_reset: true,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::profiles::ProfileStore;
    use crate::thresholds::ThresholdRegistry;
    use std::sync::Arc;

    fn state() -> PersistedState {
        let store = ProfileStore::new(ThresholdRegistry::default(), Arc::new(SystemClock));
        store.create_profile("Passage", "", None).unwrap();
        PersistedState {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            current_profile_id: store.current_id(),
            profiles: store.list(),
            alarm_history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("state.json"));
        assert_eq!(backend.load().await.unwrap(), None);

        backend.save("{\"a\":1}").await.unwrap();
        assert_eq!(backend.load().await.unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_decode_current_version() {
        let original = state();
        let restored = PersistedState::decode(&original.encode().unwrap());
        assert!(!restored.history_reset);
        assert_eq!(restored.profiles.len(), 2);
        assert_eq!(restored.current_profile_id.as_deref(), Some("default"));
    }

    #[test]
    fn test_version_mismatch_keeps_profiles_resets_history() {
        let mut doc = serde_json::to_value(state()).unwrap();
        doc["schema_version"] = serde_json::json!(0);
        doc["alarm_history"] = serde_json::json!([{"garbage": true}]);
        let restored = PersistedState::decode(&doc.to_string());
        assert!(restored.history_reset);
        assert!(restored.alarm_history.is_empty());
        assert_eq!(restored.profiles.len(), 2);
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let restored = PersistedState::decode("\u{0}not json");
        assert!(restored.profiles.is_empty());
        assert!(restored.current_profile_id.is_none());
    }
}
