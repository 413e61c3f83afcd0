use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::entity::EntityState;
use crate::storage::{read_json, write_json, StorageError};

/// A state persisted by a previous run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub state: Value,
    /// Seconds since the Unix epoch
    pub last_updated: u64,
}

/// Lookup of prior entity state keyed by unique id
pub trait RestoreStateStore: Send + Sync {
    fn last_state(&self, unique_id: &str) -> Option<StoredState>;
}

/// Restore store kept in memory and saved to a JSON file between runs
#[derive(Debug, Default)]
pub struct JsonRestoreStore {
    states: RwLock<HashMap<String, StoredState>>,
    /// Set when a state was recorded after the last save
    dirty: AtomicBool,
}

impl JsonRestoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the store from `path`; a missing file yields an empty store
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let states: HashMap<String, StoredState> = read_json(path)?.unwrap_or_default();
        debug!(count = states.len(), path = %path.display(), "Loaded restore state");
        Ok(Self {
            states: RwLock::new(states),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        self.dirty.store(false, Ordering::Relaxed);
        write_json(path, &*states).inspect_err(|_| self.dirty.store(true, Ordering::Relaxed))
    }

    /// Saves to `path` every `period` while there are unsaved states, so a crash
    /// loses at most one period of history
    pub fn spawn_autosave(self: Arc<Self>, path: PathBuf, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !self.dirty.load(Ordering::Relaxed) {
                    continue;
                }
                match self.save(&path) {
                    Ok(()) => debug!(path = %path.display(), "Saved restore state"),
                    Err(e) => warn!("Failed to save restore state: {e}"),
                }
            }
        })
    }

    /// Remembers the latest state of an entity. Unavailable states are skipped so
    /// the last real value survives an outage.
    pub fn record(&self, state: &EntityState) {
        if !state.is_available() {
            return;
        }
        let last_updated = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                state.unique_id.clone(),
                StoredState {
                    state: state.state.clone(),
                    last_updated,
                },
            );
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RestoreStateStore for JsonRestoreStore {
    fn last_state(&self, unique_id: &str) -> Option<StoredState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(unique_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn entity_state(unique_id: &str, state: Value) -> EntityState {
        EntityState {
            unique_id: unique_id.to_string(),
            name: "Leak Sensor".to_string(),
            state,
            attributes: Map::new(),
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let store = JsonRestoreStore::new();
        store.record(&entity_state("Leak_uuid", json!("on")));

        assert_eq!(store.last_state("Leak_uuid").unwrap().state, json!("on"));
        assert!(store.last_state("EmptyPipe_uuid").is_none());
    }

    #[test]
    fn test_unavailable_does_not_overwrite() {
        let store = JsonRestoreStore::new();
        store.record(&entity_state("Leak_uuid", json!("off")));
        store.record(&entity_state("Leak_uuid", json!("unavailable")));

        assert_eq!(store.last_state("Leak_uuid").unwrap().state, json!("off"));
    }

    #[test]
    fn test_save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore_state.json");

        let store = JsonRestoreStore::load(&path).unwrap();
        assert!(store.is_empty());
        store.record(&entity_state("Leak_uuid", json!("on")));
        store.record(&entity_state("uuid", json!(1234.5)));
        store.save(&path).unwrap();

        let reloaded = JsonRestoreStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.last_state("uuid").unwrap().state, json!(1234.5));
    }

    #[tokio::test]
    async fn test_autosave_writes_recorded_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore_state.json");
        let store = Arc::new(JsonRestoreStore::new());
        let handle = store
            .clone()
            .spawn_autosave(path.clone(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Nothing recorded, nothing written
        assert!(!path.exists());

        store.record(&entity_state("Leak_uuid", json!("on")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let reloaded = JsonRestoreStore::load(&path).unwrap();
        assert_eq!(reloaded.last_state("Leak_uuid").unwrap().state, json!("on"));
    }
}
