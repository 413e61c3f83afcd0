use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config_flow::UserInput;
use crate::constants::DOMAIN;
use crate::storage::{read_json, write_json, StorageError};

/// A persisted, validated account configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub version: u32,
    pub domain: String,
    pub title: String,
    pub unique_id: Option<String>,
    pub data: UserInput,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, unique_id: Option<String>, data: UserInput) -> Self {
        Self {
            entry_id: Uuid::new_v4().simple().to_string(),
            version: crate::config_flow::VERSION,
            domain: DOMAIN.to_string(),
            title: title.into(),
            unique_id,
            data,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigEntries {
    entries: Vec<ConfigEntry>,
}

impl ConfigEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let entries: Self = read_json(path)?.unwrap_or_default();
        debug!(count = entries.entries.len(), path = %path.display(), "Loaded config entries");
        Ok(entries)
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json(path, self)
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get_by_unique_id(&self, unique_id: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .find(|entry| entry.domain == DOMAIN && entry.unique_id.as_deref() == Some(unique_id))
    }

    pub fn unique_id_configured(&self, unique_id: &str) -> bool {
        self.get_by_unique_id(unique_id).is_some()
    }

    pub fn add(&mut self, entry: ConfigEntry) -> &ConfigEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(username: &str) -> UserInput {
        UserInput {
            domain: "com".to_string(),
            username: username.to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_unique_id_lookup() {
        let mut entries = ConfigEntries::new();
        entries.add(ConfigEntry::new("alice", Some("alice".to_string()), input("alice")));

        assert!(entries.unique_id_configured("alice"));
        assert!(!entries.unique_id_configured("bob"));
        assert_eq!(entries.get_by_unique_id("alice").unwrap().version, 1);
    }

    #[test]
    fn test_entry_ids_are_unique() {
        let first = ConfigEntry::new("a", None, input("a"));
        let second = ConfigEntry::new("a", None, input("a"));
        assert_ne!(first.entry_id, second.entry_id);
    }

    #[test]
    fn test_persisted_entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config_entries.json");
        let mut entries = ConfigEntries::load(&path).unwrap();
        let created = entries
            .add(ConfigEntry::new("alice", Some("alice".to_string()), input("alice")))
            .clone();
        entries.save(&path).unwrap();

        let reloaded = ConfigEntries::load(&path).unwrap();
        assert_eq!(reloaded.entries(), &[created]);
    }
}
