//! Config Entry Store
//!
//! Persists one entry per paired device as JSON in the data directory.
//! Entries are keyed by a generated entry id; the device's unique id is
//! kept unique across the store.

use anyhow::{Context, Result};
use atv_remote_protocol::{ConfiguredDevices, DeviceRecord, ProtocolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Title given to entries created by pairing
pub const ENTRY_TITLE: &str = "AndroidTV remote";

/// A stored, paired device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Generated entry id
    pub entry_id: String,
    /// Human readable title
    pub title: String,
    /// Connection record produced by pairing
    pub data: DeviceRecord,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    fn new(title: impl Into<String>, data: DeviceRecord) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            title: title.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EntryFile {
    #[serde(default)]
    entries: Vec<ConfigEntry>,
}

/// File backed collection of config entries
#[derive(Debug, Clone)]
pub struct EntryStore {
    path: PathBuf,
    entries: Vec<ConfigEntry>,
}

impl EntryStore {
    /// Load the store at `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read entries from {}", path.display()))?;
            let file: EntryFile = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse entries in {}", path.display()))?;
            file.entries
        } else {
            Vec::new()
        };

        debug!("Loaded {} config entries from {}", entries.len(), path.display());
        Ok(Self { path, entries })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store back to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        let file = EntryFile {
            entries: self.entries.clone(),
        };
        let contents =
            serde_json::to_string_pretty(&file).context("Failed to serialize entries")?;
        fs::write(&self.path, contents).context("Failed to write entries file")?;
        Ok(())
    }

    /// All entries in creation order
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Entry with exactly `entry_id`
    pub fn get(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|entry| entry.entry_id == entry_id)
    }

    /// Entry whose id equals or uniquely starts with `id`
    pub fn find(&self, id: &str) -> Option<&ConfigEntry> {
        if let Some(entry) = self.get(id) {
            return Some(entry);
        }

        let mut matches = self
            .entries
            .iter()
            .filter(|entry| !id.is_empty() && entry.entry_id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Some(entry),
            _ => None,
        }
    }

    /// Entry for the device with `unique_id`
    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .find(|entry| entry.data.unique_id == unique_id)
    }

    /// Add and persist an entry for `record`
    ///
    /// Fails with [`ProtocolError::DuplicateDevice`] when the device already
    /// has an entry.
    pub fn add(&mut self, title: impl Into<String>, record: DeviceRecord) -> Result<ConfigEntry> {
        if self.find_by_unique_id(&record.unique_id).is_some() {
            return Err(ProtocolError::DuplicateDevice(record.unique_id).into());
        }

        let entry = ConfigEntry::new(title, record);
        self.entries.push(entry.clone());
        self.save()?;

        info!(
            "Created entry {} for {} at {}",
            entry.entry_id, entry.data.unique_id, entry.data.host
        );
        Ok(entry)
    }

    /// Remove and persist; returns the removed entry
    pub fn remove(&mut self, entry_id: &str) -> Result<Option<ConfigEntry>> {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.entry_id == entry_id)
        else {
            return Ok(None);
        };

        let entry = self.entries.remove(index);
        self.save()?;
        info!("Removed entry {}", entry.entry_id);
        Ok(Some(entry))
    }
}

impl ConfiguredDevices for EntryStore {
    fn is_configured(&self, unique_id: &str) -> bool {
        self.find_by_unique_id(unique_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> EntryStore {
        EntryStore::load(dir.path().join("entries.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.entries().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_add_persists_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let entry = store
            .add(ENTRY_TITLE, DeviceRecord::new("192.168.1.20", "ATV-1"))
            .unwrap();
        assert_eq!(entry.title, ENTRY_TITLE);
        assert!(store.is_configured("ATV-1"));

        let reloaded = EntryStore::load(store.path()).unwrap();
        assert_eq!(reloaded.entries(), store.entries());
        assert_eq!(reloaded.get(&entry.entry_id).unwrap().data.host, "192.168.1.20");
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store
            .add(ENTRY_TITLE, DeviceRecord::new("192.168.1.20", "ATV-1"))
            .unwrap();

        let err = store
            .add(ENTRY_TITLE, DeviceRecord::new("192.168.1.21", "ATV-1"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::DuplicateDevice(id)) if id == "ATV-1"
        ));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_remove_and_prefix_lookup() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let entry = store
            .add(ENTRY_TITLE, DeviceRecord::new("192.168.1.20", "ATV-1"))
            .unwrap();

        assert_eq!(store.find(&entry.entry_id[..8]), Some(&entry));
        assert!(store.find("").is_none());

        assert_eq!(store.remove(&entry.entry_id).unwrap(), Some(entry));
        assert!(store.remove("missing").unwrap().is_none());
        assert!(!store.is_configured("ATV-1"));
        assert!(EntryStore::load(store.path()).unwrap().entries().is_empty());
    }
}
