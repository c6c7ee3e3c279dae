use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::warn;

/// Key the session token is persisted under.
pub const TOKEN_KEY: &str = "token";

/// Durable key/value store for the session token (and whatever else a view
/// layer wants to stash). Synchronous so the token can be read before the
/// very first render.
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn clear_all(&self);
}

/// JSON file on disk, loaded once and rewritten on every mutation.
pub struct DiskStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl DiskStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                // a corrupt file must not brick the client; start fresh
                warn!("ignoring corrupt storage file {}: {err}", path.display());
                HashMap::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("failed to create {}: {err}", parent.display());
                return;
            }
        }
        let raw = match serde_json::to_string_pretty(entries) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize storage: {err}");
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, raw) {
            warn!("failed to write {}: {err}", self.path.display());
        }
    }
}

impl TokenStorage for DiskStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        self.persist(&entries);
    }

    fn clear_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        self.persist(&entries);
    }
}

/// In-memory storage for tests and embedding.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn clear_all(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_storage_round_trips_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");

        let storage = DiskStorage::open(&path).expect("open");
        storage.set(TOKEN_KEY, "abc-123");
        storage.set("theme", "dark");

        let reopened = DiskStorage::open(&path).expect("reopen");
        assert_eq!(reopened.get(TOKEN_KEY).as_deref(), Some("abc-123"));
        assert_eq!(reopened.get("theme").as_deref(), Some("dark"));
    }

    #[test]
    fn clear_all_wipes_every_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");

        let storage = DiskStorage::open(&path).expect("open");
        storage.set(TOKEN_KEY, "abc-123");
        storage.set("theme", "dark");
        storage.clear_all();

        let reopened = DiskStorage::open(&path).expect("reopen");
        assert_eq!(reopened.get(TOKEN_KEY), None);
        assert_eq!(reopened.get("theme"), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");
        fs::write(&path, "not json").expect("write");

        let storage = DiskStorage::open(&path).expect("open");
        assert_eq!(storage.get(TOKEN_KEY), None);
    }

    #[test]
    fn memory_storage_remove_and_clear() {
        let storage = MemoryStorage::new();
        storage.set(TOKEN_KEY, "t");
        storage.set("other", "x");
        storage.remove("other");
        assert_eq!(storage.get("other"), None);
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("t"));
        storage.clear_all();
        assert_eq!(storage.get(TOKEN_KEY), None);
    }
}
