/**
 * ÉTAT CLIENT PERSISTÉ - Token bearer et dernier site sélectionné
 *
 * RÔLE :
 * Petit magasin clé/valeur durable lu au démarrage et écrit au login, au logout
 * et à chaque changement de site.
 *
 * FONCTIONNEMENT :
 * - ClientStateStore : interface synchrone (load/store/remove)
 * - MemoryStateStore : tests et sessions éphémères
 * - FileStateStore : objet JSON sur disque, réécrit en entier à chaque modification
 */

use crate::error::SyncError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Shared<T> = std::sync::Arc<Mutex<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistedKey {
    BearerToken,
    SelectedSiteId,
}

impl PersistedKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistedKey::BearerToken => "jwt",
            PersistedKey::SelectedSiteId => "selectedSiteId",
        }
    }
}

pub trait ClientStateStore: Send + Sync {
    fn load(&self, key: PersistedKey) -> Result<Option<String>, SyncError>;
    fn store(&self, key: PersistedKey, value: &str) -> Result<(), SyncError>;
    fn remove(&self, key: PersistedKey) -> Result<(), SyncError>;
}

#[derive(Clone, Default)]
pub struct MemoryStateStore {
    values: Shared<BTreeMap<&'static str, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pré-remplit une clé (simulation d'un état laissé par une session précédente)
    pub fn with(self, key: PersistedKey, value: &str) -> Self {
        self.values.lock().insert(key.as_str(), value.to_string());
        self
    }
}

impl ClientStateStore for MemoryStateStore {
    fn load(&self, key: PersistedKey) -> Result<Option<String>, SyncError> {
        Ok(self.values.lock().get(key.as_str()).cloned())
    }

    fn store(&self, key: PersistedKey, value: &str) -> Result<(), SyncError> {
        self.values.lock().insert(key.as_str(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: PersistedKey) -> Result<(), SyncError> {
        self.values.lock().remove(key.as_str());
        Ok(())
    }
}

pub struct FileStateStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| SyncError::Persistence(format!("read {}: {e}", path.display())))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| SyncError::Persistence(format!("parse {}: {e}", path.display())))?
            }
        } else {
            BTreeMap::new()
        };
        info!("[session] client state at {} ({} keys)", path.display(), values.len());
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_to_disk(&self, values: &BTreeMap<String, String>) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| SyncError::Persistence(format!("create {}: {e}", parent.display())))?;
            }
        }
        let content = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, content)
            .map_err(|e| SyncError::Persistence(format!("write {}: {e}", self.path.display())))?;
        debug!("[session] client state saved");
        Ok(())
    }
}

impl ClientStateStore for FileStateStore {
    fn load(&self, key: PersistedKey) -> Result<Option<String>, SyncError> {
        Ok(self.values.lock().get(key.as_str()).cloned())
    }

    fn store(&self, key: PersistedKey, value: &str) -> Result<(), SyncError> {
        let mut values = self.values.lock();
        values.insert(key.as_str().to_string(), value.to_string());
        self.save_to_disk(&values)
    }

    fn remove(&self, key: PersistedKey) -> Result<(), SyncError> {
        let mut values = self.values.lock();
        if values.remove(key.as_str()).is_none() {
            return Ok(());
        }
        self.save_to_disk(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("client.json");

        let store = FileStateStore::open(&path).unwrap();
        store.store(PersistedKey::BearerToken, "jwt-1").unwrap();
        store.store(PersistedKey::SelectedSiteId, "2").unwrap();
        store.remove(PersistedKey::BearerToken).unwrap();

        let reopened = FileStateStore::open(&path).unwrap();
        assert_eq!(reopened.load(PersistedKey::BearerToken).unwrap(), None);
        assert_eq!(reopened.load(PersistedKey::SelectedSiteId).unwrap().as_deref(), Some("2"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("selectedSiteId"));
    }

    #[test]
    fn test_corrupted_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, "{oops").unwrap();
        assert!(matches!(FileStateStore::open(&path), Err(SyncError::Persistence(_))));
    }

    #[test]
    fn test_memory_store_prefill() {
        let store = MemoryStateStore::new().with(PersistedKey::SelectedSiteId, "3");
        assert_eq!(store.load(PersistedKey::SelectedSiteId).unwrap().as_deref(), Some("3"));
        store.remove(PersistedKey::SelectedSiteId).unwrap();
        assert_eq!(store.load(PersistedKey::SelectedSiteId).unwrap(), None);
    }
}
