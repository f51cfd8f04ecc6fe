//! Persisted console state
//!
//! The selected site always lives in the JSON state file. The bearer token goes
//! to the OS keyring when enabled, so it never lands on disk in clear text.

use helios_sync::{ClientStateStore, FileStateStore, PersistedKey, SyncError};
use keyring::Entry;
use tracing::debug;

const KEYRING_SERVICE: &str = "helios-console";
const KEYRING_USER: &str = "bearer-token";

pub struct ConsoleStateStore {
    file: FileStateStore,
    use_keyring: bool,
}

impl ConsoleStateStore {
    pub fn new(file: FileStateStore, use_keyring: bool) -> Self {
        Self { file, use_keyring }
    }

    fn entry() -> Result<Entry, SyncError> {
        Entry::new(KEYRING_SERVICE, KEYRING_USER).map_err(|e| SyncError::Persistence(format!("keyring: {e}")))
    }

    fn in_keyring(&self, key: PersistedKey) -> bool {
        self.use_keyring && key == PersistedKey::BearerToken
    }
}

impl ClientStateStore for ConsoleStateStore {
    fn load(&self, key: PersistedKey) -> Result<Option<String>, SyncError> {
        if !self.in_keyring(key) {
            return self.file.load(key);
        }
        match Self::entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SyncError::Persistence(format!("keyring: {e}"))),
        }
    }

    fn store(&self, key: PersistedKey, value: &str) -> Result<(), SyncError> {
        if !self.in_keyring(key) {
            return self.file.store(key, value);
        }
        debug!("storing session token in OS keyring");
        Self::entry()?
            .set_password(value)
            .map_err(|e| SyncError::Persistence(format!("keyring: {e}")))
    }

    fn remove(&self, key: PersistedKey) -> Result<(), SyncError> {
        if !self.in_keyring(key) {
            return self.file.remove(key);
        }
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SyncError::Persistence(format!("keyring: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_only_mode_keeps_token_in_state_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = ConsoleStateStore::new(FileStateStore::open(&path).unwrap(), false);

        store.store(PersistedKey::BearerToken, "jwt").unwrap();
        store.store(PersistedKey::SelectedSiteId, "1").unwrap();
        assert_eq!(store.load(PersistedKey::BearerToken).unwrap().as_deref(), Some("jwt"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("jwt"));
        assert!(raw.contains("selectedSiteId"));
    }
}
