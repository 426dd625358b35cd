//! Account persistence contract
//!
//! The store only depends on a load-all / save-all trait; the concrete format
//! behind it is replaceable. `JsonFileStorage` is the shipped backend, writing
//! through a temp file so a crash mid-save never truncates the account file.
//! Persistence failures are reported to the caller for logging and retried on
//! the next flush - in-memory state stays authoritative in between.

use crate::account::Account;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("account file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("account file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("storage backend unavailable: {0}")]
    Backend(String),
}

/// Abstract account storage. Load everything at startup, save the full
/// registered set on flush.
pub trait AccountStorage: Send {
    fn load_all(&self) -> Result<Vec<Account>, PersistError>;
    fn save_all(&self, accounts: &[Account]) -> Result<(), PersistError>;
}

/// JSON file backend with atomic replace-on-save.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AccountStorage for JsonFileStorage {
    fn load_all(&self) -> Result<Vec<Account>, PersistError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            // First run: no account file yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_all(&self, accounts: &[Account]) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(accounts)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path)
            .map_err(|e| PersistError::Io(e.error))?;
        Ok(())
    }
}

/// In-memory backend for tests and embedding without a filesystem.
#[derive(Default)]
pub struct MemoryStorage {
    accounts: Mutex<Vec<Account>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent saves fail, to exercise the retry path.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub fn saved_count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }
}

impl AccountStorage for MemoryStorage {
    fn load_all(&self) -> Result<Vec<Account>, PersistError> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    fn save_all(&self, accounts: &[Account]) -> Result<(), PersistError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(PersistError::Backend("simulated failure".to_string()));
        }
        *self.accounts.lock().unwrap() = accounts.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountDataKind;

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("accounts.json"));
        assert!(storage.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("accounts.json"));

        let mut account = Account::new_registered("Bob", String::new());
        account.set_password("hunter2", 4).unwrap();
        account.set_data("money", "25", AccountDataKind::Number);
        account.add_serial("AAAA-1111");

        storage.save_all(std::slice::from_ref(&account)).unwrap();

        let loaded = storage.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "Bob");
        assert!(loaded[0].is_password("hunter2"));
        assert!(loaded[0].has_serial("AAAA-1111"));
        assert_eq!(loaded[0].get_data("money").unwrap().value, "25");
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("accounts.json"));

        let a = Account::new_registered("A", String::new());
        let b = Account::new_registered("B", String::new());

        storage.save_all(&[a.clone(), b]).unwrap();
        storage.save_all(&[a]).unwrap();

        let loaded = storage.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "A");
    }

    #[test]
    fn test_corrupt_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let storage = JsonFileStorage::new(path);
        match storage.load_all() {
            Err(PersistError::Format(_)) => {}
            other => panic!("Expected format error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_memory_storage_failure_switch() {
        let storage = MemoryStorage::new();
        let account = Account::new_registered("Bob", String::new());

        storage.set_fail_saves(true);
        assert!(storage.save_all(std::slice::from_ref(&account)).is_err());
        assert_eq!(storage.saved_count(), 0);

        storage.set_fail_saves(false);
        storage.save_all(std::slice::from_ref(&account)).unwrap();
        assert_eq!(storage.saved_count(), 1);
    }
}
