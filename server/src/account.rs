//! Account identity records
//!
//! An `Account` is owned exclusively by the `AccountStore`; everything else
//! (sessions, the HTTP gate, player entities) refers to it through its
//! `AccountId`. The record carries the case-preserving name, the bcrypt
//! password hash, the serial numbers seen for it, and arbitrary key/value
//! account data with a type tag.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Fallback identity for anonymous game connections.
pub const GUEST_ACCOUNT_NAME: &str = "guest";
/// Fallback identity for unauthenticated HTTP requests.
pub const HTTP_GUEST_ACCOUNT_NAME: &str = "http_guest";
/// The local console identity. Never authenticatable over HTTP.
pub const CONSOLE_ACCOUNT_NAME: &str = "Console";

/// Handle to an account inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

/// Type tag for a stored account-data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountDataKind {
    Nil,
    Bool,
    Number,
    String,
}

/// One account-data entry: the string form of the value plus its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountData {
    pub value: String,
    pub kind: AccountDataKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    name: String,
    password_hash: Option<String>,
    registered: bool,
    /// Network address this account was created from, for guest identity.
    address: Option<String>,
    serials: BTreeSet<String>,
    data: HashMap<String, AccountData>,
    /// Mutated since the last successful flush. Not persisted.
    #[serde(skip)]
    changed: bool,
}

impl Account {
    /// Creates a registered account with the given bcrypt hash already set.
    pub fn new_registered(name: &str, password_hash: String) -> Self {
        Self {
            name: name.to_string(),
            password_hash: Some(password_hash),
            registered: true,
            address: None,
            serials: BTreeSet::new(),
            data: HashMap::new(),
            changed: true,
        }
    }

    /// Creates an ephemeral guest account, optionally pinned to an address.
    pub fn new_guest(name: &str, address: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            password_hash: None,
            registered: false,
            address: address.map(str::to_string),
            serials: BTreeSet::new(),
            data: HashMap::new(),
            changed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Replaces the password hash. Plaintext never touches the record.
    pub fn set_password(&mut self, plaintext: &str, cost: u32) -> Result<(), bcrypt::BcryptError> {
        let hash = bcrypt::hash(plaintext, cost)?;
        self.password_hash = Some(hash);
        self.changed = true;
        Ok(())
    }

    /// Verifies a plaintext password against the stored hash. Accounts with
    /// no hash (guests) never match.
    pub fn is_password(&self, plaintext: &str) -> bool {
        match &self.password_hash {
            Some(hash) => bcrypt::verify(plaintext, hash).unwrap_or(false),
            None => false,
        }
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    /// Records a hardware/install serial for this account.
    pub fn add_serial(&mut self, serial: &str) {
        if self.serials.insert(serial.to_string()) {
            self.changed = true;
        }
    }

    pub fn has_serial(&self, serial: &str) -> bool {
        self.serials.contains(serial)
    }

    pub fn serials(&self) -> impl Iterator<Item = &str> {
        self.serials.iter().map(String::as_str)
    }

    pub fn set_data(&mut self, key: &str, value: &str, kind: AccountDataKind) {
        self.data.insert(
            key.to_string(),
            AccountData {
                value: value.to_string(),
                kind,
            },
        );
        self.changed = true;
    }

    pub fn get_data(&self, key: &str) -> Option<&AccountData> {
        self.data.get(key)
    }

    pub fn data_entries(&self) -> impl Iterator<Item = (&str, &AccountData)> {
        self.data.iter().map(|(key, data)| (key.as_str(), data))
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lowest bcrypt cost: these tests exercise logic, not hash strength.
    const COST: u32 = 4;

    #[test]
    fn test_registered_account_password_roundtrip() {
        let mut account = Account::new_registered("Bob", String::new());
        account.set_password("hunter2", COST).unwrap();

        assert!(account.is_password("hunter2"));
        assert!(!account.is_password("Hunter2"));
        assert!(!account.is_password(""));
    }

    #[test]
    fn test_plaintext_is_never_stored() {
        let mut account = Account::new_registered("Bob", String::new());
        account.set_password("secret-password", COST).unwrap();

        let hash = account.password_hash().unwrap();
        assert!(!hash.contains("secret-password"));
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_guest_account_never_matches_password() {
        let account = Account::new_guest(GUEST_ACCOUNT_NAME, None);
        assert!(!account.is_registered());
        assert!(!account.is_password(""));
        assert!(!account.is_password("anything"));
    }

    #[test]
    fn test_serial_tracking() {
        let mut account = Account::new_registered("Bob", String::new());
        account.clear_changed();

        account.add_serial("AAAA-1111");
        assert!(account.has_serial("AAAA-1111"));
        assert!(!account.has_serial("BBBB-2222"));
        assert!(account.has_changed());

        // Re-adding the same serial is a no-op.
        account.clear_changed();
        account.add_serial("AAAA-1111");
        assert!(!account.has_changed());
    }

    #[test]
    fn test_account_data_with_kind_tag() {
        let mut account = Account::new_registered("Bob", String::new());

        account.set_data("money", "1500", AccountDataKind::Number);
        account.set_data("vip", "true", AccountDataKind::Bool);

        let money = account.get_data("money").unwrap();
        assert_eq!(money.value, "1500");
        assert_eq!(money.kind, AccountDataKind::Number);

        let vip = account.get_data("vip").unwrap();
        assert_eq!(vip.kind, AccountDataKind::Bool);

        assert!(account.get_data("missing").is_none());
    }

    #[test]
    fn test_serde_skips_changed_flag() {
        let mut account = Account::new_registered("Bob", String::new());
        account.set_password("hunter2", COST).unwrap();
        account.set_data("k", "v", AccountDataKind::String);

        let json = serde_json::to_string(&account).unwrap();
        let restored: Account = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.name(), "Bob");
        assert!(restored.is_password("hunter2"));
        assert_eq!(restored.get_data("k").unwrap().value, "v");
        assert!(!restored.has_changed());
    }
}
