//! Canonical account registry
//!
//! Owns every `Account` in the process and resolves names case-insensitively
//! while preserving the registered spelling for display. The name index is
//! only ever touched by the single insert/remove pair, so its invariant
//! (one index entry per live account) holds by construction.
//!
//! The store is also the persistence scheduler: mutations mark it dirty and
//! `flush` writes the registered set through the storage backend, skipping
//! the write entirely when nothing changed.

use crate::account::{Account, AccountData, AccountDataKind, AccountId};
use crate::persist::AccountStorage;
use log::{info, warn};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account name does not satisfy the naming rules")]
    InvalidName,
    #[error("password does not satisfy the password rules")]
    InvalidPassword,
    #[error("an account named '{0}' already exists")]
    DuplicateName(String),
    #[error("no such account")]
    NotFound,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Deployment-defined validity rules for names and passwords.
///
/// Kept as data rather than hard-coded policy so a host can swap in its own
/// limits without touching the store.
#[derive(Debug, Clone)]
pub struct AccountPolicy {
    pub min_name_len: usize,
    pub max_name_len: usize,
    pub min_password_len: usize,
    pub max_password_len: usize,
    pub bcrypt_cost: u32,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            min_name_len: 1,
            max_name_len: 64,
            min_password_len: 1,
            max_password_len: 64,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl AccountPolicy {
    /// Pure check, no side effects. Callable before registration.
    pub fn is_valid_account_name(&self, name: &str) -> bool {
        let len = name.chars().count();
        len >= self.min_name_len
            && len <= self.max_name_len
            && !name.chars().any(|c| c.is_control())
            // A colon would break Basic-Authorization credential splitting.
            && !name.contains(':')
            && name.trim() == name
    }

    /// Pure check, no side effects.
    pub fn is_valid_password(&self, password: &str) -> bool {
        let len = password.chars().count();
        len >= self.min_password_len
            && len <= self.max_password_len
            && !password.chars().any(|c| c.is_control())
    }
}

pub struct AccountStore {
    accounts: HashMap<AccountId, Account>,
    /// Lowercased name -> ids sharing that name (registered + guests).
    name_index: HashMap<String, Vec<AccountId>>,
    next_id: u32,
    policy: AccountPolicy,
    /// Any mutation since the last successful flush.
    dirty: bool,
}

impl AccountStore {
    pub fn new(policy: AccountPolicy) -> Self {
        Self {
            accounts: HashMap::new(),
            name_index: HashMap::new(),
            next_id: 1,
            policy,
            dirty: false,
        }
    }

    pub fn policy(&self) -> &AccountPolicy {
        &self.policy
    }

    fn index_key(name: &str) -> String {
        name.to_lowercase()
    }

    fn insert(&mut self, account: Account) -> AccountId {
        let id = AccountId(self.next_id);
        self.next_id += 1;
        self.name_index
            .entry(Self::index_key(account.name()))
            .or_default()
            .push(id);
        self.accounts.insert(id, account);
        self.dirty = true;
        debug_assert_eq!(
            self.name_index.values().map(Vec::len).sum::<usize>(),
            self.accounts.len()
        );
        id
    }

    /// Adds an account to the registry. Registered accounts must have a name
    /// no other registered account holds (case-insensitively); the maps are
    /// untouched when the check fails.
    pub fn register(&mut self, account: Account) -> Result<AccountId, AccountError> {
        if account.is_registered() && self.get(account.name(), true).is_some() {
            return Err(AccountError::DuplicateName(account.name().to_string()));
        }
        Ok(self.insert(account))
    }

    /// Creates, validates and registers a new password-protected account.
    pub fn create_registered(
        &mut self,
        name: &str,
        password: &str,
    ) -> Result<AccountId, AccountError> {
        if !self.policy.is_valid_account_name(name) {
            return Err(AccountError::InvalidName);
        }
        if !self.policy.is_valid_password(password) {
            return Err(AccountError::InvalidPassword);
        }
        if self.get(name, true).is_some() {
            return Err(AccountError::DuplicateName(name.to_string()));
        }
        let mut account = Account::new_registered(name, String::new());
        account.set_password(password, self.policy.bcrypt_cost)?;
        Ok(self.insert(account))
    }

    /// Removes an account and drops it from the index.
    ///
    /// Session bindings referencing the account must be released first; the
    /// composite `AuthService::remove_account` does both in order.
    pub fn remove(&mut self, id: AccountId) -> Option<Account> {
        let account = self.accounts.remove(&id)?;
        let key = Self::index_key(account.name());
        if let Some(ids) = self.name_index.get_mut(&key) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.name_index.remove(&key);
            }
        }
        self.dirty = true;
        debug_assert_eq!(
            self.name_index.values().map(Vec::len).sum::<usize>(),
            self.accounts.len()
        );
        Some(account)
    }

    /// Exact case-insensitive name lookup. With `require_registered`,
    /// unregistered (guest) accounts are invisible.
    pub fn get(&self, name: &str, require_registered: bool) -> Option<AccountId> {
        let candidates = self.name_index.get(&Self::index_key(name))?;
        if require_registered {
            candidates
                .iter()
                .copied()
                .find(|id| self.accounts[id].is_registered())
        } else {
            candidates
                .iter()
                .copied()
                .find(|id| self.accounts[id].is_registered())
                .or_else(|| candidates.first().copied())
        }
    }

    /// Address-keyed variant for anonymous flows: a registered account wins,
    /// otherwise the guest account created from the same address.
    pub fn get_by_address(&self, name: &str, address: &str) -> Option<AccountId> {
        let candidates = self.name_index.get(&Self::index_key(name))?;
        candidates
            .iter()
            .copied()
            .find(|id| self.accounts[id].is_registered())
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|id| self.accounts[id].address() == Some(address))
            })
    }

    /// Resolves an anonymous connection to a stable guest identity, creating
    /// the address-pinned guest record on first contact.
    pub fn get_or_create_guest(&mut self, name: &str, address: &str) -> AccountId {
        if let Some(id) = self.get_by_address(name, address) {
            return id;
        }
        info!("Created guest account '{}' for {}", name, address);
        self.insert(Account::new_guest(name, Some(address)))
    }

    /// All accounts matching `name`. Case-sensitive mode narrows the
    /// case-insensitive candidate set down to exact-case matches.
    pub fn find_matches(&self, name: &str, case_sensitive: bool) -> Vec<AccountId> {
        let Some(candidates) = self.name_index.get(&Self::index_key(name)) else {
            return Vec::new();
        };
        candidates
            .iter()
            .copied()
            .filter(|id| !case_sensitive || self.accounts[id].name() == name)
            .collect()
    }

    /// The display-case spelling currently stored for `name`, if any.
    pub fn get_active_case_variation(&self, name: &str) -> Option<String> {
        self.get(name, false)
            .map(|id| self.accounts[&id].name().to_string())
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    /// Every account that has recorded this serial - ban-evasion and
    /// multi-account detection walk the whole set.
    pub fn accounts_by_serial(&self, serial: &str) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .accounts
            .iter()
            .filter(|(_, account)| account.has_serial(serial))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    pub fn add_serial(&mut self, id: AccountId, serial: &str) -> bool {
        match self.accounts.get_mut(&id) {
            Some(account) => {
                account.add_serial(serial);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn set_account_data(
        &mut self,
        id: AccountId,
        key: &str,
        value: &str,
        kind: AccountDataKind,
    ) -> bool {
        match self.accounts.get_mut(&id) {
            Some(account) => {
                account.set_data(key, value, kind);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn get_account_data(&self, id: AccountId, key: &str) -> Option<AccountData> {
        self.accounts.get(&id)?.get_data(key).cloned()
    }

    /// Clones every data entry of `from` onto `to`, overwriting per key.
    /// Keys only present on `to` are kept.
    pub fn copy_account_data(&mut self, from: AccountId, to: AccountId) -> bool {
        if !self.accounts.contains_key(&to) {
            return false;
        }
        let Some(source) = self.accounts.get(&from) else {
            return false;
        };
        let entries: Vec<(String, AccountData)> = source
            .data_entries()
            .map(|(key, data)| (key.to_string(), data.clone()))
            .collect();
        if entries.is_empty() {
            return true;
        }
        let Some(target) = self.accounts.get_mut(&to) else {
            return false;
        };
        for (key, data) in entries {
            target.set_data(&key, &data.value, data.kind);
        }
        self.dirty = true;
        true
    }

    /// Validates and replaces an account's password.
    pub fn change_password(&mut self, id: AccountId, password: &str) -> Result<(), AccountError> {
        if !self.policy.is_valid_password(password) {
            return Err(AccountError::InvalidPassword);
        }
        let cost = self.policy.bcrypt_cost;
        let account = self.accounts.get_mut(&id).ok_or(AccountError::NotFound)?;
        account.set_password(password, cost)?;
        self.dirty = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn needs_save(&self) -> bool {
        self.dirty
    }

    /// Loads the persisted account set into the registry. Duplicate names in
    /// the file are dropped with a warning rather than corrupting the index.
    pub fn load_from(&mut self, storage: &dyn AccountStorage) -> Result<usize, crate::persist::PersistError> {
        let mut loaded = 0;
        for account in storage.load_all()? {
            let name = account.name().to_string();
            match self.register(account) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Skipping stored account '{}': {}", name, e),
            }
        }
        // Loading is not a mutation worth re-saving.
        self.dirty = false;
        for account in self.accounts.values_mut() {
            account.clear_changed();
        }
        Ok(loaded)
    }

    /// Detaches the registered set so the caller can write it without
    /// holding any lock over the store. Returns `None` when nothing changed.
    /// The dirty flag is cleared optimistically; on a failed save call
    /// `mark_dirty` so the next pulse retries. Mutations made while the
    /// write is in flight re-dirty the store on their own.
    pub fn take_save_snapshot(&mut self) -> Option<Vec<Account>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        for account in self.accounts.values_mut() {
            account.clear_changed();
        }
        Some(
            self.accounts
                .values()
                .filter(|account| account.is_registered())
                .cloned()
                .collect(),
        )
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Writes the registered set if anything changed since the last flush.
    /// A failed save is logged and left dirty for the next pulse; it never
    /// propagates to the calling operation.
    pub fn flush(&mut self, storage: &dyn AccountStorage) -> bool {
        if !self.dirty {
            return true;
        }
        let registered: Vec<Account> = self
            .accounts
            .values()
            .filter(|account| account.is_registered())
            .cloned()
            .collect();
        match storage.save_all(&registered) {
            Ok(()) => {
                self.dirty = false;
                for account in self.accounts.values_mut() {
                    account.clear_changed();
                }
                true
            }
            Err(e) => {
                warn!("Failed to save accounts, will retry: {}", e);
                false
            }
        }
    }
}
