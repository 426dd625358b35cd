//! Session authentication: binding network clients to accounts
//!
//! `AuthService` couples the account store with the session registry and the
//! login brute-force guard. Feedback to whoever initiated the attempt goes
//! through a plain text `MessageSink` - for console logins the echo target
//! differs from the client being logged in, hence the separate parameter.
//!
//! Policy decision: a second login for an account that is already bound
//! elsewhere fails; it does not displace the existing session.

use crate::account::{Account, AccountId, GUEST_ACCOUNT_NAME, HTTP_GUEST_ACCOUNT_NAME};
use crate::account_store::{AccountPolicy, AccountStore};
use crate::throttle::ConnectHistory;
use log::info;
use std::collections::HashMap;

/// Login brute-force guard: 4 attempts per 30 seconds, then 5 minute block.
const LOGIN_MAX_ATTEMPTS: usize = 4;
const LOGIN_SAMPLE_PERIOD_MS: u64 = 30_000;
const LOGIN_BLOCK_PERIOD_MS: u64 = 5 * 60_000;

/// Handle to a connected network client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

/// Text-message feedback target for auth results.
pub trait MessageSink {
    fn echo(&mut self, text: &str);
}

/// Production sink: auth feedback lands in the log.
pub struct LogSink;

impl MessageSink for LogSink {
    fn echo(&mut self, text: &str) {
        info!("{}", text);
    }
}

/// Transient client-to-account bindings. At most one non-guest account per
/// client; guests are a fallback, never bound.
#[derive(Default)]
pub struct SessionRegistry {
    bindings: HashMap<ClientId, AccountId>,
}

impl SessionRegistry {
    pub fn bind(&mut self, client: ClientId, account: AccountId) {
        self.bindings.insert(client, account);
    }

    pub fn unbind(&mut self, client: ClientId) -> Option<AccountId> {
        self.bindings.remove(&client)
    }

    pub fn account_of(&self, client: ClientId) -> Option<AccountId> {
        self.bindings.get(&client).copied()
    }

    pub fn client_of(&self, account: AccountId) -> Option<ClientId> {
        self.bindings
            .iter()
            .find(|(_, bound)| **bound == account)
            .map(|(client, _)| *client)
    }

    /// Drops every binding that references `account`.
    pub fn unbind_account(&mut self, account: AccountId) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, bound| *bound != account);
        before - self.bindings.len()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub struct AuthService {
    store: AccountStore,
    sessions: SessionRegistry,
    login_protect: ConnectHistory,
    guest: AccountId,
    http_guest: AccountId,
    auto_login: bool,
}

impl AuthService {
    /// Builds the service around an account store, creating the two
    /// process-wide guest identities up front so every downstream code path
    /// can rely on a non-null account.
    pub fn new(mut store: AccountStore, auto_login: bool) -> Self {
        let guest = store
            .register(Account::new_guest(GUEST_ACCOUNT_NAME, None))
            .expect("guest accounts are unregistered and cannot collide");
        let http_guest = store
            .register(Account::new_guest(HTTP_GUEST_ACCOUNT_NAME, None))
            .expect("guest accounts are unregistered and cannot collide");
        Self {
            store,
            sessions: SessionRegistry::default(),
            login_protect: ConnectHistory::new(
                LOGIN_MAX_ATTEMPTS,
                LOGIN_SAMPLE_PERIOD_MS,
                LOGIN_BLOCK_PERIOD_MS,
            ),
            guest,
            http_guest,
            auto_login,
        }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AccountStore {
        &mut self.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn policy(&self) -> &AccountPolicy {
        self.store.policy()
    }

    pub fn guest(&self) -> AccountId {
        self.guest
    }

    pub fn http_guest(&self) -> AccountId {
        self.http_guest
    }

    pub fn is_auto_login_enabled(&self) -> bool {
        self.auto_login
    }

    /// The account to act as for `client`: its bound account, or the guest
    /// fallback. Never absent.
    pub fn account_for(&self, client: ClientId) -> AccountId {
        self.sessions.account_of(client).unwrap_or(self.guest)
    }

    pub fn is_logged_in(&self, client: ClientId) -> bool {
        self.sessions.account_of(client).is_some()
    }

    /// Password login. On failure the attempt is recorded against `address`
    /// and the stored credentials are left untouched.
    pub fn log_in(
        &mut self,
        client: ClientId,
        echo: &mut dyn MessageSink,
        name: &str,
        password: &str,
        address: &str,
    ) -> bool {
        if self.login_protect.is_flooding(address) {
            info!("Ignoring login attempt for '{}' from {}", name, address);
            echo.echo("login: Too many attempts, try again later");
            return false;
        }

        let Some(id) = self.store.get(name, true) else {
            self.login_protect.add_connect(address);
            info!("Failed login attempt (unknown account '{}') from {}", name, address);
            echo.echo("login: Invalid username or password");
            return false;
        };

        let Some(account) = self.store.account(id) else {
            return false;
        };
        if !account.is_password(password) {
            self.login_protect.add_connect(address);
            info!("Failed login attempt for '{}' from {}", account.name(), address);
            echo.echo("login: Invalid username or password");
            return false;
        }

        self.bind_checked(client, echo, id, false)
    }

    /// Trusted login with no password check: auto-login from saved
    /// credentials or an HTTP-verified account.
    pub fn log_in_account(
        &mut self,
        client: ClientId,
        echo: &mut dyn MessageSink,
        id: AccountId,
        auto_login: bool,
    ) -> bool {
        if self.store.account(id).is_none() {
            echo.echo("login: Account no longer exists");
            return false;
        }
        self.bind_checked(client, echo, id, auto_login)
    }

    fn bind_checked(
        &mut self,
        client: ClientId,
        echo: &mut dyn MessageSink,
        id: AccountId,
        auto_login: bool,
    ) -> bool {
        let name = self
            .store
            .account(id)
            .map(|account| account.name().to_string())
            .unwrap_or_default();

        if self.sessions.account_of(client).is_some() {
            echo.echo("login: You are already logged in");
            return false;
        }
        if self.sessions.client_of(id).is_some() {
            echo.echo(&format!("login: Account '{}' is already in use", name));
            return false;
        }

        self.sessions.bind(client, id);
        if auto_login {
            info!("Auto-logged in client {:?} as '{}'", client, name);
            echo.echo(&format!("login: Automatically logged in as '{}'", name));
        } else {
            info!("Client {:?} logged in as '{}'", client, name);
            echo.echo(&format!("login: You successfully logged in as '{}'", name));
        }
        true
    }

    /// Releases the client's session. The account itself survives.
    pub fn log_out(&mut self, client: ClientId, echo: &mut dyn MessageSink) -> bool {
        match self.sessions.unbind(client) {
            Some(id) => {
                let name = self
                    .store
                    .account(id)
                    .map(|account| account.name().to_string())
                    .unwrap_or_default();
                info!("Client {:?} logged out of '{}'", client, name);
                echo.echo(&format!("logout: You logged out of '{}'", name));
                true
            }
            None => {
                echo.echo("logout: You are not logged in");
                false
            }
        }
    }

    /// Removes an account, releasing any session bound to it first so no
    /// client keeps a handle to a deleted record.
    pub fn remove_account(&mut self, id: AccountId) -> Option<Account> {
        if id == self.guest || id == self.http_guest {
            return None;
        }
        let released = self.sessions.unbind_account(id);
        if released > 0 {
            info!("Released {} session(s) bound to removed account", released);
        }
        self.store.remove(id)
    }
}
