//! Embedded HTTP admin gate
//!
//! A thin axum adapter in front of the auth core. Authentication is Basic
//! auth resolved through the shared context under the coarse main-loop lock;
//! a brute-force guard sits in front of credential checking and a separate
//! DoS guard in front of request handling altogether. An address that is
//! flooding gets the guest account back without any verification attempt, so
//! the response shape does not reveal whether throttling or the credential
//! check rejected it.
//!
//! The gate also serves the verification-challenge exchange: a companion
//! service proves server identity by sending a plaintext challenge that we
//! encrypt under the deployment's public RSA key (OAEP, SHA-1).

use crate::account::{AccountId, CONSOLE_ACCOUNT_NAME};
use crate::config::Config;
use crate::context::SharedContext;
use crate::throttle::ConnectHistory;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{info, warn};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use shared::now_ms;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Brute-force guard: max 4 attempts per 30 seconds, then 5 minute ignore.
const BRUTE_FORCE_MAX_ATTEMPTS: usize = 4;
const BRUTE_FORCE_SAMPLE_PERIOD_MS: u64 = 30_000;
const BRUTE_FORCE_BLOCK_PERIOD_MS: u64 = 5 * 60_000;

/// HTTP sessions expire after this much inactivity.
const LOGIN_EXPIRE_MS: u64 = 5 * 60_000;

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("empty crypto challenge")]
    EmptyChallenge,
    #[error("could not read verification key file: {0}")]
    KeyFile(#[from] std::io::Error),
    #[error("verification key file is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),
    #[error("verification key file is not a valid public key: {0}")]
    KeyFormat(#[from] rsa::pkcs8::spki::Error),
    #[error("challenge encryption failed: {0}")]
    Encrypt(#[from] rsa::Error),
}

pub struct HttpGate {
    context: SharedContext,
    http_guest: AccountId,
    server_name: String,
    default_resource: Option<String>,
    verify_key_path: PathBuf,
    dos_exclude: HashSet<String>,
    brute_force: Mutex<ConnectHistory>,
    dos_protect: Mutex<ConnectHistory>,
    /// Account name -> last-seen ms for active HTTP sessions.
    logged_in: Mutex<HashMap<String, u64>>,
    /// Reentrancy guard for `pulse`; overlapping runs are skipped.
    pulse_busy: AtomicUsize,
}

impl HttpGate {
    pub async fn new(context: SharedContext, config: &Config) -> Arc<Self> {
        let http_guest = context.lock().await.auth.http_guest();
        Arc::new(Self {
            context,
            http_guest,
            server_name: config.server_name.clone(),
            default_resource: config.default_resource.clone(),
            verify_key_path: config.verify_key_path.clone(),
            dos_exclude: config.http_dos_exclude.clone(),
            brute_force: Mutex::new(ConnectHistory::new(
                BRUTE_FORCE_MAX_ATTEMPTS,
                BRUTE_FORCE_SAMPLE_PERIOD_MS,
                BRUTE_FORCE_BLOCK_PERIOD_MS,
            )),
            dos_protect: Mutex::new(ConnectHistory::new(
                config.http_dos_threshold,
                config.http_dos_sample_period_ms,
                config.http_dos_block_period_ms,
            )),
            logged_in: Mutex::new(HashMap::new()),
            pulse_busy: AtomicUsize::new(0),
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/get_verification_key_code", get(verification_key_code))
            .fallback(handle_request)
            .with_state(Arc::clone(self))
    }

    pub fn http_guest(&self) -> AccountId {
        self.http_guest
    }

    /// Connection-volume DoS check. Excluded addresses always pass; everyone
    /// else is counted and refused while flooding.
    pub fn should_allow_connection(&self, address: &str) -> bool {
        if self.dos_exclude.contains(address) {
            return true;
        }

        let mut dos = self.dos_protect.lock().unwrap();
        if dos.is_flooding(address) {
            return false;
        }
        dos.add_connect(address);
        if dos.is_flooding(address) {
            info!("HTTP: Connection flood from '{}'. Ignoring for a while.", address);
            return false;
        }
        true
    }

    /// Resolves the request's Basic-Authorization header to an account.
    /// Every failure mode degrades to the HTTP guest account; downstream
    /// code never sees an absent identity.
    pub async fn check_authentication(&self, headers: &HeaderMap, address: &str) -> AccountId {
        let Some((name, password)) = parse_basic_auth(headers) else {
            return self.http_guest;
        };

        if self.brute_force.lock().unwrap().is_flooding(address) {
            info!("HTTP: Ignoring login attempt for user '{}' from {}", name, address);
            return self.http_guest;
        }

        {
            // Coarse main-loop lock for the duration of the state compare.
            let ctx = self.context.lock().await;
            if let Some(id) = ctx.auth.store().get(&name, true) {
                if let Some(account) = ctx.auth.store().account(id) {
                    if account.is_password(&password) && account.name() != CONSOLE_ACCOUNT_NAME {
                        let mut logged_in = self.logged_in.lock().unwrap();
                        if !logged_in.contains_key(account.name()) {
                            info!(
                                "HTTP: '{}' entered correct password from {}",
                                account.name(),
                                address
                            );
                        }
                        logged_in.insert(account.name().to_string(), now_ms());
                        return id;
                    }
                }
            }
        }

        if !name.is_empty() {
            self.brute_force.lock().unwrap().add_connect(address);
            info!("HTTP: Failed login attempt for user '{}' from {}", name, address);
        }
        self.http_guest
    }

    /// 401 challenge asking the browser for Basic credentials.
    pub fn request_login(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{}\"", self.server_name),
            )],
            "Access denied, please login",
        )
            .into_response()
    }

    /// Encrypts a verification challenge under the stored public key.
    /// Fails whole: the caller either gets complete ciphertext or an error,
    /// never partial bytes.
    pub fn encrypt_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>, ChallengeError> {
        encrypt_challenge(&self.verify_key_path, challenge)
    }

    /// Expires idle HTTP sessions. Runs at most once at a time; an overlap
    /// is skipped rather than queued.
    pub fn pulse(&self) {
        if self.pulse_busy.fetch_add(1, Ordering::SeqCst) > 0 {
            self.pulse_busy.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        let expire_before = now_ms().saturating_sub(LOGIN_EXPIRE_MS);
        let mut logged_in = self.logged_in.lock().unwrap();
        logged_in.retain(|name, last_seen| {
            let keep = *last_seen >= expire_before;
            if !keep {
                info!("HTTP: '{}' no longer connected", name);
            }
            keep
        });
        drop(logged_in);

        self.pulse_busy.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_login_count(&self) -> usize {
        self.logged_in.lock().unwrap().len()
    }

    #[cfg(test)]
    fn touch_login_at(&self, name: &str, at_ms: u64) {
        self.logged_in
            .lock()
            .unwrap()
            .insert(name.to_string(), at_ms);
    }
}

/// Splits a `Basic` Authorization header into name and password.
fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (name, password) = decoded.split_once(':')?;
    Some((name.to_string(), password.to_string()))
}

/// Loads the base64-encoded DER public key and RSA-OAEP(SHA-1) encrypts the
/// challenge.
pub fn encrypt_challenge(key_path: &Path, challenge: &[u8]) -> Result<Vec<u8>, ChallengeError> {
    if challenge.is_empty() {
        return Err(ChallengeError::EmptyChallenge);
    }
    let encoded = std::fs::read_to_string(key_path)?;
    // Tolerate whitespace and line breaks in the key file.
    let compact: String = encoded.split_whitespace().collect();
    let der = BASE64.decode(compact.as_bytes())?;
    let key = RsaPublicKey::from_public_key_der(&der)?;
    let ciphertext = key.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), challenge)?;
    Ok(ciphertext)
}

async fn verification_key_code(
    State(gate): State<Arc<HttpGate>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !gate.should_allow_connection(&addr.ip().to_string()) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let challenge = headers
        .get("crypto_challenge")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    match gate.encrypt_challenge(challenge.as_bytes()) {
        Ok(ciphertext) => (StatusCode::OK, ciphertext).into_response(),
        Err(e) => {
            warn!("Verification challenge failed: {}", e);
            (StatusCode::UNAUTHORIZED, Vec::<u8>::new()).into_response()
        }
    }
}

async fn handle_request(
    State(gate): State<Arc<HttpGate>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let address = addr.ip().to_string();
    if !gate.should_allow_connection(&address) {
        return StatusCode::FORBIDDEN.into_response();
    }

    // Guests get the same routing; resources behind the redirect decide what
    // the resolved account may actually do.
    let _account = gate.check_authentication(&headers, &address).await;

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");

    match &gate.default_resource {
        Some(resource) => {
            let body = format!("<a href='/{}/'>This is the page you want</a>", resource);
            let location = format!("http://{}/{}/", host, resource);
            (
                StatusCode::FOUND,
                [(header::LOCATION, location)],
                Html(body),
            )
                .into_response()
        }
        None => {
            let body = format!(
                "You haven't set a default resource in your configuration file. \
                 You can either do this or visit http://{}/<i>resourcename</i>/ \
                 to see a specific resource.",
                host
            );
            (StatusCode::OK, Html(body)).into_response()
        }
    }
}

/// Binds and serves the gate until the task is dropped or the listener fails.
pub async fn serve(gate: Arc<HttpGate>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(
        listener,
        gate.router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_store::{AccountPolicy, AccountStore};
    use crate::auth::AuthService;
    use crate::context::ServerContext;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    const ADDR: &str = "198.51.100.7";

    fn basic_auth_headers(name: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode(format!("{}:{}", name, password));
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {}", encoded).parse().unwrap(),
        );
        headers
    }

    async fn test_gate(config: Config) -> (Arc<HttpGate>, SharedContext, AccountId) {
        let mut store = AccountStore::new(AccountPolicy {
            bcrypt_cost: 4,
            ..AccountPolicy::default()
        });
        let bob = store.create_registered("Bob", "hunter2").unwrap();
        store
            .create_registered(CONSOLE_ACCOUNT_NAME, "console-pass")
            .unwrap();
        let context = ServerContext::new(AuthService::new(store, false)).into_shared();
        let gate = HttpGate::new(Arc::clone(&context), &config).await;
        (gate, context, bob)
    }

    #[test]
    fn test_parse_basic_auth() {
        let headers = basic_auth_headers("Bob", "hunter2");
        assert_eq!(
            parse_basic_auth(&headers),
            Some(("Bob".to_string(), "hunter2".to_string()))
        );

        // Password may itself contain a colon; only the first splits.
        let headers = basic_auth_headers("Bob", "pa:ss");
        assert_eq!(
            parse_basic_auth(&headers),
            Some(("Bob".to_string(), "pa:ss".to_string()))
        );

        assert_eq!(parse_basic_auth(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        assert_eq!(parse_basic_auth(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic !!notbase64".parse().unwrap());
        assert_eq!(parse_basic_auth(&headers), None);
    }

    #[tokio::test]
    async fn test_correct_credentials_resolve_account() {
        let (gate, _context, bob) = test_gate(Config::default()).await;

        let headers = basic_auth_headers("bob", "hunter2");
        let id = gate.check_authentication(&headers, ADDR).await;
        assert_eq!(id, bob);
        assert_eq!(gate.active_login_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header_is_guest() {
        let (gate, _context, _bob) = test_gate(Config::default()).await;

        let id = gate.check_authentication(&HeaderMap::new(), ADDR).await;
        assert_eq!(id, gate.http_guest());
        assert_eq!(gate.active_login_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password_degrades_to_guest_and_counts() {
        let (gate, _context, _bob) = test_gate(Config::default()).await;

        let headers = basic_auth_headers("Bob", "wrong");
        for _ in 0..4 {
            let id = gate.check_authentication(&headers, ADDR).await;
            assert_eq!(id, gate.http_guest());
        }

        // The address is now flooding: even correct credentials are ignored
        // without a verification attempt.
        let headers = basic_auth_headers("Bob", "hunter2");
        let id = gate.check_authentication(&headers, ADDR).await;
        assert_eq!(id, gate.http_guest());

        // Another address still verifies normally.
        let id = gate.check_authentication(&headers, "198.51.100.8").await;
        assert_ne!(id, gate.http_guest());
    }

    #[tokio::test]
    async fn test_console_account_never_authenticates_over_http() {
        let (gate, _context, _bob) = test_gate(Config::default()).await;

        let headers = basic_auth_headers(CONSOLE_ACCOUNT_NAME, "console-pass");
        let id = gate.check_authentication(&headers, ADDR).await;
        assert_eq!(id, gate.http_guest());
        assert_eq!(gate.active_login_count(), 0);
    }

    #[tokio::test]
    async fn test_dos_guard_and_exclusion_list() {
        let mut config = Config::default();
        config.http_dos_threshold = 3;
        config.http_dos_exclude.insert("127.0.0.1".to_string());
        let (gate, _context, _bob) = test_gate(config).await;

        assert!(gate.should_allow_connection(ADDR));
        assert!(gate.should_allow_connection(ADDR));
        // Third attempt trips the threshold.
        assert!(!gate.should_allow_connection(ADDR));
        assert!(!gate.should_allow_connection(ADDR));

        // Excluded addresses are never throttled.
        for _ in 0..20 {
            assert!(gate.should_allow_connection("127.0.0.1"));
        }
    }

    #[tokio::test]
    async fn test_dos_guard_disabled_by_zero_threshold() {
        let mut config = Config::default();
        config.http_dos_threshold = 0;
        let (gate, _context, _bob) = test_gate(config).await;

        for _ in 0..100 {
            assert!(gate.should_allow_connection(ADDR));
        }
    }

    #[tokio::test]
    async fn test_pulse_expires_idle_logins() {
        let (gate, _context, _bob) = test_gate(Config::default()).await;

        gate.touch_login_at("Bob", now_ms());
        gate.touch_login_at("Alice", now_ms().saturating_sub(LOGIN_EXPIRE_MS + 1000));
        gate.pulse();

        assert_eq!(gate.active_login_count(), 1);
    }

    #[tokio::test]
    async fn test_request_login_challenge() {
        let mut config = Config::default();
        config.server_name = "Test Server".to_string();
        let (gate, _context, _bob) = test_gate(config).await;

        let response = gate.request_login();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Test Server\""
        );
    }

    #[test]
    fn test_challenge_roundtrip_against_private_key() {
        let mut rng = rand::thread_rng();
        // Small key: these tests exercise plumbing, not key strength.
        let private_key = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let public_der = private_key
            .to_public_key()
            .to_public_key_der()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("verify.key");
        std::fs::write(&key_path, BASE64.encode(public_der.as_bytes())).unwrap();

        let ciphertext = encrypt_challenge(&key_path, b"prove-it").unwrap();
        assert!(!ciphertext.is_empty());

        let plaintext = private_key
            .decrypt(Oaep::new::<Sha1>(), &ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"prove-it");
    }

    #[test]
    fn test_challenge_failure_modes() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("nope.key");
        assert!(matches!(
            encrypt_challenge(&missing, b"x"),
            Err(ChallengeError::KeyFile(_))
        ));

        let garbage = dir.path().join("garbage.key");
        std::fs::write(&garbage, "!!! not base64 !!!").unwrap();
        assert!(matches!(
            encrypt_challenge(&garbage, b"x"),
            Err(ChallengeError::KeyEncoding(_))
        ));

        let wrong_format = dir.path().join("wrong.key");
        std::fs::write(&wrong_format, BASE64.encode(b"random bytes")).unwrap();
        assert!(matches!(
            encrypt_challenge(&wrong_format, b"x"),
            Err(ChallengeError::KeyFormat(_))
        ));

        assert!(matches!(
            encrypt_challenge(&missing, b""),
            Err(ChallengeError::EmptyChallenge)
        ));
    }
}
