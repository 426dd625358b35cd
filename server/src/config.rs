//! Runtime configuration consumed by the sync and auth core.

use std::collections::HashSet;
use std::path::PathBuf;

/// Values the components read; how they are sourced (flags, file) is up to
/// the binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server name used in the HTTP Basic-auth realm.
    pub server_name: String,
    /// Resource path authenticated HTTP requests are redirected to.
    /// `None` serves the informational page instead.
    pub default_resource: Option<String>,
    /// HTTP DoS guard: attempts per window before the address is refused.
    /// Zero disables the guard.
    pub http_dos_threshold: usize,
    pub http_dos_sample_period_ms: u64,
    pub http_dos_block_period_ms: u64,
    /// Addresses exempt from the DoS check.
    pub http_dos_exclude: HashSet<String>,
    /// Worker threads serving HTTP requests.
    pub http_thread_count: usize,
    /// Base64-encoded public key used for the verification challenge.
    pub verify_key_path: PathBuf,
    /// Persisted account file.
    pub accounts_path: PathBuf,
    /// Seconds between persistence flush pulses.
    pub save_interval_secs: u64,
    /// Log clients in automatically from saved credentials.
    pub auto_login: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "Default Server".to_string(),
            default_resource: None,
            // Max of 'n' connections per 10 seconds, then 1 minute ignore.
            http_dos_threshold: 20,
            http_dos_sample_period_ms: 10_000,
            http_dos_block_period_ms: 60_000,
            http_dos_exclude: HashSet::new(),
            http_thread_count: 8,
            verify_key_path: PathBuf::from("verify.key"),
            accounts_path: PathBuf::from("accounts.json"),
            save_interval_secs: 60,
            auto_login: false,
        }
    }
}
