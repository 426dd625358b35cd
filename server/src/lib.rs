//! Server-side state synchronization and authentication core.
//!
//! The crate is organized around one coarse-grained shared context
//! ([`context::ServerContext`]) holding the account/session state and the
//! per-player sync state. Network adapters (the UDP sync ingest in
//! [`network`] and the HTTP admin gate in [`httpd`]) translate wire traffic
//! into calls on that context.

pub mod account;
pub mod account_store;
pub mod auth;
pub mod config;
pub mod context;
pub mod httpd;
pub mod network;
pub mod persist;
pub mod sync;
pub mod throttle;
