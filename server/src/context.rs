//! Shared server context
//!
//! One `ServerContext` is constructed at startup and handed to every
//! component that needs account, session or sync access - there is no
//! process-wide singleton, which keeps tests isolated and allows several
//! instances in one process.
//!
//! Cross-context access goes through a single coarse lock around the whole
//! context ("lock the main loop, mutate, unlock"). HTTP workers block on it
//! for the duration of a state mutation; critical sections are short state
//! copies and compares, never I/O, so this deliberately trades throughput
//! for freedom from lock-ordering bugs.

use crate::auth::AuthService;
use crate::sync::SyncReconciler;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ServerContext {
    pub auth: AuthService,
    pub sync: SyncReconciler,
}

impl ServerContext {
    pub fn new(auth: AuthService) -> Self {
        Self {
            auth,
            sync: SyncReconciler::new(),
        }
    }

    /// Wraps the context in the coarse main-loop lock shared with workers.
    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }
}

pub type SharedContext = Arc<Mutex<ServerContext>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_store::{AccountPolicy, AccountStore};
    use crate::sync::PlayerId;

    fn test_context() -> ServerContext {
        let store = AccountStore::new(AccountPolicy {
            bcrypt_cost: 4,
            ..AccountPolicy::default()
        });
        ServerContext::new(AuthService::new(store, false))
    }

    #[tokio::test]
    async fn test_workers_serialize_on_the_coarse_lock() {
        let shared = test_context().into_shared();

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                let mut ctx = shared.lock().await;
                ctx.sync.add_player(PlayerId(i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(shared.lock().await.sync.len(), 8);
    }
}
