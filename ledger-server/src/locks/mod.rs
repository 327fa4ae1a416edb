//! Tenant-scoped advisory locks
//!
//! Record appends and chain verification for the same tenant must never
//! interleave; different tenants are fully independent. The backend is an
//! injection point: the in-process [`LocalLockBackend`] serves single-node
//! deployments, a distributed implementation (same trait, same key scheme)
//! replaces it when the pipeline runs across workers.
//!
//! Locks are not reentrant: acquiring a key already held by the same task
//! blocks until the timeout expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key guarding a tenant's invoice chain (append and verification).
pub fn tenant_record_key(tenant_id: i64) -> String {
    format!("verifactu_record_{tenant_id}")
}

/// Keyed advisory lock backend.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Try to acquire `key`, waiting at most `timeout`. Returns `false` when
    /// the lock could not be acquired in time.
    async fn acquire(&self, key: &str, timeout: Duration) -> bool;

    /// Release a previously acquired `key`. Releasing a key that is not held
    /// is a no-op.
    async fn release(&self, key: &str);
}

/// In-process lock backend over keyed tokio mutexes.
#[derive(Default)]
pub struct LocalLockBackend {
    mutexes: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<String, OwnedMutexGuard<()>>,
}

impl LocalLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for LocalLockBackend {
    async fn acquire(&self, key: &str, timeout: Duration) -> bool {
        let mutex = self
            .mutexes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(key.to_string(), guard);
                true
            }
            Err(_) => false,
        }
    }

    async fn release(&self, key: &str) {
        // Dropping the stored guard unlocks the mutex.
        self.held.remove(key);
    }
}
