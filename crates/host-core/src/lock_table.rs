//! Per-obligation exclusive locking with a timed try-lock.
//!
//! A read-write mutex on the obligation alone is insufficient: the
//! critical section spans disk I/O and network I/O and must serialize
//! RPC handlers against the scheduler's proof-building and revision
//! resubmission work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use storage_host_common::Hash256;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("obligation is locked by another holder")]
    ObligationLocked,
}

/// A held lock on one obligation. Dropping it releases the lock.
pub struct ObligationGuard {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Default)]
pub struct LockTable {
    locks: std::sync::Mutex<HashMap<Hash256, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: Hash256) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .expect("lock table mutex is never held across await")
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the obligation lock, blocking indefinitely.
    pub async fn lock(&self, id: Hash256) -> ObligationGuard {
        let mutex = self.entry(id);
        let guard = mutex.lock_owned().await;
        ObligationGuard { _guard: guard }
    }

    /// Acquires the obligation lock or fails after `timeout`.
    pub async fn try_lock(&self, id: Hash256, timeout: Duration) -> Result<ObligationGuard, LockError> {
        let mutex = self.entry(id);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(ObligationGuard { _guard: guard }),
            Err(_) => Err(LockError::ObligationLocked),
        }
    }
}
