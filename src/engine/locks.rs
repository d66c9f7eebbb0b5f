//! Per-transaction-id async locks.
//!
//! Two deliveries of the same id serialize here, so the second one sees the
//! record the first one wrote instead of paying out twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::OwnedMutexGuard;

use crate::model::TxId;

#[derive(Debug, Default)]
pub struct TxLocks {
    inner: Mutex<HashMap<TxId, Weak<tokio::sync::Mutex<()>>>>,
}

impl TxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `tx`. Released when the guard drops.
    pub async fn acquire(&self, tx: &TxId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);
            match map.get(tx).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    map.insert(tx.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Ids currently held or awaited.
    pub fn in_flight(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
