//! Per-index bulk operation lock.
//!
//! At most one bulk operation (full build, delete) holds it at a time. A
//! second caller is refused with [`Error::Busy`] instead of being queued.

use std::sync::{Arc, Mutex};

use localdex_core::error::{Error, Result};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct IndexLock {
    inner: Arc<AsyncMutex<()>>,
    holder: Arc<Mutex<Option<String>>>,
}

pub struct IndexLockGuard {
    _guard: OwnedMutexGuard<()>,
    holder: Arc<Mutex<Option<String>>>,
}

impl IndexLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, operation: &str) -> Result<IndexLockGuard> {
        match self.inner.clone().try_lock_owned() {
            Ok(guard) => {
                if let Ok(mut h) = self.holder.lock() {
                    *h = Some(operation.to_string());
                }
                Ok(IndexLockGuard { _guard: guard, holder: self.holder.clone() })
            }
            Err(_) => {
                let current = self.holder().unwrap_or_else(|| "another operation".to_string());
                Err(Error::Busy(format!("{current} is in progress")))
            }
        }
    }

    /// Name of the operation holding the lock, if any.
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().ok().and_then(|h| h.clone())
    }
}

impl Drop for IndexLockGuard {
    fn drop(&mut self) {
        if let Ok(mut h) = self.holder.lock() {
            *h = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let lock = IndexLock::new();
        let guard = lock.try_acquire("full index").expect("first");
        match lock.try_acquire("delete index") {
            Err(Error::Busy(msg)) => assert!(msg.contains("full index")),
            other => panic!("expected busy, got {:?}", other.map(|_| ())),
        }
        drop(guard);
        assert!(lock.holder().is_none());
        assert!(lock.try_acquire("delete index").is_ok());
    }
}
