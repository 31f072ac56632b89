//! Per-alias serialization of key store access.
//!
//! Concurrent generate/delete on the same alias can leave a backend holding a
//! half-regenerated key, so every operation that touches an alias runs under
//! that alias's mutex. Different aliases never block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of one mutex per alias
#[derive(Debug, Default)]
pub struct AliasLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AliasLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, alias: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(alias.to_string()).or_default())
    }

    /// Run `f` while holding the lock for `alias`.
    ///
    /// A poisoned lock is recovered: the protected state lives in the key
    /// store, and the next lifecycle check repairs it.
    pub fn with_alias<T>(&self, alias: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(alias);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }

    /// Number of aliases that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
