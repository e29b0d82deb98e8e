//! The process-wide mailbox lock registry: enforces POP3's exclusive-access
//! rule with this server's read-only exception.
//!
//! Acquisition returns a scoped guard that releases on every exit path
//! (normal drop, panic unwind, or explicit `release()`) so a lock can never
//! outlive the session that holds it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::adapter::AccessMode;
use crate::error::Error;

#[derive(Debug, Default)]
struct LockRecord {
    exclusive: bool,
    readers: usize,
}

impl LockRecord {
    fn is_empty(&self) -> bool {
        !self.exclusive && self.readers == 0
    }
}

#[derive(Debug, Default)]
pub struct LockRegistry {
    records: Mutex<HashMap<(String, String), LockRecord>>,
}

impl LockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(LockRegistry::default())
    }

    /// Attempt to acquire `mode` for `(scope, user)`. On success, returns a
    /// guard that releases the lock when dropped.
    pub fn acquire(
        self: &Arc<Self>,
        scope: &str,
        user: &str,
        mode: AccessMode,
    ) -> Result<LockGuard, Error> {
        let key = (scope.to_string(), user.to_string());
        let mut records = self.records.lock().expect("lock registry poisoned");
        let record = records.entry(key.clone()).or_default();

        match mode {
            AccessMode::Exclusive => {
                if record.exclusive || record.readers > 0 {
                    return Err(Error::LockBusy);
                }
                record.exclusive = true;
            }
            AccessMode::ReadOnly => {
                if record.exclusive {
                    return Err(Error::LockBusy);
                }
                record.readers += 1;
            }
        }
        drop(records);

        Ok(LockGuard {
            registry: Arc::clone(self),
            key,
            mode,
            released: false,
        })
    }

    fn release(&self, key: &(String, String), mode: AccessMode) {
        let mut records = self.records.lock().expect("lock registry poisoned");
        if let Some(record) = records.get_mut(key) {
            match mode {
                AccessMode::Exclusive => record.exclusive = false,
                AccessMode::ReadOnly => record.readers = record.readers.saturating_sub(1),
            }
            if record.is_empty() {
                records.remove(key);
            }
        }
    }
}

/// RAII handle for a held mailbox lock. Dropping it (including on an
/// unwinding panic) releases the lock; `release()` does so eagerly so
/// callers can observe the release happening at a specific point (e.g.
/// before replying to `QUIT`).
pub struct LockGuard {
    registry: Arc<LockRegistry>,
    key: (String, String),
    mode: AccessMode,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) {
        self.registry.release(&self.key, self.mode);
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(&self.key, self.mode);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exclusive_excludes_everyone() {
        let registry = LockRegistry::new();
        let guard = registry.acquire("default", "alice", AccessMode::Exclusive).unwrap();
        assert!(registry.acquire("default", "alice", AccessMode::Exclusive).is_err());
        assert!(registry.acquire("default", "alice", AccessMode::ReadOnly).is_err());
        drop(guard);
        assert!(registry.acquire("default", "alice", AccessMode::Exclusive).is_ok());
    }

    #[test]
    fn read_only_holders_coexist() {
        let registry = LockRegistry::new();
        let a = registry.acquire("default", "alice", AccessMode::ReadOnly).unwrap();
        let b = registry.acquire("default", "alice", AccessMode::ReadOnly).unwrap();
        assert!(registry.acquire("default", "alice", AccessMode::Exclusive).is_err());
        drop(a);
        drop(b);
        assert!(registry.acquire("default", "alice", AccessMode::Exclusive).is_ok());
    }

    #[test]
    fn release_happens_on_drop_without_explicit_call() {
        let registry = LockRegistry::new();
        {
            let _guard = registry.acquire("default", "bob", AccessMode::Exclusive).unwrap();
        }
        assert!(registry.acquire("default", "bob", AccessMode::Exclusive).is_ok());
    }

    #[test]
    fn different_scopes_are_independent() {
        let registry = LockRegistry::new();
        let _a = registry.acquire("scope-a", "alice", AccessMode::Exclusive).unwrap();
        assert!(registry.acquire("scope-b", "alice", AccessMode::Exclusive).is_ok());
    }
}
