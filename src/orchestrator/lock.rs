use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

use crate::domain::RuntimeId;
use crate::error::{KeeperError, Result};

/// How widely one in-flight start blocks others
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScope {
    /// One start at a time across every runtime
    #[default]
    ProcessWide,
    /// One start at a time per runtime id
    PerRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    All,
    Runtime(RuntimeId),
}

/// Non-blocking start lock. Contention fails fast with `AlreadyStarting`
/// instead of queueing.
#[derive(Debug, Default)]
pub struct StartLock {
    scope: LockScope,
    held: Mutex<HashSet<LockKey>>,
}

/// Releases its slot when dropped, on every exit path
#[derive(Debug)]
pub struct StartGuard<'a> {
    lock: &'a StartLock,
    key: LockKey,
}

impl StartLock {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    fn key(&self, id: RuntimeId) -> LockKey {
        match self.scope {
            LockScope::ProcessWide => LockKey::All,
            LockScope::PerRuntime => LockKey::Runtime(id),
        }
    }

    pub fn try_acquire(&self, id: RuntimeId) -> Result<StartGuard<'_>> {
        let key = self.key(id);
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(key) {
            return Err(KeeperError::AlreadyStarting);
        }
        debug!("Start lock acquired for runtime {} ({:?})", id, key);
        Ok(StartGuard { lock: self, key })
    }

    /// Whether a start for `id` would currently be refused
    pub fn is_locked(&self, id: RuntimeId) -> bool {
        let held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.contains(&self.key(id))
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .lock
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
        debug!("Start lock released ({:?})", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_wide_blocks_every_id() {
        let lock = StartLock::new(LockScope::ProcessWide);
        let guard = lock.try_acquire(1).unwrap();
        assert!(matches!(lock.try_acquire(2), Err(KeeperError::AlreadyStarting)));
        assert!(lock.is_locked(3));

        drop(guard);
        assert!(!lock.is_locked(3));
        assert!(lock.try_acquire(2).is_ok());
    }

    #[test]
    fn test_per_runtime_blocks_same_id_only() {
        let lock = StartLock::new(LockScope::PerRuntime);
        let _a = lock.try_acquire(1).unwrap();
        let _b = lock.try_acquire(2).unwrap();
        assert!(matches!(lock.try_acquire(1), Err(KeeperError::AlreadyStarting)));
        assert!(!lock.is_locked(3));
    }

    #[test]
    fn test_released_on_unwind() {
        let lock = StartLock::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = lock.try_acquire(1).unwrap();
            panic!("start blew up");
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked(1));
    }
}
