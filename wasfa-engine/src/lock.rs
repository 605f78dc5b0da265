//! The two engine locks and their ordering rule.
//!
//! - The **resolution lock** serializes recipe-graph construction. It is
//!   reentrant: deferred actions and nested `get_recipe` calls made while
//!   building a graph run on the thread that already holds it.
//! - The **instantiation lock** guards the moment a constructor actually
//!   runs.
//!
//! A thread holding the instantiation lock must never request the
//! resolution lock. Each thread tracks how deep it is inside the
//! instantiation lock, and [`ResolutionLock::acquire`] fails fast with
//! [`ErrorKind::LockOrderViolation`] instead of risking a deadlock.

use std::cell::Cell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::warn;

use crate::error::{ErrorKind, LockOrderViolationError, ResolutionError, Result};
use crate::key::DependencyKey;

thread_local! {
    // Instantiation lock depth of the current thread.
    static INSTANTIATING: Cell<usize> = const { Cell::new(0) };
}

/// Returns `true` while the current thread runs inside a constructor
/// guarded by an instantiation lock.
pub fn holds_instantiation_lock() -> bool {
    INSTANTIATING.with(|depth| depth.get() > 0)
}

/// Guards object instantiation.
#[derive(Default)]
pub struct InstantiationLock {
    mutex: ReentrantMutex<()>,
}

impl InstantiationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is free, then marks the current thread as
    /// instantiating until the guard drops.
    pub fn enter(&self) -> InstantiationGuard<'_> {
        let guard = self.mutex.lock();
        INSTANTIATING.with(|depth| depth.set(depth.get() + 1));
        InstantiationGuard { _guard: guard }
    }
}

/// Held while a constructor runs.
pub struct InstantiationGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl Drop for InstantiationGuard<'_> {
    fn drop(&mut self) {
        INSTANTIATING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Serializes all recipe-graph construction.
#[derive(Default)]
pub(crate) struct ResolutionLock {
    mutex: ReentrantMutex<()>,
}

impl ResolutionLock {
    /// Acquires the lock on behalf of `key`, refusing to do so from inside
    /// a constructor.
    pub fn acquire(&self, key: &DependencyKey) -> Result<ReentrantMutexGuard<'_, ()>> {
        if holds_instantiation_lock() {
            warn!(key = %key, "Resolution requested while holding the instantiation lock");
            return Err(ResolutionError::new(ErrorKind::LockOrderViolation(
                LockOrderViolationError { key: key.clone() },
            )));
        }
        Ok(self.mutex.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_depth() {
        let lock = InstantiationLock::new();
        assert!(!holds_instantiation_lock());
        {
            let _outer = lock.enter();
            assert!(holds_instantiation_lock());
            {
                let _inner = lock.enter();
                assert!(holds_instantiation_lock());
            }
            assert!(holds_instantiation_lock());
        }
        assert!(!holds_instantiation_lock());
    }

    #[test]
    fn resolution_refused_inside_instantiation() {
        let instantiation = InstantiationLock::new();
        let resolution = ResolutionLock::default();
        let key = DependencyKey::of::<String>();

        assert!(resolution.acquire(&key).is_ok());

        let _guard = instantiation.enter();
        let err = resolution.acquire(&key).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::LockOrderViolation(_)));
        assert!(err.to_string().contains("do not use the injector from within constructors"));
    }

    #[test]
    fn resolution_lock_is_reentrant() {
        let resolution = ResolutionLock::default();
        let key = DependencyKey::of::<String>();
        let _outer = resolution.acquire(&key).unwrap();
        let _inner = resolution.acquire(&key).unwrap();
    }

    #[test]
    fn depth_is_per_thread() {
        let lock = std::sync::Arc::new(InstantiationLock::new());
        let _guard = lock.enter();
        let other = std::thread::spawn(holds_instantiation_lock).join().unwrap();
        assert!(!other);
    }
}
