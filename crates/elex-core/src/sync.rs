//! Lock helpers
//!
//! State in this layer is only ever held for short, non-awaiting critical
//! sections. A poisoned lock means a panic happened mid-update elsewhere;
//! the data is still structurally valid, so it is recovered and logged
//! instead of propagating the panic.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock a mutex, recovering the guard if it was poisoned
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "Recovering poisoned mutex");
        poisoned.into_inner()
    })
}

/// Acquire a read guard, recovering it if the lock was poisoned
pub fn read_or_recover<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "Recovering poisoned read lock");
        poisoned.into_inner()
    })
}

/// Acquire a write guard, recovering it if the lock was poisoned
pub fn write_or_recover<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "Recovering poisoned write lock");
        poisoned.into_inner()
    })
}
