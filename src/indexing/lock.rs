//! Process-level model lock.
//!
//! Indexing steps read shared model state under [`ModelLock::try_read_for`].
//! A thread that holds [`ModelLock::write`] cannot hand work to pool workers:
//! they would wait on the read side until the writer returns, and the writer
//! would be waiting for them. The scheduler checks
//! [`ModelLock::is_write_locked_by_current_thread`] and runs such jobs on the
//! caller's thread instead.
//!
//! Workers never block on the read side. A read that times out while a write
//! is held or pending hands the file back so the worker releases its memory
//! lease and moves on.

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ModelLock {
    lock: RwLock<()>,
    writer: Mutex<Option<ThreadId>>,
}

/// Exclusive access to the model. Dropping the guard releases it.
pub struct ModelWriteGuard<'a> {
    owner: &'a ModelLock,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for ModelWriteGuard<'_> {
    fn drop(&mut self) {
        // Clear ownership while the write guard is still held
        *self.owner.writer.lock() = None;
    }
}

impl ModelLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self) -> ModelWriteGuard<'_> {
        let guard = self.lock.write();
        *self.writer.lock() = Some(thread::current().id());
        ModelWriteGuard {
            owner: self,
            _guard: guard,
        }
    }

    pub fn is_write_locked_by_current_thread(&self) -> bool {
        *self.writer.lock() == Some(thread::current().id())
    }

    /// True while any thread holds the write side.
    pub fn is_write_locked(&self) -> bool {
        self.lock.is_locked_exclusive()
    }

    /// Run `f` with shared access, waiting at most `timeout` for it.
    ///
    /// Returns `None` without calling `f` if a writer holds the lock or is
    /// queued for it the whole time. The writing thread already has
    /// exclusive access and runs `f` directly.
    pub fn try_read_for<R>(&self, timeout: Duration, f: impl FnOnce() -> R) -> Option<R> {
        if self.is_write_locked_by_current_thread() {
            return Some(f());
        }
        let _guard = self.lock.try_read_for(timeout)?;
        Some(f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_write_owner_tracking() {
        let lock = Arc::new(ModelLock::new());
        assert!(!lock.is_write_locked_by_current_thread());

        let guard = lock.write();
        assert!(lock.is_write_locked_by_current_thread());

        let other = Arc::clone(&lock);
        let seen_elsewhere = std::thread::spawn(move || other.is_write_locked_by_current_thread())
            .join()
            .unwrap();
        assert!(!seen_elsewhere);

        drop(guard);
        assert!(!lock.is_write_locked_by_current_thread());
    }

    #[test]
    fn test_read_is_reentrant_for_writer() {
        let lock = ModelLock::new();
        let _guard = lock.write();
        assert!(lock.is_write_locked());
        assert_eq!(lock.try_read_for(Duration::ZERO, || 42), Some(42));
    }

    #[test]
    fn test_read_gives_up_while_another_thread_writes() {
        let lock = Arc::new(ModelLock::new());
        assert_eq!(lock.try_read_for(Duration::ZERO, || 1), Some(1));

        let guard = lock.write();
        let reader = Arc::clone(&lock);
        let (ran, attempt) = std::thread::spawn(move || {
            let mut ran = false;
            let attempt = reader.try_read_for(Duration::from_millis(20), || ran = true);
            (ran, attempt)
        })
        .join()
        .unwrap();
        assert!(!ran, "closure must not run without the read lock");
        assert_eq!(attempt, None);

        drop(guard);
        assert!(!lock.is_write_locked());
        let reader = Arc::clone(&lock);
        let attempt = std::thread::spawn(move || reader.try_read_for(Duration::from_millis(20), || 7))
            .join()
            .unwrap();
        assert_eq!(attempt, Some(7));
    }
}
