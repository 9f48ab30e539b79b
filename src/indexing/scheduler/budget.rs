//! Soft memory budget for file content held by workers.
//!
//! New acquisitions wait while the outstanding total is at or above the
//! ceiling. Once under it, an acquisition is granted in full, even if it
//! pushes the total past the ceiling. A single file larger than the whole
//! budget can therefore always make progress.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Returned when the cancellation check fired while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCancelled;

#[derive(Debug)]
pub struct MemoryBudget {
    ceiling: u64,
    poll_interval: Duration,
    outstanding: Mutex<u64>,
    released: Condvar,
}

impl MemoryBudget {
    pub fn new(ceiling: u64, poll_interval: Duration) -> Self {
        Self {
            ceiling,
            poll_interval,
            outstanding: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Bytes currently acquired and not yet released.
    pub fn outstanding(&self) -> u64 {
        *self.outstanding.lock()
    }

    /// Wait until the outstanding total drops under the ceiling, then add `bytes`.
    ///
    /// `is_cancelled` is checked before waiting and after every wake-up or
    /// poll interval. On cancellation nothing is acquired.
    pub fn acquire(
        &self,
        bytes: u64,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<(), BudgetCancelled> {
        let mut outstanding = self.outstanding.lock();
        while *outstanding >= self.ceiling {
            if is_cancelled() {
                return Err(BudgetCancelled);
            }
            tracing::trace!(
                target: "budget",
                "waiting for {bytes} bytes ({} outstanding, ceiling {})",
                *outstanding,
                self.ceiling
            );
            self.released
                .wait_for(&mut outstanding, self.poll_interval);
        }
        *outstanding += bytes;
        Ok(())
    }

    /// Return `bytes` to the budget and wake waiters once under the ceiling.
    pub fn release(&self, bytes: u64) {
        let mut outstanding = self.outstanding.lock();
        debug_assert!(*outstanding >= bytes, "released more than acquired");
        *outstanding = outstanding.saturating_sub(bytes);
        if *outstanding < self.ceiling {
            self.released.notify_all();
        }
    }

    /// Acquire and get a lease that releases on drop.
    pub fn lease(
        &self,
        bytes: u64,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<BudgetLease<'_>, BudgetCancelled> {
        self.acquire(bytes, is_cancelled)?;
        Ok(BudgetLease {
            budget: self,
            bytes,
        })
    }
}

/// Acquired bytes, released when dropped on every exit path.
#[derive(Debug)]
pub struct BudgetLease<'a> {
    budget: &'a MemoryBudget,
    bytes: u64,
}

impl BudgetLease<'_> {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for BudgetLease<'_> {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    fn budget(ceiling: u64) -> MemoryBudget {
        MemoryBudget::new(ceiling, Duration::from_millis(10))
    }

    #[test]
    fn test_acquire_release_accounting() {
        let budget = budget(100);
        budget.acquire(40, || false).unwrap();
        budget.acquire(50, || false).unwrap();
        assert_eq!(budget.outstanding(), 90);

        budget.release(40);
        budget.release(50);
        assert_eq!(budget.outstanding(), 0);
    }

    #[test]
    fn test_oversized_single_acquire_is_granted() {
        let budget = budget(100);
        budget.acquire(1_000, || false).unwrap();
        assert_eq!(budget.outstanding(), 1_000);
        budget.release(1_000);
    }

    #[test]
    fn test_over_ceiling_blocks_until_release() {
        let budget = Arc::new(budget(100));
        budget.acquire(150, || false).unwrap();

        let granted = Arc::new(AtomicBool::new(false));
        let waiter = {
            let budget = Arc::clone(&budget);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                budget.acquire(10, || false).unwrap();
                granted.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!granted.load(Ordering::SeqCst), "must wait while over ceiling");

        budget.release(150);
        waiter.join().unwrap();
        assert!(granted.load(Ordering::SeqCst));
        assert_eq!(budget.outstanding(), 10);
    }

    #[test]
    fn test_cancelled_wait_acquires_nothing() {
        let budget = budget(100);
        budget.acquire(100, || false).unwrap();

        let start = Instant::now();
        let cancel_after = start + Duration::from_millis(30);
        let result = budget.acquire(10, || Instant::now() >= cancel_after);

        assert_eq!(result, Err(BudgetCancelled));
        assert_eq!(budget.outstanding(), 100);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let budget = budget(100);
        {
            let lease = budget.lease(60, || false).unwrap();
            assert_eq!(lease.bytes(), 60);
            assert_eq!(budget.outstanding(), 60);
        }
        assert_eq!(budget.outstanding(), 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let budget = Arc::new(budget(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _lease = budget.lease(3, || false).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(budget.outstanding(), 0);
    }
}
