// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Futex Wait/Wake
//!
//! A per-process map from a user virtual address to the FIFO queue of
//! threads blocked on it.
//!
//! # Design
//!
//! - **Compare under lock**: the futex word is read while the table lock is
//!   held and the waiter is queued before the lock is dropped, so a waker
//!   that changes the word and then calls `wake` cannot slip in between
//! - **Retry loop**: a woken waiter re-reads the word and blocks again if
//!   it still holds the expected value
//! - **Self-removal**: interrupted or timed out waiters remove their entry
//! - **Wake policy**: [`WakePolicy::OldestSingle`] releases the oldest
//!   waiter only; [`WakePolicy::All`] releases every waiter

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use core::time::Duration;

use crate::arch;
use crate::error::{KResult, Status};
use crate::sched::{Blocker, Thread, WaitResult};
use crate::sync::SpinMutex;

/// Which waiters a futex wake releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    /// FIFO single wake: the oldest waiter
    OldestSingle,
    /// Every waiter on the address
    All,
}

/// Futex wait queues keyed by user address
pub struct FutexTable {
    queues: SpinMutex<BTreeMap<u64, VecDeque<Arc<Blocker>>>>,
}

impl FutexTable {
    pub const fn new() -> Self {
        Self {
            queues: SpinMutex::new(BTreeMap::new()),
        }
    }

    /// Block while the word at `addr` equals `expected`
    ///
    /// `read` fetches the current value of the word; a read failure is
    /// returned as is. Returns immediately if the word already differs.
    pub fn wait<F>(
        &self,
        addr: u64,
        expected: i32,
        read: F,
        current: &Arc<Thread>,
        timeout: Option<Duration>,
    ) -> KResult<()>
    where
        F: Fn() -> KResult<i32>,
    {
        let deadline = arch::deadline_after(timeout);
        loop {
            let blocker = Blocker::new();
            {
                let mut queues = self.queues.lock();
                if read()? != expected {
                    return Ok(());
                }
                queues.entry(addr).or_default().push_back(blocker.clone());
            }

            match current.block(&blocker, deadline) {
                WaitResult::Woken => continue,
                WaitResult::Interrupted => {
                    self.remove(addr, &blocker);
                    return Err(Status::Interrupted);
                }
                WaitResult::TimedOut => {
                    self.remove(addr, &blocker);
                    return Err(Status::TimedOut);
                }
            }
        }
    }

    /// Wake waiters on `addr` per `policy`, returning how many were woken
    ///
    /// Waiters that already gave up but have not deregistered yet are
    /// skipped, so `OldestSingle` still releases a live waiter behind them.
    pub fn wake(&self, addr: u64, policy: WakePolicy) -> usize {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&addr) else {
            return 0;
        };
        let woken = match policy {
            WakePolicy::OldestSingle => {
                let mut woken = 0;
                while let Some(blocker) = queue.pop_front() {
                    if blocker.unblock() {
                        woken = 1;
                        break;
                    }
                }
                woken
            }
            WakePolicy::All => core::mem::take(queue).iter().filter(|b| b.unblock()).count(),
        };
        if queue.is_empty() {
            queues.remove(&addr);
        }
        woken
    }

    /// Number of threads queued on `addr`
    pub fn waiter_count(&self, addr: u64) -> usize {
        self.queues.lock().get(&addr).map_or(0, VecDeque::len)
    }

    /// Number of addresses with at least one waiter
    pub fn address_count(&self) -> usize {
        self.queues.lock().len()
    }

    fn remove(&self, addr: u64, blocker: &Arc<Blocker>) {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(&addr) {
            queue.retain(|b| !Arc::ptr_eq(b, blocker));
            if queue.is_empty() {
                queues.remove(&addr);
            }
        }
    }
}

impl Default for FutexTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RegisterContext;
    use alloc::sync::Weak;
    use core::sync::atomic::{AtomicI32, Ordering};

    fn thread(tid: u64) -> Arc<Thread> {
        Thread::new(tid, Weak::new(), RegisterContext::new())
    }

    #[test]
    fn test_wait_value_mismatch_returns_immediately() {
        let table = FutexTable::new();
        let word = AtomicI32::new(5);
        let r = table.wait(0x1000, 4, || Ok(word.load(Ordering::SeqCst)), &thread(1), None);
        assert_eq!(r, Ok(()));
        assert_eq!(table.address_count(), 0);
    }

    #[test]
    fn test_wake_without_waiters() {
        let table = FutexTable::new();
        assert_eq!(table.wake(0x1000, WakePolicy::OldestSingle), 0);
    }

    #[test]
    fn test_read_fault_propagates() {
        let table = FutexTable::new();
        let r = table.wait(0x1000, 0, || Err(Status::Fault), &thread(1), None);
        assert_eq!(r, Err(Status::Fault));
    }

    #[test]
    fn test_wait_then_wake() {
        let table = Arc::new(FutexTable::new());
        let word = Arc::new(AtomicI32::new(0));
        let (t, w) = (table.clone(), word.clone());
        let waiter = std::thread::spawn(move || {
            t.wait(0x2000, 0, || Ok(w.load(Ordering::SeqCst)), &thread(1), None)
        });
        while table.waiter_count(0x2000) == 0 {
            std::thread::yield_now();
        }
        word.store(1, Ordering::SeqCst);
        assert_eq!(table.wake(0x2000, WakePolicy::OldestSingle), 1);
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(table.address_count(), 0);
    }

    #[test]
    fn test_wake_oldest_single_is_fifo() {
        let table = Arc::new(FutexTable::new());
        let word = Arc::new(AtomicI32::new(0));
        let first = thread(1);
        let second = thread(2);

        let spawn = |t: Arc<Thread>| {
            let (table, word) = (table.clone(), word.clone());
            std::thread::spawn(move || {
                table.wait(
                    0x3000,
                    0,
                    || Ok(word.load(Ordering::SeqCst)),
                    &t,
                    Some(Duration::from_millis(300)),
                )
            })
        };

        let h1 = spawn(first.clone());
        while table.waiter_count(0x3000) < 1 {
            std::thread::yield_now();
        }
        let h2 = spawn(second.clone());
        while table.waiter_count(0x3000) < 2 {
            std::thread::yield_now();
        }

        word.store(1, Ordering::SeqCst);
        assert_eq!(table.wake(0x3000, WakePolicy::OldestSingle), 1);
        assert_eq!(h1.join().unwrap(), Ok(()));
        // Never woken, so the second waiter runs into its timeout
        assert_eq!(h2.join().unwrap(), Err(Status::TimedOut));
        assert_eq!(table.address_count(), 0);
    }

    #[test]
    fn test_wake_all_policy() {
        let table = FutexTable::new();
        let blockers: Vec<_> = (0..3).map(|_| Blocker::new()).collect();
        {
            let mut queues = table.queues.lock();
            let queue = queues.entry(0x4000).or_default();
            for b in &blockers {
                queue.push_back(b.clone());
            }
        }
        assert_eq!(table.wake(0x4000, WakePolicy::All), 3);
        assert!(blockers.iter().all(|b| !b.should_block()));
    }

    #[test]
    fn test_wake_skips_waiter_that_gave_up() {
        let table = FutexTable::new();
        let expired = Blocker::new();
        let live = Blocker::new();
        expired.expire();
        {
            let mut queues = table.queues.lock();
            let queue = queues.entry(0x1000).or_default();
            queue.push_back(expired.clone());
            queue.push_back(live.clone());
        }
        assert_eq!(table.wake(0x1000, WakePolicy::OldestSingle), 1);
        assert!(!live.should_block());
        assert_eq!(live.result(), WaitResult::Woken);
        assert_eq!(table.address_count(), 0);
    }

    #[test]
    fn test_interrupted_waiter_deregisters() {
        let table = Arc::new(FutexTable::new());
        let t = thread(1);
        let (tb, t2) = (table.clone(), t.clone());
        let waiter = std::thread::spawn(move || tb.wait(0x5000, 0, || Ok(0), &t2, None));
        while !t.interrupt() {
            std::thread::yield_now();
        }
        assert_eq!(waiter.join().unwrap(), Err(Status::Interrupted));
        assert_eq!(table.waiter_count(0x5000), 0);
    }
}
