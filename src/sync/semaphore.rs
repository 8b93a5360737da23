// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Counting Semaphore
//!
//! A signed counter. `wait` decrements it and blocks while the result is
//! negative; the magnitude of a negative counter is the number of blocked
//! waiters. `signal` increments it and releases the oldest waiter when the
//! old value was negative.
//!
//! The counter and waiter list share one lock, so a signal can never run
//! between a waiter's decrement and its registration.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::time::Duration;

use crate::arch;
use crate::error::{KResult, Status};
use crate::sched::{Blocker, Thread, WaitResult};
use crate::sync::SpinMutex;

struct SemaphoreInner {
    value: isize,
    waiters: VecDeque<Arc<Blocker>>,
}

/// Semaphore
pub struct Semaphore {
    inner: SpinMutex<SemaphoreInner>,
}

impl Semaphore {
    /// Create a semaphore with an initial count
    pub fn new(value: isize) -> Self {
        Self {
            inner: SpinMutex::new(SemaphoreInner {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Current counter value
    pub fn value(&self) -> isize {
        self.inner.lock().value
    }

    /// Take a unit if one is available without blocking
    pub fn try_wait(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }

    /// Take a unit, blocking while none is available
    pub fn wait(&self, current: &Arc<Thread>) -> KResult<()> {
        self.wait_timeout(current, None)
    }

    /// Take a unit, giving up after `timeout`
    ///
    /// An interrupted or timed out waiter gives its decrement back.
    pub fn wait_timeout(&self, current: &Arc<Thread>, timeout: Option<Duration>) -> KResult<()> {
        let deadline = arch::deadline_after(timeout);
        let blocker = {
            let mut inner = self.inner.lock();
            inner.value -= 1;
            if inner.value >= 0 {
                return Ok(());
            }
            let blocker = Blocker::new();
            inner.waiters.push_back(blocker.clone());
            blocker
        };

        loop {
            match current.block(&blocker, deadline) {
                WaitResult::Woken => {
                    if !blocker.should_block() {
                        return Ok(());
                    }
                    // Spurious return; the blocker is still queued
                }
                result => {
                    let mut inner = self.inner.lock();
                    let index = inner.waiters.iter().position(|b| Arc::ptr_eq(b, &blocker));
                    match index {
                        Some(index) => {
                            inner.waiters.remove(index);
                            inner.value += 1;
                        }
                        // A signal popped us after the early return; its unit is ours
                        None => return Ok(()),
                    }
                    return match result {
                        WaitResult::TimedOut => Err(Status::TimedOut),
                        _ => Err(Status::Interrupted),
                    };
                }
            }
        }
    }

    /// Release a unit, waking the oldest waiter if any is blocked
    pub fn signal(&self) {
        let woken = {
            let mut inner = self.inner.lock();
            let old = inner.value;
            inner.value += 1;
            if old < 0 {
                inner.waiters.pop_front()
            } else {
                None
            }
        };
        if let Some(blocker) = woken {
            blocker.unblock();
        }
    }

    /// Number of blocked waiters
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
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

    fn thread(tid: u64) -> Arc<Thread> {
        Thread::new(tid, Weak::new(), RegisterContext::new())
    }

    #[test]
    fn test_wait_with_available_units() {
        let sem = Semaphore::new(2);
        let t = thread(1);
        sem.wait(&t).unwrap();
        sem.wait(&t).unwrap();
        assert_eq!(sem.value(), 0);
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_signal_wakes_blocked_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let s = sem.clone();
        let waiter = std::thread::spawn(move || s.wait(&thread(1)));
        while sem.waiter_count() == 0 {
            std::thread::yield_now();
        }
        assert_eq!(sem.value(), -1);
        sem.signal();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn test_signal_wakes_exactly_one() {
        let sem = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (1..=2)
            .map(|tid| {
                let s = sem.clone();
                std::thread::spawn(move || s.wait_timeout(&thread(tid), Some(Duration::from_millis(200))))
            })
            .collect();
        while sem.waiter_count() < 2 {
            std::thread::yield_now();
        }
        sem.signal();
        let results: Vec<_> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(results.iter().filter(|r| **r == Err(Status::TimedOut)).count(), 1);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn test_timeout_restores_count() {
        let sem = Semaphore::new(0);
        let t = thread(1);
        assert_eq!(sem.wait_timeout(&t, Some(Duration::from_millis(2))), Err(Status::TimedOut));
        assert_eq!(sem.value(), 0);
        assert_eq!(sem.waiter_count(), 0);
    }

    #[test]
    fn test_interrupted_wait() {
        let sem = Arc::new(Semaphore::new(0));
        let t = thread(1);
        let (s, t2) = (sem.clone(), t.clone());
        let waiter = std::thread::spawn(move || s.wait(&t2));
        while !t.interrupt() {
            std::thread::yield_now();
        }
        assert_eq!(waiter.join().unwrap(), Err(Status::Interrupted));
        assert_eq!(sem.value(), 0);
    }
}
