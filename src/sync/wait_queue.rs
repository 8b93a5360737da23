// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Wait Queue
//!
//! A FIFO queue of blockers for threads waiting on a condition.
//!
//! # Design
//!
//! - **FIFO**: `wake_one` releases the oldest waiter
//! - **Self-removal**: a waiter that returns early (interrupt, timeout)
//!   removes its own entry so no stale blocker is left behind
//!
//! # Usage
//!
//! ```rust,ignore
//! let wq = WaitQueue::new();
//!
//! // Block until `ready()` holds
//! wq.wait_until(&current, None, || ready())?;
//!
//! // After making `ready()` true elsewhere
//! wq.wake_all();
//! ```

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::sched::{Blocker, Thread, WaitResult};
use crate::sync::spinlock::SpinMutex;

/// Wait queue
pub struct WaitQueue {
    waiters: SpinMutex<VecDeque<Arc<Blocker>>>,
}

impl WaitQueue {
    /// Create an empty wait queue
    pub const fn new() -> Self {
        Self {
            waiters: SpinMutex::new(VecDeque::new()),
        }
    }

    /// Register a waiter at the back of the queue
    pub fn enqueue(&self, blocker: Arc<Blocker>) {
        self.waiters.lock().push_back(blocker);
    }

    /// Remove a waiter, returning whether it was still queued
    pub fn remove(&self, blocker: &Arc<Blocker>) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|b| Arc::ptr_eq(b, blocker)) {
            Some(index) => {
                waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Wake the oldest waiter
    pub fn wake_one(&self) -> bool {
        loop {
            let Some(blocker) = self.waiters.lock().pop_front() else {
                return false;
            };
            // Skip waiters that already gave up
            if blocker.unblock() {
                return true;
            }
        }
    }

    /// Wake every waiter, returning how many were woken
    pub fn wake_all(&self) -> usize {
        let drained: VecDeque<_> = core::mem::take(&mut *self.waiters.lock());
        drained.iter().filter(|b| b.unblock()).count()
    }

    /// Number of queued waiters
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block `current` until `condition` returns true
    ///
    /// The blocker is registered before the condition is re-checked, so a
    /// `wake_*` issued after the condition became true is never lost.
    pub fn wait_until<F>(&self, current: &Arc<Thread>, deadline: Option<u64>, mut condition: F) -> WaitResult
    where
        F: FnMut() -> bool,
    {
        loop {
            if condition() {
                return WaitResult::Woken;
            }
            let blocker = Blocker::new();
            self.enqueue(blocker.clone());
            if condition() {
                self.remove(&blocker);
                return WaitResult::Woken;
            }
            let result = current.block(&blocker, deadline);
            self.remove(&blocker);
            if result != WaitResult::Woken {
                return result;
            }
        }
    }
}

impl Default for WaitQueue {
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
    use crate::arch::{self, RegisterContext};
    use alloc::sync::Weak;
    use core::sync::atomic::{AtomicBool, Ordering};
    use core::time::Duration;

    fn thread() -> Arc<Thread> {
        Thread::new(1, Weak::new(), RegisterContext::new())
    }

    #[test]
    fn test_wake_one_fifo() {
        let wq = WaitQueue::new();
        let first = Blocker::new();
        let second = Blocker::new();
        wq.enqueue(first.clone());
        wq.enqueue(second.clone());

        assert!(wq.wake_one());
        assert!(!first.should_block());
        assert!(second.should_block());
        assert_eq!(wq.len(), 1);
    }

    #[test]
    fn test_wake_one_skips_fired_waiters() {
        let wq = WaitQueue::new();
        let stale = Blocker::new();
        let live = Blocker::new();
        stale.interrupt();
        wq.enqueue(stale);
        wq.enqueue(live.clone());
        assert!(wq.wake_one());
        assert!(!live.should_block());
        assert!(!wq.wake_one());
    }

    #[test]
    fn test_wake_all() {
        let wq = WaitQueue::new();
        for _ in 0..3 {
            wq.enqueue(Blocker::new());
        }
        assert_eq!(wq.wake_all(), 3);
        assert!(wq.is_empty());
    }

    #[test]
    fn test_remove() {
        let wq = WaitQueue::new();
        let b = Blocker::new();
        wq.enqueue(b.clone());
        assert!(wq.remove(&b));
        assert!(!wq.remove(&b));
    }

    #[test]
    fn test_wait_until_condition_true() {
        let wq = WaitQueue::new();
        assert_eq!(wq.wait_until(&thread(), None, || true), WaitResult::Woken);
        assert!(wq.is_empty());
    }

    #[test]
    fn test_wait_until_timeout_deregisters() {
        let wq = WaitQueue::new();
        let deadline = arch::deadline_after(Some(Duration::from_millis(3)));
        assert_eq!(wq.wait_until(&thread(), deadline, || false), WaitResult::TimedOut);
        assert!(wq.is_empty());
    }

    #[test]
    fn test_wait_until_woken() {
        let wq = Arc::new(WaitQueue::new());
        let ready = Arc::new(AtomicBool::new(false));
        let (wq2, ready2) = (wq.clone(), ready.clone());
        let waker = std::thread::spawn(move || {
            while wq2.is_empty() {
                std::thread::yield_now();
            }
            ready2.store(true, Ordering::SeqCst);
            wq2.wake_all();
        });
        let result = wq.wait_until(&thread(), None, || ready.load(Ordering::SeqCst));
        assert_eq!(result, WaitResult::Woken);
        waker.join().unwrap();
    }
}
