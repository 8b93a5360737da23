// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Blockers
//!
//! A blocker is the token a thread parks on. Whoever changes the awaited
//! condition finds the blocker in a wait list and unblocks it; signals and
//! explicit interrupt requests interrupt it; a deadline expires it.
//!
//! # Design
//!
//! - **One outcome**: the first of unblock/interrupt/expire wins
//! - **Weak thread link**: a blocker never keeps its thread alive
//! - **Registration first**: callers enqueue the blocker, re-check their
//!   condition, then block, so a wake between check and block is not lost

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::{KResult, Status};
use crate::sched::thread::Thread;
use crate::sync::SpinMutex;

const WAITING: u8 = 0;
const WOKEN: u8 = 1;
const INTERRUPTED: u8 = 2;
const TIMED_OUT: u8 = 3;

/// Outcome of a blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The awaited condition was signaled
    Woken,
    /// A signal or interrupt request ended the wait early
    Interrupted,
    /// The deadline passed
    TimedOut,
}

impl WaitResult {
    /// Map to a kernel result
    pub fn into_result(self) -> KResult<()> {
        match self {
            WaitResult::Woken => Ok(()),
            WaitResult::Interrupted => Err(Status::Interrupted),
            WaitResult::TimedOut => Err(Status::TimedOut),
        }
    }
}

/// A token a thread blocks on
pub struct Blocker {
    state: AtomicU8,
    thread: SpinMutex<Weak<Thread>>,
}

impl Blocker {
    /// Create an armed blocker
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(WAITING),
            thread: SpinMutex::new(Weak::new()),
        })
    }

    /// Check if the blocker has not fired yet
    pub fn should_block(&self) -> bool {
        self.state.load(Ordering::Acquire) == WAITING
    }

    /// Signal the awaited condition
    ///
    /// Returns false if the blocker already fired.
    pub fn unblock(&self) -> bool {
        self.finish(WOKEN)
    }

    /// End the wait early with an interrupted result
    pub fn interrupt(&self) -> bool {
        self.finish(INTERRUPTED)
    }

    /// End the wait because its deadline passed
    pub(crate) fn expire(&self) -> bool {
        self.finish(TIMED_OUT)
    }

    /// Outcome so far
    pub fn result(&self) -> WaitResult {
        match self.state.load(Ordering::Acquire) {
            INTERRUPTED => WaitResult::Interrupted,
            TIMED_OUT => WaitResult::TimedOut,
            _ => WaitResult::Woken,
        }
    }

    /// Remember which thread parks on this blocker
    pub(crate) fn attach(&self, thread: &Arc<Thread>) {
        *self.thread.lock() = Arc::downgrade(thread);
    }

    fn finish(&self, outcome: u8) -> bool {
        if self
            .state
            .compare_exchange(WAITING, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let thread = self.thread.lock().upgrade();
        if let Some(thread) = thread {
            thread.wake(self);
        }
        true
    }
}

impl core::fmt::Debug for Blocker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Blocker")
            .field("should_block", &self.should_block())
            .field("result", &self.result())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_outcome_wins() {
        let blocker = Blocker::new();
        assert!(blocker.should_block());
        assert!(blocker.interrupt());
        assert!(!blocker.unblock());
        assert!(!blocker.expire());
        assert!(!blocker.should_block());
        assert_eq!(blocker.result(), WaitResult::Interrupted);
    }

    #[test]
    fn test_result_mapping() {
        assert_eq!(WaitResult::Woken.into_result(), Ok(()));
        assert_eq!(WaitResult::Interrupted.into_result(), Err(Status::Interrupted));
        assert_eq!(WaitResult::TimedOut.into_result(), Err(Status::TimedOut));
    }
}
