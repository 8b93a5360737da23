// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Synchronization Primitives
//!
//! Mutual exclusion and blocking primitives used by every subsystem above.
//!
//! # Primitives
//!
//! - **SpinMutex**: test-and-set lock with a deadlock retry budget
//! - **Semaphore**: signed counter that blocks while negative
//! - **WaitQueue**: FIFO queue of blocked waiters
//! - **FutexTable**: per-process user-address keyed wait/wake
//!
//! # Design
//!
//! Spinlocks only guard short critical sections. Anything that may suspend
//! the caller goes through [`crate::sched::Thread::block`], and no spinlock
//! guard is held across that call.

pub mod spinlock;
pub mod semaphore;
pub mod wait_queue;
pub mod futex;

// Re-exports
pub use spinlock::{SpinMutex, SpinMutexGuard};
pub use semaphore::Semaphore;
pub use wait_queue::WaitQueue;
pub use futex::{FutexTable, WakePolicy};
