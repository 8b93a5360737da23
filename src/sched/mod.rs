// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler and thread management
//!
//! Threads, the blockers they park on, the per-CPU round-robin scheduler,
//! and POSIX-style signal state.
//!
//! # Example
//! ```ignore
//! use rustux_core::sched::{Blocker, WaitResult};
//!
//! let blocker = Blocker::new();
//! queue.enqueue(blocker.clone());
//! match thread.block(&blocker, None) {
//!     WaitResult::Woken => { /* condition changed */ }
//!     WaitResult::Interrupted | WaitResult::TimedOut => queue.remove(&blocker),
//! }
//! ```

pub mod blocker;
pub mod state;
pub mod thread;
pub mod scheduler;
pub mod signal;

pub use blocker::{Blocker, WaitResult};
pub use scheduler::Scheduler;
pub use state::ThreadState;
pub use thread::{Thread, ThreadId};
