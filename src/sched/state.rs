// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread state definitions
//!
//! ```text
//! Running --block--> Blocked --unblock/interrupt/timeout--> Running
//! Running|Blocked --kill/exit--> Dying --unwound--> Zombie
//! ```

/// Thread execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// On a CPU or eligible to be
    Running,
    /// Parked on a blocker
    Blocked,
    /// Exit requested, still unwinding out of the kernel
    Dying,
    /// Fully stopped
    Zombie,
}

impl ThreadState {
    /// Check if the scheduler may pick this thread
    ///
    /// Dying threads still run so they can unwind out of the kernel.
    pub const fn is_schedulable(&self) -> bool {
        matches!(self, Self::Running | Self::Dying)
    }

    /// Check if the thread has been asked to exit
    pub const fn is_exiting(&self) -> bool {
        matches!(self, Self::Dying | Self::Zombie)
    }

    /// Get state name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Dying => "dying",
            Self::Zombie => "zombie",
        }
    }
}
