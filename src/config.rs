// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Configuration
//!
//! Compile-time limits live here as constants. Values that an embedding
//! kernel may want to tune at boot are gathered in [`KernelConfig`].

use crate::sync::futex::WakePolicy;

/// Page size in bytes
pub const PAGE_SIZE: u64 = 4096;

/// Lowest address a user mapping may start at (the null page stays unmapped)
pub const USER_SPACE_START: u64 = 0x1000;

/// One past the highest user address (lower canonical half)
pub const USER_SPACE_END: u64 = 0x0000_7FFF_FFFF_F000;

/// Where the region allocator starts searching when no hint is given
pub const USER_MMAP_BASE: u64 = 0x0000_1000_0000_0000;

/// Load address used by the flat image loader
pub const USER_IMAGE_BASE: u64 = 0x40_0000;

/// Spinlock retries before the lock is declared deadlocked
pub const SPIN_RETRY_BUDGET: u32 = 0x0FFF_FFFF;

/// Number of signals (signal numbers are 1..=SIGNAL_MAX)
pub const SIGNAL_MAX: usize = 64;

/// Largest message any interface may be created with
pub const MAX_MESSAGE_SIZE: u16 = u16::MAX;

/// Longest path or name accepted from user memory
pub const MAX_PATH_LENGTH: usize = 4096;

/// Most argv/envp entries accepted by exec
pub const MAX_EXEC_ARGS: usize = 256;

/// Most handles accepted by a single kernel_object_wait
pub const MAX_WAIT_HANDLES: usize = 64;

/// Kernel stack size per thread
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Maximum number of logical CPUs
pub const MAX_CPUS: usize = 64;

/// Nanoseconds per timer tick on bare builds (100 Hz)
pub const NS_PER_TICK: u64 = 10_000_000;

/// Runtime kernel configuration
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of logical CPUs the scheduler manages
    pub cpu_count: usize,
    /// Handle table capacity per process
    pub max_handles: usize,
    /// Messages an endpoint may hold before Queue fails
    pub endpoint_queue_depth: usize,
    /// Timer ticks per scheduling quantum
    pub time_slice_ticks: u32,
    /// Initial user stack size for loaded images
    pub user_stack_size: u64,
    /// Which waiters a futex wake releases
    pub futex_wake_policy: WakePolicy,
}

impl KernelConfig {
    /// Create a configuration with default values
    pub const fn new() -> Self {
        Self {
            cpu_count: 1,
            max_handles: 1024,
            endpoint_queue_depth: 256,
            time_slice_ticks: 10,
            user_stack_size: 64 * 1024,
            futex_wake_policy: WakePolicy::OldestSingle,
        }
    }

    pub fn with_cpus(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count.clamp(1, MAX_CPUS);
        self
    }

    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles;
        self
    }

    pub fn with_endpoint_queue_depth(mut self, depth: usize) -> Self {
        self.endpoint_queue_depth = depth.max(1);
        self
    }

    pub fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice_ticks = ticks.max(1);
        self
    }

    pub fn with_futex_wake_policy(mut self, policy: WakePolicy) -> Self {
        self.futex_wake_policy = policy;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
