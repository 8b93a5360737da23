// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Architecture Hooks
//!
//! The small set of CPU services the execution core needs from the
//! architecture layer: a spin hint, a way to give up the CPU, a monotonic
//! clock, and the saved user register file.
//!
//! # Design
//!
//! - **Bare builds**: `yield_cpu` is a pause, time advances with `timer_tick`
//! - **Hosted builds** (`cfg(test)` or `std`): host threads act as CPUs,
//!   `yield_cpu` yields the host thread and time comes from `Instant`

pub mod context;

pub use context::RegisterContext;

use core::time::Duration;

/// Spin-wait hint for busy loops
#[inline]
pub fn cpu_relax() {
    core::hint::spin_loop();
}

/// Give up the CPU so another thread can run
#[cfg(any(test, feature = "std"))]
#[inline]
pub fn yield_cpu() {
    std::thread::yield_now();
}

/// Give up the CPU so another thread can run
#[cfg(not(any(test, feature = "std")))]
#[inline]
pub fn yield_cpu() {
    core::hint::spin_loop();
}

#[cfg(any(test, feature = "std"))]
static EPOCH: spin::Once<std::time::Instant> = spin::Once::new();

/// Monotonic time in nanoseconds since boot
#[cfg(any(test, feature = "std"))]
pub fn now_ns() -> u64 {
    let epoch = EPOCH.call_once(std::time::Instant::now);
    epoch.elapsed().as_nanos() as u64
}

#[cfg(not(any(test, feature = "std")))]
static TICKS: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

/// Advance the clock by one timer interrupt
#[cfg(not(any(test, feature = "std")))]
pub fn timer_tick() {
    TICKS.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
}

/// Monotonic time in nanoseconds since boot
#[cfg(not(any(test, feature = "std")))]
pub fn now_ns() -> u64 {
    TICKS.load(core::sync::atomic::Ordering::Relaxed) * crate::config::NS_PER_TICK
}

/// Absolute deadline for an optional relative timeout
pub fn deadline_after(timeout: Option<Duration>) -> Option<u64> {
    timeout.map(|t| {
        let nanos = u64::try_from(t.as_nanos()).unwrap_or(u64::MAX);
        now_ns().saturating_add(nanos)
    })
}

/// Convert a user timeout in microseconds; zero or negative means forever
pub fn timeout_from_micros(us: i64) -> Option<Duration> {
    if us > 0 {
        Some(Duration::from_micros(us as u64))
    } else {
        None
    }
}
