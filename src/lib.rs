// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! # Rustux Core - Kernel Execution Core
//!
//! The part of the Rustux kernel that creates and schedules processes and
//! threads, brokers inter-process messaging, and mediates every transition
//! from user mode into the kernel.
//!
//! ## Architecture
//!
//! ```text
//! src/
//! ├── arch/              # CPU hooks, clock, register context, trap glue
//! ├── sync/              # Spinlock, semaphore, wait queue, futex
//! ├── object/            # Kernel objects, handle table, watchers
//! ├── sched/             # Threads, blockers, scheduler, signals
//! ├── process/           # Processes, process table, address spaces
//! ├── ipc/               # Service -> Interface -> Endpoint messaging
//! ├── mm/                # Shared memory registry
//! ├── fs/                # Filesystem collaborator interface + ramfs
//! ├── exec/              # Program image loader interface
//! ├── syscall/           # Dispatcher, handlers, user memory access
//! ├── kernel.rs          # The owning registry passed to every syscall
//! └── lib.rs             # This file
//! ```
//!
//! ## Dependency order
//!
//! Spinlock/Semaphore/Futex -> KernelObject + HandleTable -> Thread/Process
//! -> Scheduler -> IPC -> Syscall dispatcher.
//!
//! ## Hosted builds
//!
//! The crate is `no_std`. Under `cfg(test)` or the `std` feature it links
//! the standard library so that host threads can act as logical CPUs; only
//! the [`arch`] module behaves differently between the two builds.
//!
//! ```ignore
//! use rustux_core::{Kernel, KernelConfig};
//!
//! let kernel = Kernel::new(KernelConfig::default().with_cpus(2), fs, loader);
//! let init = kernel.spawn_image("/bin/init", &[], &[], None)?;
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// Alloc crate for heap allocations
extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;

// Synchronization primitives
pub mod sync;

// Kernel objects & handles
pub mod object;

// Threads, blocking and scheduling
pub mod sched;

// Processes and address spaces
pub mod process;

// Inter-process messaging
pub mod ipc;

// Shared memory
pub mod mm;

// Collaborator interfaces
pub mod fs;
pub mod exec;

// System call interface
pub mod syscall;

pub mod kernel;

pub use config::KernelConfig;
pub use error::{KResult, Status};
pub use kernel::Kernel;

#[cfg(test)]
mod tests;
