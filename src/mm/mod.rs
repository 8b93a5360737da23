// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Memory Management
//!
//! Virtual memory objects and the system-wide shared memory registry.
//! Per-process mappings live in [`crate::process::AddressSpace`].

pub mod vmo;
pub mod shared;

pub use shared::{SharedMemoryFlags, SharedMemoryKey, SharedMemoryRegistry};
pub use vmo::{page_align_up, VmObject};
