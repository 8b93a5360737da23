// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Object Watching
//!
//! Block until any of a set of kernel objects becomes signaled. One blocker
//! is registered with every object's watcher list before the objects are
//! checked, and removed from all of them before returning.

use alloc::sync::Arc;
use core::time::Duration;

use crate::arch;
use crate::error::{KResult, Status};
use crate::object::KernelObject;
use crate::sched::{Blocker, Thread, WaitResult};

/// Wait until one of `objects` is signaled or destroyed
///
/// Returns the index of a ready object. Timeouts and interruptions both
/// report `Interrupted`.
pub fn wait_any(
    objects: &[Arc<dyn KernelObject>],
    current: &Arc<Thread>,
    timeout: Option<Duration>,
) -> KResult<usize> {
    if objects.is_empty() {
        return Err(Status::InvalidArgument);
    }
    let deadline = arch::deadline_after(timeout);

    loop {
        let blocker = Blocker::new();
        for object in objects {
            object.base().watch(blocker.clone());
        }

        let ready = objects
            .iter()
            .position(|o| o.is_signaled() || o.base().is_destroyed());
        let result = match ready {
            Some(_) => WaitResult::Woken,
            None => current.block(&blocker, deadline),
        };

        for object in objects {
            object.base().unwatch(&blocker);
        }

        if let Some(index) = ready {
            return Ok(index);
        }
        if result != WaitResult::Woken {
            return Err(Status::Interrupted);
        }
    }
}
