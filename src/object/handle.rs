// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Handle Table
//!
//! Maps small process-local integers to kernel objects.
//!
//! # Design
//!
//! - **IDs**: handle 0 is never valid; freed IDs are reused lowest first
//! - **Growth**: the slot vector only grows, up to the table capacity
//! - **Close-on-exec**: flagged entries become empty slots in an exec copy,
//!   keeping every other handle at the same ID
//! - **Counting**: each live entry holds one handle reference on its object
//!
//! # Usage
//!
//! ```rust,ignore
//! let id = table.allocate(endpoint, HandleFlags::empty())?;
//! let endpoint = table.get_typed::<MessageEndpoint>(id)?;
//! table.destroy(id)?;
//! ```

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::error::{KResult, Status};
use crate::object::{downcast, release, KernelObject, TypedObject};
use crate::sync::SpinMutex;

/// Handle identifier (unique among live handles of one process)
pub type HandleId = u64;

bitflags! {
    /// Per-handle flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleFlags: u32 {
        /// Do not carry the handle into an exec'd child
        const CLOSE_ON_EXEC = 1 << 0;
    }
}

/// One handle table slot
#[derive(Clone)]
pub struct HandleEntry {
    pub object: Arc<dyn KernelObject>,
    pub flags: HandleFlags,
}

/// Handle table
pub struct HandleTable {
    /// Slot 0 is a permanent hole
    slots: SpinMutex<Vec<Option<HandleEntry>>>,
    capacity: usize,
}

impl HandleTable {
    /// Create an empty table holding at most `capacity` handles
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SpinMutex::new(vec![None]),
            capacity,
        }
    }

    /// Build a table from slots already counted by the caller
    fn from_counted(slots: Vec<Option<HandleEntry>>, capacity: usize) -> Self {
        Self {
            slots: SpinMutex::new(slots),
            capacity,
        }
    }

    /// Maximum number of live handles
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store `object` and return its new handle ID
    pub fn allocate(&self, object: Arc<dyn KernelObject>, flags: HandleFlags) -> KResult<HandleId> {
        let mut slots = self.slots.lock();
        let id = match slots.iter().skip(1).position(Option::is_none) {
            Some(free) => free + 1,
            None if slots.len() - 1 < self.capacity => {
                slots.push(None);
                slots.len() - 1
            }
            None => return Err(Status::TooManyHandles),
        };
        object.base().acquire_handle();
        slots[id] = Some(HandleEntry { object, flags });
        Ok(id as HandleId)
    }

    /// Look up a handle
    pub fn get(&self, id: HandleId) -> Option<Arc<dyn KernelObject>> {
        self.get_entry(id).map(|entry| entry.object)
    }

    /// Look up a handle with its flags
    pub fn get_entry(&self, id: HandleId) -> Option<HandleEntry> {
        let index = usize::try_from(id).ok().filter(|&i| i != 0)?;
        self.slots.lock().get(index).cloned().flatten()
    }

    /// Look up a handle and cast it to `T`
    ///
    /// Fails with `BadHandle` for an unknown ID and `InvalidArgument` if the
    /// object has another type.
    pub fn get_typed<T: TypedObject>(&self, id: HandleId) -> KResult<Arc<T>> {
        let object = self.get(id).ok_or(Status::BadHandle)?;
        downcast::<T>(object)
    }

    /// Destroy a handle
    ///
    /// The object itself is destroyed only if this was its last handle.
    pub fn destroy(&self, id: HandleId) -> KResult<()> {
        let index = usize::try_from(id).ok().filter(|&i| i != 0).ok_or(Status::BadHandle)?;
        let entry = {
            let mut slots = self.slots.lock();
            slots.get_mut(index).and_then(Option::take)
        };
        let entry = entry.ok_or(Status::BadHandle)?;
        release(&entry.object);
        Ok(())
    }

    /// Replace a handle's flags
    pub fn set_flags(&self, id: HandleId, flags: HandleFlags) -> KResult<()> {
        let index = usize::try_from(id).map_err(|_| Status::BadHandle)?;
        let mut slots = self.slots.lock();
        match slots.get_mut(index) {
            Some(Some(entry)) if index != 0 => {
                entry.flags = flags;
                Ok(())
            }
            _ => Err(Status::BadHandle),
        }
    }

    /// Value copy for a forked child: same objects, same IDs
    pub fn fork_copy(&self) -> Self {
        self.copy_filtered(|_| true)
    }

    /// Copy for an exec'd child: close-on-exec entries become holes
    pub fn exec_copy(&self) -> Self {
        self.copy_filtered(|entry| !entry.flags.contains(HandleFlags::CLOSE_ON_EXEC))
    }

    /// Copy the kept entries, counting the new handles before the lock drops
    ///
    /// A concurrent `destroy` on this table cannot release the last handle
    /// of an object between the copy and the count.
    fn copy_filtered<F>(&self, keep: F) -> Self
    where
        F: Fn(&HandleEntry) -> bool,
    {
        let slots: Vec<_> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .map(|slot| {
                    let entry = slot.as_ref().filter(|entry| keep(entry))?;
                    entry.object.base().acquire_handle();
                    Some(entry.clone())
                })
                .collect()
        };
        Self::from_counted(slots, self.capacity)
    }

    /// Destroy every handle, returning how many were live
    pub fn close_all(&self) -> usize {
        let entries: Vec<HandleEntry> = {
            let mut slots = self.slots.lock();
            slots.iter_mut().filter_map(Option::take).collect()
        };
        for entry in &entries {
            release(&entry.object);
        }
        entries.len()
    }

    /// Number of live handles
    pub fn count(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }
}

impl Drop for HandleTable {
    fn drop(&mut self) {
        self.close_all();
    }
}

// ============================================================================
// Tests
// ============================================================================
