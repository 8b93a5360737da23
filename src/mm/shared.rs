// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Shared Memory
//!
//! Shared VMOs keyed by an opaque 64-bit key that user code passes around.
//!
//! # Lifetime
//!
//! An object is removed from the registry only once it has been marked for
//! destruction *and* no address space maps it any more. Destroying a mapped
//! object just marks it; the last unmap finishes the job.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::error::{KResult, Status};
use crate::mm::vmo::VmObject;
use crate::process::{MapFlags, Pid, Process};
use crate::sync::SpinMutex;

/// Key naming a shared memory object
pub type SharedMemoryKey = u64;

/// Keys 0 and 1 are never handed out
const FIRST_KEY: SharedMemoryKey = 2;

bitflags! {
    /// Flags accepted by create_shared_memory
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SharedMemoryFlags: u64 {
        /// Only the owner and the recipient may map the object
        const PRIVATE = 1 << 0;
    }
}

struct SharedObject {
    vmo: Arc<VmObject>,
    owner: Pid,
    recipient: Pid,
    flags: SharedMemoryFlags,
    marked: bool,
}

impl SharedObject {
    fn involves(&self, pid: Pid) -> bool {
        pid == self.owner || pid == self.recipient
    }
}

/// Shared memory registry
pub struct SharedMemoryRegistry {
    objects: SpinMutex<BTreeMap<SharedMemoryKey, SharedObject>>,
    next_key: AtomicU64,
}

impl SharedMemoryRegistry {
    pub const fn new() -> Self {
        Self {
            objects: SpinMutex::new(BTreeMap::new()),
            next_key: AtomicU64::new(FIRST_KEY),
        }
    }

    /// Create a zeroed shared object owned by `owner`
    pub fn create(
        &self,
        size: u64,
        flags: SharedMemoryFlags,
        owner: Pid,
        recipient: Pid,
    ) -> KResult<SharedMemoryKey> {
        if size == 0 {
            return Err(Status::InvalidArgument);
        }
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let object = SharedObject {
            vmo: VmObject::new(size, true),
            owner,
            recipient,
            flags,
            marked: false,
        };
        self.objects.lock().insert(key, object);
        log::debug!("shm {}: created by pid {} ({} bytes)", key, owner, size);
        Ok(key)
    }

    /// Map the object into `process`, returning the base address
    pub fn map(&self, key: SharedMemoryKey, process: &Process, hint: Option<u64>) -> KResult<u64> {
        let vmo = {
            let objects = self.objects.lock();
            let object = objects.get(&key).ok_or(Status::NoSuchEntry)?;
            if object.marked {
                return Err(Status::NoSuchEntry);
            }
            if object.flags.contains(SharedMemoryFlags::PRIVATE) && !object.involves(process.pid()) {
                return Err(Status::NotPermitted);
            }
            object.vmo.clone()
        };
        process
            .address_space()
            .map_object(vmo, hint, false, MapFlags::RW | MapFlags::SHARED)
    }

    /// Unmap the region at `addr`, which must be a mapping of `key`
    pub fn unmap(&self, process: &Process, addr: u64, key: SharedMemoryKey) -> KResult<()> {
        let vmo = self.get(key).ok_or(Status::InvalidArgument)?;
        process.address_space().unmap_region_of(addr, &vmo)?;
        self.collect();
        Ok(())
    }

    /// Request destruction on behalf of `pid`
    pub fn destroy(&self, key: SharedMemoryKey, pid: Pid) -> KResult<()> {
        {
            let mut objects = self.objects.lock();
            let object = objects.get_mut(&key).ok_or(Status::NoSuchEntry)?;
            if !object.involves(pid) {
                return Err(Status::NotPermitted);
            }
            object.marked = true;
        }
        self.collect();
        Ok(())
    }

    /// Drop objects marked for destruction that nothing maps
    pub fn collect(&self) -> usize {
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|key, object| {
            let keep = !object.marked || object.vmo.mapping_count() > 0;
            if !keep {
                log::debug!("shm {}: destroyed", key);
            }
            keep
        });
        before - objects.len()
    }

    pub fn get(&self, key: SharedMemoryKey) -> Option<Arc<VmObject>> {
        self.objects.lock().get(&key).map(|o| o.vmo.clone())
    }

    pub fn count(&self) -> usize {
        self.objects.lock().len()
    }
}

impl Default for SharedMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::HandleTable;
    use crate::process::AddressSpace;

    fn process(pid: Pid) -> Arc<Process> {
        Process::new(pid, "shm", AddressSpace::new(), HandleTable::new(4))
    }

    #[test]
    fn test_keys_start_at_two() {
        let registry = SharedMemoryRegistry::new();
        assert_eq!(registry.create(4096, SharedMemoryFlags::empty(), 1, 0), Ok(2));
        assert_eq!(registry.create(4096, SharedMemoryFlags::empty(), 1, 0), Ok(3));
        assert_eq!(registry.create(0, SharedMemoryFlags::empty(), 1, 0), Err(Status::InvalidArgument));
    }

    #[test]
    fn test_shared_between_processes() {
        let registry = SharedMemoryRegistry::new();
        let a = process(1);
        let b = process(2);
        let key = registry.create(4096, SharedMemoryFlags::empty(), 1, 0).unwrap();

        let addr_a = registry.map(key, &a, None).unwrap();
        let addr_b = registry.map(key, &b, None).unwrap();
        a.address_space().write(addr_a, b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.address_space().read(addr_b, &mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_private_mapping_restricted() {
        let registry = SharedMemoryRegistry::new();
        let key = registry.create(4096, SharedMemoryFlags::PRIVATE, 1, 2).unwrap();
        assert!(registry.map(key, &process(2), None).is_ok());
        assert_eq!(registry.map(key, &process(3), None), Err(Status::NotPermitted));
    }

    #[test]
    fn test_destroy_waits_for_last_unmap() {
        let registry = SharedMemoryRegistry::new();
        let a = process(1);
        let key = registry.create(4096, SharedMemoryFlags::empty(), 1, 0).unwrap();
        let addr = registry.map(key, &a, None).unwrap();

        assert_eq!(registry.destroy(key, 5), Err(Status::NotPermitted));
        registry.destroy(key, 1).unwrap();
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.map(key, &a, None), Err(Status::NoSuchEntry));

        registry.unmap(&a, addr, key).unwrap();
        assert_eq!(registry.count(), 0);
        assert!(!a.address_space().is_valid_range(addr, 1));
    }

    #[test]
    fn test_unmap_wrong_key_rejected() {
        let registry = SharedMemoryRegistry::new();
        let a = process(1);
        let k1 = registry.create(4096, SharedMemoryFlags::empty(), 1, 0).unwrap();
        let k2 = registry.create(4096, SharedMemoryFlags::empty(), 1, 0).unwrap();
        let addr = registry.map(k1, &a, None).unwrap();
        assert_eq!(registry.unmap(&a, addr, k2), Err(Status::InvalidArgument));
        assert_eq!(registry.unmap(&a, addr, 99), Err(Status::InvalidArgument));
        assert!(a.address_space().is_valid_range(addr, 1));
    }
}
