// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Address Space Implementation
//!
//! A process's user address space as a map of regions, each backed by a
//! [`VmObject`]. This is the region allocator the rest of the kernel uses
//! (`allocate_region`, `unmap`), and the only path through which user
//! memory is read or written: every access is range-checked against the
//! mapped regions first.
//!
//! # Design
//!
//! - **Regions** never overlap and are keyed by base address
//! - **Validation**: canonical address, no overflow, inside user space,
//!   fully covered by regions with the required permission
//! - **Fork**: private regions get a copied VMO, shared regions keep theirs

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use x86_64::VirtAddr;

use crate::config::{USER_MMAP_BASE, USER_SPACE_END, USER_SPACE_START};
use crate::error::{KResult, Status};
use crate::mm::vmo::{is_page_aligned, page_align_up, VmObject};
use crate::sync::SpinMutex;

bitflags! {
    /// Region permissions and sharing
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// Backed by a shared object; forks share instead of copy
        const SHARED = 1 << 3;
    }
}

impl MapFlags {
    /// Read/write anonymous memory
    pub const RW: Self = Self::READ.union(Self::WRITE);
}

/// A mapping of part of a VMO into the address space
struct Region {
    base: u64,
    size: u64,
    vmo: Arc<VmObject>,
    offset: u64,
    flags: MapFlags,
}

impl Region {
    fn new(base: u64, size: u64, vmo: Arc<VmObject>, offset: u64, flags: MapFlags) -> Self {
        vmo.add_mapping();
        Self { base, size, vmo, offset, flags }
    }

    fn end(&self) -> u64 {
        self.base + self.size
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.vmo.remove_mapping();
    }
}

/// Public description of a mapped region
#[derive(Clone)]
pub struct RegionInfo {
    pub base: u64,
    pub size: u64,
    pub vmo: Arc<VmObject>,
    pub flags: MapFlags,
}

/// Address Space
pub struct AddressSpace {
    regions: SpinMutex<BTreeMap<u64, Region>>,
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new() -> Self {
        Self {
            regions: SpinMutex::new(BTreeMap::new()),
        }
    }

    /// Map fresh zeroed memory
    ///
    /// Without `fixed` the hint is only where the search starts. With
    /// `fixed` the region lands exactly at `hint`, replacing whatever was
    /// mapped there.
    pub fn allocate_region(&self, size: u64, hint: Option<u64>, fixed: bool, flags: MapFlags) -> KResult<u64> {
        let vmo = VmObject::new(size, false);
        self.map_object(vmo, hint, fixed, flags - MapFlags::SHARED)
    }

    /// Map all of `vmo`
    pub fn map_object(&self, vmo: Arc<VmObject>, hint: Option<u64>, fixed: bool, flags: MapFlags) -> KResult<u64> {
        let size = vmo.size();
        if size == 0 {
            return Err(Status::InvalidArgument);
        }
        let flags = if vmo.is_shared() { flags | MapFlags::SHARED } else { flags };

        let mut regions = self.regions.lock();
        let base = if fixed {
            let base = hint.ok_or(Status::InvalidArgument)?;
            if !is_page_aligned(base) || !in_user_space(base, size) {
                return Err(Status::InvalidArgument);
            }
            unmap_locked(&mut regions, base, size);
            base
        } else {
            let start = hint.map(page_align_up).unwrap_or(USER_MMAP_BASE);
            find_free(&regions, start, size)
                .or_else(|| find_free(&regions, USER_MMAP_BASE, size))
                .or_else(|| find_free(&regions, USER_SPACE_START, size))
                .ok_or(Status::NoMemory)?
        };
        regions.insert(base, Region::new(base, size, vmo, 0, flags));
        Ok(base)
    }

    /// Unmap `[addr, addr + size)`, splitting regions that straddle it
    pub fn unmap(&self, addr: u64, size: u64) -> KResult<()> {
        let size = page_align_up(size);
        if size == 0 || !is_page_aligned(addr) || addr.checked_add(size).is_none() {
            return Err(Status::InvalidArgument);
        }
        unmap_locked(&mut self.regions.lock(), addr, size);
        Ok(())
    }

    /// Remove the whole region containing `addr` if `vmo` backs it
    pub fn unmap_region_of(&self, addr: u64, vmo: &Arc<VmObject>) -> KResult<()> {
        let mut regions = self.regions.lock();
        let base = match regions.range(..=addr).next_back() {
            Some((&base, region)) if addr < region.end() && Arc::ptr_eq(&region.vmo, vmo) => base,
            _ => return Err(Status::InvalidArgument),
        };
        regions.remove(&base);
        Ok(())
    }

    /// Region containing `addr`
    pub fn region_at(&self, addr: u64) -> Option<RegionInfo> {
        let regions = self.regions.lock();
        let (_, region) = regions.range(..=addr).next_back()?;
        (addr < region.end()).then(|| RegionInfo {
            base: region.base,
            size: region.size,
            vmo: region.vmo.clone(),
            flags: region.flags,
        })
    }

    /// Validate that `[addr, addr + len)` is mapped user memory
    pub fn check_range(&self, addr: u64, len: usize, write: bool) -> KResult<()> {
        self.walk(addr, len, write, |_, _, _| Ok(()))
    }

    /// Check a user pointer without reporting why it is bad
    pub fn is_valid_range(&self, addr: u64, len: usize) -> bool {
        self.check_range(addr, len, false).is_ok()
    }

    /// Copy user memory into `buf`
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> KResult<()> {
        let len = buf.len();
        self.check_range(addr, len, false)?;
        self.walk(addr, len, false, |vmo, offset, range| {
            vmo.read(offset, &mut buf[range])
        })
    }

    /// Copy `data` into user memory
    pub fn write(&self, addr: u64, data: &[u8]) -> KResult<()> {
        self.check_range(addr, data.len(), true)?;
        self.walk(addr, data.len(), true, |vmo, offset, range| {
            vmo.write(offset, &data[range])
        })
    }

    /// Visit the VMO pieces backing a validated range
    fn walk<F>(&self, addr: u64, len: usize, write: bool, mut visit: F) -> KResult<()>
    where
        F: FnMut(&VmObject, u64, core::ops::Range<usize>) -> KResult<()>,
    {
        if len == 0 {
            return Ok(());
        }
        VirtAddr::try_new(addr).map_err(|_| Status::Fault)?;
        let end = addr.checked_add(len as u64).ok_or(Status::Fault)?;
        if addr < USER_SPACE_START || end > USER_SPACE_END {
            return Err(Status::Fault);
        }

        let regions = self.regions.lock();
        let mut cursor = addr;
        while cursor < end {
            let (_, region) = regions.range(..=cursor).next_back().ok_or(Status::Fault)?;
            if cursor >= region.end() {
                return Err(Status::Fault);
            }
            let needed = if write { MapFlags::WRITE } else { MapFlags::READ };
            if !region.flags.contains(needed) {
                return Err(Status::Fault);
            }
            let piece_end = end.min(region.end());
            let range = (cursor - addr) as usize..(piece_end - addr) as usize;
            visit(&region.vmo, region.offset + (cursor - region.base), range)?;
            cursor = piece_end;
        }
        Ok(())
    }

    /// Copy for a forked child
    pub fn fork_clone(&self) -> Self {
        let regions = self.regions.lock();
        let cloned = regions
            .values()
            .map(|r| {
                let vmo = if r.flags.contains(MapFlags::SHARED) {
                    r.vmo.clone()
                } else {
                    r.vmo.deep_clone()
                };
                (r.base, Region::new(r.base, r.size, vmo, r.offset, r.flags))
            })
            .collect();
        Self {
            regions: SpinMutex::new(cloned),
        }
    }

    /// Unmap everything, returning the number of regions removed
    pub fn clear(&self) -> usize {
        let regions = core::mem::take(&mut *self.regions.lock());
        regions.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// Total bytes mapped
    pub fn mapped_bytes(&self) -> u64 {
        self.regions.lock().values().map(|r| r.size).sum()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn in_user_space(base: u64, size: u64) -> bool {
    base >= USER_SPACE_START && base.checked_add(size).map_or(false, |end| end <= USER_SPACE_END)
}

/// First gap of `size` bytes at or above `start`
fn find_free(regions: &BTreeMap<u64, Region>, start: u64, size: u64) -> Option<u64> {
    let mut candidate = start.max(USER_SPACE_START);
    // A region starting below `start` may still cover it
    if let Some((_, r)) = regions.range(..candidate).next_back() {
        candidate = candidate.max(r.end());
    }
    for region in regions.range(candidate..).map(|(_, r)| r) {
        if candidate.checked_add(size)? <= region.base {
            break;
        }
        candidate = candidate.max(region.end());
    }
    in_user_space(candidate, size).then_some(candidate)
}

fn unmap_locked(regions: &mut BTreeMap<u64, Region>, addr: u64, size: u64) {
    let end = addr + size;
    let overlapping: Vec<u64> = regions
        .range(..end)
        .filter(|(_, r)| r.end() > addr)
        .map(|(&base, _)| base)
        .collect();

    for base in overlapping {
        let Some(region) = regions.remove(&base) else {
            continue;
        };
        if region.base < addr {
            let head = Region::new(region.base, addr - region.base, region.vmo.clone(), region.offset, region.flags);
            regions.insert(head.base, head);
        }
        if region.end() > end {
            let offset = region.offset + (end - region.base);
            let tail = Region::new(end, region.end() - end, region.vmo.clone(), offset, region.flags);
            regions.insert(tail.base, tail);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
