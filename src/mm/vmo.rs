// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Virtual Memory Objects
//!
//! A VMO is the reference-counted backing store behind a mapped region.
//! Pages are committed on first write; reading an uncommitted page yields
//! zeros. Physical frame allocation sits below this layer.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::PAGE_SIZE;
use crate::error::{KResult, Status};
use crate::sync::SpinMutex;

/// VMO identifier
pub type VmoId = u64;

static NEXT_VMO_ID: AtomicU64 = AtomicU64::new(1);

type Page = Box<[u8; PAGE_SIZE as usize]>;

/// Virtual Memory Object
pub struct VmObject {
    id: VmoId,
    size: u64,
    shared: bool,
    pages: SpinMutex<BTreeMap<u64, Page>>,
    /// Regions currently mapping this object
    mappings: AtomicUsize,
}

impl VmObject {
    /// Create a zero-filled object; `size` is rounded up to whole pages
    pub fn new(size: u64, shared: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_VMO_ID.fetch_add(1, Ordering::Relaxed),
            size: page_align_up(size),
            shared,
            pages: SpinMutex::new(BTreeMap::new()),
            mappings: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> VmoId {
        self.id
    }

    /// Size in bytes (page multiple)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether forks share this object instead of copying it
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Number of regions mapping the object
    pub fn mapping_count(&self) -> usize {
        self.mappings.load(Ordering::Acquire)
    }

    pub(crate) fn add_mapping(&self) {
        self.mappings.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove_mapping(&self) {
        self.mappings.fetch_sub(1, Ordering::AcqRel);
    }

    /// Pages that have been written
    pub fn committed_pages(&self) -> usize {
        self.pages.lock().len()
    }

    fn check(&self, offset: u64, len: usize) -> KResult<()> {
        let end = offset.checked_add(len as u64).ok_or(Status::Fault)?;
        if end > self.size {
            return Err(Status::Fault);
        }
        Ok(())
    }

    /// Read bytes at `offset`
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<()> {
        self.check(offset, buf.len())?;
        let pages = self.pages.lock();
        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let in_page = (pos % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - in_page).min(buf.len() - done);
            let dst = &mut buf[done..done + chunk];
            match pages.get(&(pos / PAGE_SIZE)) {
                Some(page) => dst.copy_from_slice(&page[in_page..in_page + chunk]),
                None => dst.fill(0),
            }
            done += chunk;
        }
        Ok(())
    }

    /// Write bytes at `offset`, committing pages as needed
    pub fn write(&self, offset: u64, data: &[u8]) -> KResult<()> {
        self.check(offset, data.len())?;
        let mut pages = self.pages.lock();
        let mut done = 0usize;
        while done < data.len() {
            let pos = offset + done as u64;
            let in_page = (pos % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - in_page).min(data.len() - done);
            let page = pages
                .entry(pos / PAGE_SIZE)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE as usize]));
            page[in_page..in_page + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Private copy of the contents (used when forking private regions)
    pub fn deep_clone(&self) -> Arc<Self> {
        let pages = self.pages.lock().clone();
        Arc::new(Self {
            id: NEXT_VMO_ID.fetch_add(1, Ordering::Relaxed),
            size: self.size,
            shared: self.shared,
            pages: SpinMutex::new(pages),
            mappings: AtomicUsize::new(0),
        })
    }
}

/// Round up to a page boundary
pub const fn page_align_up(value: u64) -> u64 {
    value.saturating_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Check page alignment
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}
