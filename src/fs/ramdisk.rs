// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Ramdisk (In-Memory Filesystem)
//!
//! A flat, read-only set of files held in kernel memory. Files are either
//! added one at a time or parsed out of a packed boot image.
//!
//! # Image Layout
//!
//! ```text
//! Offset 0x00: Superblock (magic "RUTX", num_files, files_offset)
//! files_offset: File headers (16 bytes each: name_offset, data_offset, size, pad)
//! Names are NUL-terminated, data is contiguous
//! ```
//!
//! All integers are little endian.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{KResult, Status};
use crate::fs::{normalize_path, FsNode, Filesystem, Inode};

/// Superblock magic ("RUTX")
pub const RAMDISK_MAGIC: u32 = 0x5255_5458;

const HEADER_SIZE: usize = 16;
const MAX_NAME: usize = 256;

struct RamdiskFile {
    inode: Inode,
    data: Vec<u8>,
}

/// Ramdisk filesystem
pub struct Ramdisk {
    files: RwLock<BTreeMap<String, RamdiskFile>>,
}

impl Ramdisk {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Parse a packed ramdisk image
    pub fn from_image(image: &[u8]) -> KResult<Self> {
        if read_u32(image, 0)? != RAMDISK_MAGIC {
            return Err(Status::InvalidArgument);
        }
        let count = read_u32(image, 4)? as usize;
        let headers = read_u32(image, 8)? as usize;

        let disk = Self::new();
        for i in 0..count {
            let header = headers + i * HEADER_SIZE;
            let name_offset = read_u32(image, header)? as usize;
            let data_offset = read_u32(image, header + 4)? as usize;
            let size = read_u32(image, header + 8)? as usize;

            let name_bytes = image.get(name_offset..).ok_or(Status::InvalidArgument)?;
            let len = name_bytes
                .iter()
                .take(MAX_NAME)
                .position(|&b| b == 0)
                .ok_or(Status::InvalidArgument)?;
            let name = core::str::from_utf8(&name_bytes[..len]).map_err(|_| Status::InvalidArgument)?;
            let data = image
                .get(data_offset..data_offset + size)
                .ok_or(Status::InvalidArgument)?;
            disk.add_file(name, data);
        }
        log::info!("ramdisk: {} files", count);
        Ok(disk)
    }

    /// Add or replace a file
    pub fn add_file(&self, path: &str, data: &[u8]) -> Inode {
        let path = normalize_path(path, "/");
        let mut files = self.files.write();
        let inode = files.get(&path).map_or(files.len() as Inode + 1, |f| f.inode);
        files.insert(
            path,
            RamdiskFile {
                inode,
                data: data.to_vec(),
            },
        );
        inode
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn list_files(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

impl Default for Ramdisk {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for Ramdisk {
    fn resolve_path(&self, path: &str, cwd: &str) -> Option<FsNode> {
        let path = normalize_path(path, cwd);
        self.files.read().get(&path).map(|f| FsNode {
            inode: f.inode,
            size: f.data.len() as u64,
        })
    }

    fn read(&self, node: &FsNode, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let files = self.files.read();
        let file = files
            .values()
            .find(|f| f.inode == node.inode)
            .ok_or(Status::NoSuchEntry)?;
        let start = usize::try_from(offset).map_err(|_| Status::InvalidArgument)?;
        let Some(rest) = file.data.get(start..) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

fn read_u32(image: &[u8], offset: usize) -> KResult<u32> {
    let bytes = image.get(offset..offset + 4).ok_or(Status::InvalidArgument)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ============================================================================
// Tests
// ============================================================================
