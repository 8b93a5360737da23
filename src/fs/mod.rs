// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Filesystem Layer
//!
//! The execution core only needs two things from a filesystem: turn a path
//! into a node, and read bytes from a node. Concrete filesystems live
//! outside this crate; [`Ramdisk`] is the in-memory one used for boot
//! modules and tests.

pub mod ramdisk;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KResult, Status};

pub use ramdisk::Ramdisk;

/// Opaque node identifier issued by a filesystem
pub type Inode = u64;

/// A resolved filesystem node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNode {
    pub inode: Inode,
    pub size: u64,
}

/// Filesystem collaborator
pub trait Filesystem: Send + Sync {
    /// Resolve `path`, relative paths against `cwd`
    fn resolve_path(&self, path: &str, cwd: &str) -> Option<FsNode>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    fn read(&self, node: &FsNode, offset: u64, buf: &mut [u8]) -> KResult<usize>;

    /// Read a whole node
    fn read_all(&self, node: &FsNode) -> KResult<Vec<u8>> {
        let len = usize::try_from(node.size).map_err(|_| Status::NoMemory)?;
        let mut data = alloc::vec![0u8; len];
        let mut done = 0;
        while done < len {
            let n = self.read(node, done as u64, &mut data[done..])?;
            if n == 0 {
                return Err(Status::Io);
            }
            done += n;
        }
        Ok(data)
    }
}

/// Join `path` onto `cwd` and collapse `.` and `..` components
pub fn normalize_path(path: &str, cwd: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let base = if path.starts_with('/') { "" } else { cwd };
    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/bin/init", "/"), "/bin/init");
        assert_eq!(normalize_path("init", "/bin"), "/bin/init");
        assert_eq!(normalize_path("../lib/./x", "/bin"), "/lib/x");
        assert_eq!(normalize_path("..", "/"), "/");
    }
}
