// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Program Image Loading
//!
//! Turning file bytes into a runnable address space is a collaborator of
//! the execution core. [`ImageLoader`] is the narrow interface exec uses;
//! [`FlatImageLoader`] maps a raw image at a fixed base and is what boot
//! and the tests use.
//!
//! # Initial user stack
//!
//! ```text
//! USER_SPACE_END ->  argument and environment strings
//!                    (padding to 16 bytes)
//!                    NULL
//!                    envp[n-1] .. envp[0]
//!                    NULL
//!                    argv[n-1] .. argv[0]
//! rsp ->             argc
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{USER_IMAGE_BASE, USER_SPACE_END};
use crate::error::{KResult, Status};
use crate::mm::page_align_up;
use crate::process::{AddressSpace, MapFlags};

/// Where a freshly loaded image starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry: u64,
    pub stack_pointer: u64,
    pub argc: u64,
    pub argv: u64,
    pub envp: u64,
}

/// Process image loader collaborator
pub trait ImageLoader: Send + Sync {
    /// Map `image` into `space` and build the initial stack
    fn load_image(
        &self,
        image: &[u8],
        argv: &[String],
        envp: &[String],
        space: &AddressSpace,
    ) -> KResult<LoadedImage>;
}

/// Loader for flat binaries whose first byte is the entry point
pub struct FlatImageLoader {
    stack_size: u64,
}

impl FlatImageLoader {
    pub fn new(stack_size: u64) -> Self {
        Self {
            stack_size: page_align_up(stack_size.max(1)),
        }
    }
}

impl ImageLoader for FlatImageLoader {
    fn load_image(
        &self,
        image: &[u8],
        argv: &[String],
        envp: &[String],
        space: &AddressSpace,
    ) -> KResult<LoadedImage> {
        if image.is_empty() {
            return Err(Status::ExecFormat);
        }
        let flags = MapFlags::READ | MapFlags::WRITE | MapFlags::EXEC;
        let base = space.allocate_region(image.len() as u64, Some(USER_IMAGE_BASE), true, flags)?;
        space.write(base, image)?;

        let stack_base = USER_SPACE_END - self.stack_size;
        space.allocate_region(self.stack_size, Some(stack_base), true, MapFlags::RW)?;
        let mut stack = StackBuilder::new(space, USER_SPACE_END, stack_base);

        let argv_ptrs = argv.iter().map(|s| stack.push_str(s)).collect::<KResult<Vec<u64>>>()?;
        let envp_ptrs = envp.iter().map(|s| stack.push_str(s)).collect::<KResult<Vec<u64>>>()?;

        // argc + argv + NULL + envp + NULL, keeping rsp 16-byte aligned
        let words = 1 + argv_ptrs.len() + 1 + envp_ptrs.len() + 1;
        stack.align(16);
        if words % 2 == 1 {
            stack.push_u64(0)?;
        }
        stack.push_u64(0)?;
        for &ptr in envp_ptrs.iter().rev() {
            stack.push_u64(ptr)?;
        }
        let envp_addr = stack.sp();
        stack.push_u64(0)?;
        for &ptr in argv_ptrs.iter().rev() {
            stack.push_u64(ptr)?;
        }
        let argv_addr = stack.sp();
        stack.push_u64(argv_ptrs.len() as u64)?;

        Ok(LoadedImage {
            entry: base,
            stack_pointer: stack.sp(),
            argc: argv_ptrs.len() as u64,
            argv: argv_addr,
            envp: envp_addr,
        })
    }
}

/// Pushes data downwards onto a user stack
struct StackBuilder<'a> {
    space: &'a AddressSpace,
    sp: u64,
    limit: u64,
}

impl<'a> StackBuilder<'a> {
    fn new(space: &'a AddressSpace, top: u64, limit: u64) -> Self {
        Self { space, sp: top, limit }
    }

    fn sp(&self) -> u64 {
        self.sp
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> KResult<u64> {
        let sp = self
            .sp
            .checked_sub(bytes.len() as u64)
            .filter(|&sp| sp >= self.limit)
            .ok_or(Status::NoMemory)?;
        self.space.write(sp, bytes)?;
        self.sp = sp;
        Ok(sp)
    }

    fn push_str(&mut self, s: &str) -> KResult<u64> {
        self.push_bytes(&[0])?;
        self.push_bytes(s.as_bytes())
    }

    fn push_u64(&mut self, value: u64) -> KResult<u64> {
        self.push_bytes(&value.to_le_bytes())
    }

    fn align(&mut self, to: u64) {
        self.sp &= !(to - 1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u64(space: &AddressSpace, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        space.read(addr, &mut buf).unwrap();
        u64::from_le_bytes(buf)
    }

    #[test]
    fn test_empty_image_rejected() {
        let space = AddressSpace::new();
        let loader = FlatImageLoader::new(4096);
        assert_eq!(loader.load_image(&[], &[], &[], &space), Err(Status::ExecFormat));
    }

    #[test]
    fn test_initial_stack_layout() {
        let space = AddressSpace::new();
        let loader = FlatImageLoader::new(16 * 1024);
        let argv = [String::from("init"), String::from("-v")];
        let envp = [String::from("HOME=/")];
        let loaded = loader.load_image(&[0x90, 0xC3], &argv, &envp, &space).unwrap();

        assert_eq!(loaded.entry, USER_IMAGE_BASE);
        assert_eq!(loaded.stack_pointer % 16, 0);
        assert_eq!(read_u64(&space, loaded.stack_pointer), 2);
        assert_eq!(loaded.argv, loaded.stack_pointer + 8);

        let arg1 = read_u64(&space, loaded.argv + 8);
        let mut buf = [0u8; 3];
        space.read(arg1, &mut buf).unwrap();
        assert_eq!(&buf, b"-v\0");
        assert_eq!(read_u64(&space, loaded.argv + 16), 0);
        assert_ne!(read_u64(&space, loaded.envp), 0);
        assert_eq!(read_u64(&space, loaded.envp + 8), 0);

        let mut code = [0u8; 2];
        space.read(USER_IMAGE_BASE, &mut code).unwrap();
        assert_eq!(code, [0x90, 0xC3]);
    }
}
