// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Integration Tests
//!
//! These tests drive whole processes through the syscall entry point, the
//! way user code would: arguments go in registers, pointers refer to
//! memory mapped into the calling process, and results come back in rax.
//! Host threads stand in for CPUs when a test needs something to block.

mod ipc_tests;

use alloc::string::String;
use alloc::sync::Arc;

use crate::arch::RegisterContext;
use crate::config::{KernelConfig, PAGE_SIZE};
use crate::exec::FlatImageLoader;
use crate::fs::Ramdisk;
use crate::kernel::Kernel;
use crate::process::{MapFlags, Process};
use crate::sched::Thread;
use crate::syscall::{SyscallExit, SyscallRet};

/// Size of the scratch mapping every test process gets
pub const SCRATCH_SIZE: u64 = 4 * PAGE_SIZE;

/// A kernel with a few programs on its ramdisk
pub fn kernel() -> Kernel {
    kernel_with(KernelConfig::default())
}

pub fn kernel_with(config: KernelConfig) -> Kernel {
    let fs = Ramdisk::new();
    fs.add_file("/bin/init", &[0x90; 64]);
    fs.add_file("/bin/server", &[0xCC; 128]);
    fs.add_file("/bin/client", &[0xF4; 96]);
    Kernel::new(config, Arc::new(fs), Arc::new(FlatImageLoader::new(16 * 1024)))
}

/// A running user process as seen from its main thread
pub struct User {
    pub process: Arc<Process>,
    pub thread: Arc<Thread>,
    /// Base of a read/write scratch region for syscall arguments
    pub scratch: u64,
}

impl User {
    pub fn spawn(kernel: &Kernel, path: &str) -> Self {
        let process = kernel
            .spawn_image(path, &[String::from(path)], &[], None)
            .unwrap();
        Self::attach(process)
    }

    pub fn attach(process: Arc<Process>) -> Self {
        let thread = process.main_thread().unwrap();
        let scratch = process
            .address_space()
            .allocate_region(SCRATCH_SIZE, None, false, MapFlags::RW)
            .unwrap();
        Self {
            process,
            thread,
            scratch,
        }
    }

    pub fn pid(&self) -> i64 {
        self.process.pid()
    }

    /// Issue syscall `number` from the main thread
    pub fn call(&self, kernel: &Kernel, number: u32, args: &[u64]) -> SyscallRet {
        self.call_full(kernel, number, args).0
    }

    /// Issue a syscall and also report how the thread left the kernel
    pub fn call_full(&self, kernel: &Kernel, number: u32, args: &[u64]) -> (SyscallRet, SyscallExit) {
        let mut regs = self.thread.registers();
        let exit = invoke(kernel, &self.thread, &mut regs, number, args);
        (regs.rax as SyscallRet, exit)
    }

    /// Address `offset` bytes into the scratch region
    pub fn at(&self, offset: u64) -> u64 {
        self.scratch + offset
    }

    pub fn poke(&self, offset: u64, data: &[u8]) -> u64 {
        let addr = self.at(offset);
        self.process.address_space().write(addr, data).unwrap();
        addr
    }

    /// Store a NUL-terminated string in scratch memory
    pub fn poke_str(&self, offset: u64, s: &str) -> u64 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.poke(offset, &bytes)
    }

    pub fn poke_u64(&self, offset: u64, value: u64) -> u64 {
        self.poke(offset, &value.to_le_bytes())
    }

    pub fn peek(&self, offset: u64, len: usize) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0u8; len];
        self.process.address_space().read(self.at(offset), &mut buf).unwrap();
        buf
    }

    pub fn peek_u64(&self, offset: u64) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.peek(offset, 8));
        u64::from_le_bytes(raw)
    }

    pub fn peek_i32(&self, offset: u64) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.peek(offset, 4));
        i32::from_le_bytes(raw)
    }
}

/// Load `number` and `args` into `regs` and enter the kernel
pub fn invoke(
    kernel: &Kernel,
    thread: &Arc<Thread>,
    regs: &mut RegisterContext,
    number: u32,
    args: &[u64],
) -> SyscallExit {
    let mut slots = [0u64; 6];
    slots[..args.len()].copy_from_slice(args);
    regs.rax = u64::from(number);
    regs.rdi = slots[0];
    regs.rsi = slots[1];
    regs.rdx = slots[2];
    regs.r10 = slots[3];
    regs.r8 = slots[4];
    regs.r9 = slots[5];
    kernel.handle_syscall(thread, regs)
}

/// Spin until `cond` holds, failing the test after a few seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !cond() {
        assert!(start.elapsed() < std::time::Duration::from_secs(5), "condition never became true");
        std::thread::yield_now();
    }
}
