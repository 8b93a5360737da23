// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! System Call Interface
//!
//! A single entry point receives the call number in rax and up to six
//! arguments, looks the number up, and runs the handler on behalf of the
//! calling thread.
//!
//! # Calling Convention
//!
//! | Syscall Instruction | Arg Registers | Number | Return |
//! |---------------------|---------------|--------|--------|
//! | `syscall` | rdi, rsi, rdx, r10, r8, r9 | rax | rax |
//!
//! # Error Return Convention
//!
//! ```text
//! Success: return value in rax (positive or zero)
//! Failure: return negative errno
//! ```
//!
//! # Dispatch
//!
//! 1. Unknown numbers fail with `NotImplemented` before any state is touched
//! 2. The thread's kernel re-entrancy lock is taken, yielding while held
//! 3. Preemption is enabled for the duration of the handler
//! 4. Handlers validate every user pointer through [`usercopy`]
//! 5. A due alarm is raised, then pending unmasked signals are delivered
//!    before returning
//! 6. A thread killed during the call never returns to user mode

pub mod usercopy;

mod ipc;
mod memory;
mod object;
mod process;
mod sync;
mod time;

use alloc::sync::Arc;

use crate::arch::{self, RegisterContext};
use crate::error::{KResult, Status};
use crate::kernel::Kernel;
use crate::object::{HandleFlags, KernelObject};
use crate::process::{AddressSpace, Process};
use crate::sched::signal;
use crate::sched::Thread;

// ============================================================================
// Common Syscall Types
// ============================================================================

// Syscall return type
pub type SyscallRet = isize;

/// System call arguments
///
/// Arguments come from rdi, rsi, rdx, r10, r8, r9 in that order; the
/// number comes from rax.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    /// Syscall number
    pub number: u32,

    /// Arguments (up to 6)
    pub args: [usize; 6],
}

impl SyscallArgs {
    /// Create new syscall arguments
    pub const fn new(number: u32, args: [usize; 6]) -> Self {
        Self { number, args }
    }

    /// Capture the call from a saved register file
    ///
    /// A number that does not fit in 32 bits maps to `u32::MAX`, which is
    /// never a valid call.
    pub fn from_registers(regs: &RegisterContext) -> Self {
        let number = u32::try_from(regs.syscall_number()).unwrap_or(u32::MAX);
        Self::new(number, regs.syscall_args())
    }

    /// Get argument at index
    pub const fn arg(&self, index: usize) -> usize {
        if index < 6 {
            self.args[index]
        } else {
            0
        }
    }

    /// Get argument as u32
    pub const fn arg_u32(&self, index: usize) -> u32 {
        self.arg(index) as u32
    }

    /// Get argument as u64
    pub const fn arg_u64(&self, index: usize) -> u64 {
        self.arg(index) as u64
    }

    /// Get argument as i64
    pub const fn arg_i64(&self, index: usize) -> i64 {
        self.arg(index) as i64
    }

    /// Get argument as i32
    pub const fn arg_i32(&self, index: usize) -> i32 {
        self.arg(index) as i32
    }

    /// Get a pointer argument; zero means absent
    pub const fn arg_ptr(&self, index: usize) -> Option<u64> {
        match self.arg(index) {
            0 => None,
            ptr => Some(ptr as u64),
        }
    }
}

/// Convert error code to negative return value
#[inline]
pub const fn err_to_ret(err: Status) -> SyscallRet {
    -(err as i32 as SyscallRet)
}

/// Convert success value to return value
#[inline]
pub const fn ok_to_ret(val: usize) -> SyscallRet {
    val as SyscallRet
}

/// How a syscall left the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallExit {
    /// Resume user mode with the registers as updated
    Return,
    /// The thread is gone and must never run user code again
    Exited,
}

/// State a handler runs with
pub(crate) struct SyscallContext<'a> {
    pub kernel: &'a Kernel,
    pub thread: &'a Arc<Thread>,
    pub process: &'a Arc<Process>,
    pub regs: &'a mut RegisterContext,
    pub args: SyscallArgs,
}

impl SyscallContext<'_> {
    pub fn space(&self) -> &AddressSpace {
        self.process.address_space()
    }

    /// Give the caller a handle to a freshly created object
    ///
    /// If the handle table is full the object is destroyed again.
    pub fn install(&self, object: Arc<dyn KernelObject>) -> KResult<usize> {
        match self.process.handles().allocate(object.clone(), HandleFlags::empty()) {
            Ok(id) => Ok(id as usize),
            Err(status) => {
                crate::object::discard(object.as_ref());
                Err(status)
            }
        }
    }
}

type SyscallHandler = fn(&mut SyscallContext<'_>) -> KResult<usize>;

// ============================================================================
// Syscall Dispatcher
// ============================================================================

fn lookup(num: u32) -> Option<SyscallHandler> {
    let handler: SyscallHandler = match num {
        // Process, thread and signals (0x01-0x0F)
        number::EXIT => process::sys_exit,
        number::FORK => process::sys_fork,
        number::EXEC => process::sys_exec,
        number::WAIT_PID => process::sys_wait_pid,
        number::SPAWN_THREAD => process::sys_spawn_thread,
        number::EXIT_THREAD => process::sys_exit_thread,
        number::INTERRUPT_THREAD => process::sys_interrupt_thread,
        number::GET_PID => process::sys_get_pid,
        number::GET_TID => process::sys_get_tid,
        number::GET_PPID => process::sys_get_ppid,
        number::YIELD => process::sys_yield,
        number::KILL => process::sys_kill,
        number::SIGNAL_ACTION => process::sys_signal_action,
        number::SIGNAL_MASK => process::sys_signal_mask,
        number::SIGNAL_RETURN => process::sys_signal_return,

        // Futex (0x10-0x1F)
        number::FUTEX_WAIT => sync::sys_futex_wait,
        number::FUTEX_WAKE => sync::sys_futex_wake,

        // IPC (0x20-0x2F)
        number::CREATE_SERVICE => ipc::sys_create_service,
        number::CREATE_INTERFACE => ipc::sys_create_interface,
        number::INTERFACE_ACCEPT => ipc::sys_interface_accept,
        number::INTERFACE_CONNECT => ipc::sys_interface_connect,
        number::ENDPOINT_QUEUE => ipc::sys_endpoint_queue,
        number::ENDPOINT_DEQUEUE => ipc::sys_endpoint_dequeue,
        number::ENDPOINT_CALL => ipc::sys_endpoint_call,
        number::ENDPOINT_INFO => ipc::sys_endpoint_info,

        // Kernel objects and handles (0x30-0x3F)
        number::OBJECT_WAIT_ONE => object::sys_object_wait_one,
        number::OBJECT_WAIT => object::sys_object_wait,
        number::OBJECT_DESTROY => object::sys_object_destroy,
        number::HANDLE_SET_FLAGS => object::sys_handle_set_flags,

        // Memory (0x40-0x4F)
        number::CREATE_SHARED_MEMORY => memory::sys_create_shared_memory,
        number::MAP_SHARED_MEMORY => memory::sys_map_shared_memory,
        number::UNMAP_SHARED_MEMORY => memory::sys_unmap_shared_memory,
        number::DESTROY_SHARED_MEMORY => memory::sys_destroy_shared_memory,
        number::MAP_ANONYMOUS => memory::sys_map_anonymous,
        number::UNMAP => memory::sys_unmap,

        // Credentials (0x50-0x5F)
        number::GET_UID => process::sys_get_uid,
        number::GET_GID => process::sys_get_gid,
        number::GET_EUID => process::sys_get_euid,
        number::GET_EGID => process::sys_get_egid,
        number::SET_UID => process::sys_set_uid,
        number::SET_EUID => process::sys_set_euid,

        // Time (0x60-0x6F)
        number::SLEEP => time::sys_sleep,
        number::NANO_SLEEP => time::sys_nano_sleep,
        number::UPTIME => time::sys_uptime,
        number::ALARM => time::sys_alarm,

        // Process information (0x70-0x7F)
        number::GET_PROCESS_INFO => process::sys_get_process_info,
        number::GET_NEXT_PROCESS_INFO => process::sys_get_next_process_info,

        _ => return None,
    };
    Some(handler)
}

/// System call dispatcher
///
/// Runs the call held in `regs` for `thread` and writes the result back
/// into rax. Returns [`SyscallExit::Exited`] when the thread was killed,
/// in which case it has already been retired from its process and the
/// scheduler.
pub fn dispatch(kernel: &Kernel, thread: &Arc<Thread>, regs: &mut RegisterContext) -> SyscallExit {
    let args = SyscallArgs::from_registers(regs);
    let Some(handler) = lookup(args.number) else {
        log::warn!("tid {}: unknown syscall {:#x}", thread.tid(), regs.syscall_number());
        regs.set_return(err_to_ret(Status::NotImplemented));
        return SyscallExit::Return;
    };

    while !thread.try_enter_kernel() {
        arch::yield_cpu();
    }
    thread.set_preemptible(true);

    let process = thread.process();
    match &process {
        Some(process) => {
            #[cfg(feature = "trace-syscalls")]
            log::trace!(
                "pid {} tid {}: syscall {:#x} {:x?}",
                process.pid(),
                thread.tid(),
                args.number,
                args.args
            );

            let mut ctx = SyscallContext {
                kernel,
                thread,
                process,
                regs: &mut *regs,
                args,
            };
            let ret = match handler(&mut ctx) {
                Ok(value) => ok_to_ret(value),
                Err(status) => err_to_ret(status),
            };
            regs.set_return(ret);

            if !thread.is_exiting() {
                process.fire_alarm(arch::now_ns());
                signal::deliver_pending(kernel, thread, process, regs);
            }
        }
        None => regs.set_return(err_to_ret(Status::NoSuchProcess)),
    }

    thread.leave_kernel();
    if thread.is_exiting() {
        match &process {
            Some(process) => kernel.retire_thread(process, thread),
            None => thread.finish_exit(),
        }
        return SyscallExit::Exited;
    }
    thread.set_registers(*regs);
    SyscallExit::Return
}

/// Trap glue for the `syscall` instruction
///
/// Preemption is off on entry, as it is for any trap. A thread that must
/// not return to user mode parks here; the scheduler has already dropped
/// it, so the CPU moves on to other work.
pub fn syscall_entry(kernel: &Kernel, thread: &Arc<Thread>, regs: &mut RegisterContext) {
    thread.set_preemptible(false);
    if kernel.handle_syscall(thread, regs) == SyscallExit::Exited {
        loop {
            arch::yield_cpu();
        }
    }
}

// ============================================================================
// Syscall Numbers
// ============================================================================

/// System call numbers
pub mod number {
    /// Process, thread and signals (0x01-0x0F)
    pub const EXIT: u32 = 0x01;
    pub const FORK: u32 = 0x02;
    pub const EXEC: u32 = 0x03;
    pub const WAIT_PID: u32 = 0x04;
    pub const SPAWN_THREAD: u32 = 0x05;
    pub const EXIT_THREAD: u32 = 0x06;
    pub const INTERRUPT_THREAD: u32 = 0x07;
    pub const GET_PID: u32 = 0x08;
    pub const GET_TID: u32 = 0x09;
    pub const GET_PPID: u32 = 0x0A;
    pub const YIELD: u32 = 0x0B;
    pub const KILL: u32 = 0x0C;
    pub const SIGNAL_ACTION: u32 = 0x0D;
    pub const SIGNAL_MASK: u32 = 0x0E;
    pub const SIGNAL_RETURN: u32 = 0x0F;

    /// Futex (0x10-0x1F)
    pub const FUTEX_WAIT: u32 = 0x10;
    pub const FUTEX_WAKE: u32 = 0x11;

    /// IPC (0x20-0x2F)
    pub const CREATE_SERVICE: u32 = 0x20;
    pub const CREATE_INTERFACE: u32 = 0x21;
    pub const INTERFACE_ACCEPT: u32 = 0x22;
    pub const INTERFACE_CONNECT: u32 = 0x23;
    pub const ENDPOINT_QUEUE: u32 = 0x24;
    pub const ENDPOINT_DEQUEUE: u32 = 0x25;
    pub const ENDPOINT_CALL: u32 = 0x26;
    pub const ENDPOINT_INFO: u32 = 0x27;

    /// Kernel objects and handles (0x30-0x3F)
    pub const OBJECT_WAIT_ONE: u32 = 0x30;
    pub const OBJECT_WAIT: u32 = 0x31;
    pub const OBJECT_DESTROY: u32 = 0x32;
    pub const HANDLE_SET_FLAGS: u32 = 0x33;

    /// Memory (0x40-0x4F)
    pub const CREATE_SHARED_MEMORY: u32 = 0x40;
    pub const MAP_SHARED_MEMORY: u32 = 0x41;
    pub const UNMAP_SHARED_MEMORY: u32 = 0x42;
    pub const DESTROY_SHARED_MEMORY: u32 = 0x43;
    pub const MAP_ANONYMOUS: u32 = 0x44;
    pub const UNMAP: u32 = 0x45;

    /// Credentials (0x50-0x5F)
    pub const GET_UID: u32 = 0x50;
    pub const GET_GID: u32 = 0x51;
    pub const GET_EUID: u32 = 0x52;
    pub const GET_EGID: u32 = 0x53;
    pub const SET_UID: u32 = 0x54;
    pub const SET_EUID: u32 = 0x55;

    /// Time (0x60-0x6F)
    pub const SLEEP: u32 = 0x60;
    pub const NANO_SLEEP: u32 = 0x61;
    pub const UPTIME: u32 = 0x62;
    pub const ALARM: u32 = 0x63;

    /// Process information (0x70-0x7F)
    pub const GET_PROCESS_INFO: u32 = 0x70;
    pub const GET_NEXT_PROCESS_INFO: u32 = 0x71;

    /// Maximum defined syscall number
    pub const MAX_SYSCALL: u32 = 0x71;
}
