// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Process, thread, signal and credential syscalls

use crate::arch::RegisterContext;
use crate::config::{MAX_EXEC_ARGS, MAX_PATH_LENGTH};
use crate::error::{KResult, Status};
use crate::kernel::{ExecFlags, WaitFlags};
use crate::process::{Credentials, ProcessInfo};
use crate::sched::signal::{self, Signal, SignalHandler};

use super::usercopy;
use super::SyscallContext;

/// `how` values for signal_mask
pub const SIG_BLOCK: usize = 0;
pub const SIG_UNBLOCK: usize = 1;
pub const SIG_SETMASK: usize = 2;

// ============================================================================
// Lifecycle
// ============================================================================

pub fn sys_exit(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let code = ctx.args.arg_i32(0);
    ctx.kernel.terminate_process(ctx.process, code);
    Ok(0)
}

pub fn sys_fork(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let child = ctx.kernel.fork(ctx.process, ctx.regs)?;
    Ok(child.pid() as usize)
}

pub fn sys_exec(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let flags = ExecFlags::from_bits(ctx.args.arg_u64(4)).ok_or(Status::InvalidArgument)?;
    let space = ctx.space();
    let path = usercopy::read_string(space, ctx.args.arg_u64(0), MAX_PATH_LENGTH)?;
    let argc = ctx.args.arg(1);
    if argc > MAX_EXEC_ARGS {
        return Err(Status::InvalidArgument);
    }
    let argv = usercopy::read_string_array(space, ctx.args.arg_u64(2), argc, MAX_PATH_LENGTH)?;
    let envp = usercopy::read_string_list(space, ctx.args.arg_u64(3), MAX_PATH_LENGTH)?;

    let process = ctx.kernel.exec(ctx.process, &path, &argv, &envp, flags)?;
    Ok(process.pid() as usize)
}

pub fn sys_wait_pid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let pid = ctx.args.arg_i64(0);
    let status = ctx.args.arg_ptr(1);
    let flags = WaitFlags::from_bits(ctx.args.arg_u64(2)).ok_or(Status::InvalidArgument)?;
    // Check the status slot up front so a reaped child is never lost
    if let Some(status) = status {
        usercopy::check(ctx.space(), status, 4, true)?;
    }

    match ctx.kernel.wait_pid(ctx.process, ctx.thread, pid, flags)? {
        Some((child, code)) => {
            if let Some(status) = status {
                usercopy::write_i32(ctx.space(), status, code)?;
            }
            Ok(child as usize)
        }
        None => Ok(0),
    }
}

pub fn sys_spawn_thread(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let entry = ctx.args.arg_u64(0);
    let stack = ctx.args.arg_u64(1);
    usercopy::check(ctx.space(), entry, 1, false)?;

    let registers = RegisterContext::for_entry(entry, stack);
    let thread = ctx.kernel.spawn_thread(ctx.process, registers)?;
    log::debug!("pid {}: spawned tid {}", ctx.process.pid(), thread.tid());
    Ok(thread.tid() as usize)
}

pub fn sys_exit_thread(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    ctx.kernel.exit_thread(ctx.process, ctx.thread);
    Ok(0)
}

pub fn sys_interrupt_thread(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let tid = ctx.args.arg_u64(0);
    let thread = ctx.process.find_thread(tid).ok_or(Status::NoSuchProcess)?;
    thread.interrupt();
    Ok(0)
}

pub fn sys_get_pid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.process.pid() as usize)
}

pub fn sys_get_tid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.thread.tid() as usize)
}

pub fn sys_get_ppid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.process.ppid() as usize)
}

pub fn sys_yield(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    match ctx.thread.cpu() {
        Some(cpu) => {
            ctx.kernel.scheduler().yield_current(cpu);
        }
        None => crate::arch::yield_cpu(),
    }
    Ok(0)
}

// ============================================================================
// Signals
// ============================================================================

pub fn sys_kill(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let pid = ctx.args.arg_i64(0);
    let sig = ctx.args.arg_u32(1) as Signal;
    ctx.kernel.kill(ctx.process, pid, sig)?;
    Ok(0)
}

fn read_handler(ctx: &SyscallContext<'_>, addr: u64) -> KResult<SignalHandler> {
    let mut words = [0u64; SignalHandler::USER_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = usercopy::read_u64(ctx.space(), addr + i as u64 * 8)?;
    }
    SignalHandler::from_user(words)
}

pub fn sys_signal_action(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let sig = ctx.args.arg_u32(0) as Signal;
    if !signal::is_valid(sig) {
        return Err(Status::InvalidArgument);
    }
    let new = ctx.args.arg_ptr(1);
    let old = ctx.args.arg_ptr(2);
    let handler_bytes = SignalHandler::USER_WORDS * 8;
    if let Some(old) = old {
        usercopy::check(ctx.space(), old, handler_bytes, true)?;
    }

    let previous = match new {
        Some(new) => {
            let handler = read_handler(ctx, new)?;
            ctx.process.set_signal_handler(sig, handler)?
        }
        None => ctx.process.signal_handler(sig),
    };

    if let Some(old) = old {
        for (i, word) in previous.to_user().into_iter().enumerate() {
            usercopy::write_u64(ctx.space(), old + i as u64 * 8, word)?;
        }
    }
    Ok(0)
}

pub fn sys_signal_mask(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let how = ctx.args.arg(0);
    let set = ctx.args.arg_ptr(1);
    let old = ctx.args.arg_ptr(2);
    if let Some(old) = old {
        usercopy::check(ctx.space(), old, 8, true)?;
    }

    let current = ctx.thread.signal_mask();
    if let Some(set) = set {
        let bits = usercopy::read_u64(ctx.space(), set)?;
        let mask = match how {
            SIG_BLOCK => current | bits,
            SIG_UNBLOCK => current & !bits,
            SIG_SETMASK => bits,
            _ => return Err(Status::InvalidArgument),
        };
        ctx.thread.set_signal_mask(mask);
    }

    if let Some(old) = old {
        usercopy::write_u64(ctx.space(), old, current)?;
    }
    Ok(0)
}

pub fn sys_signal_return(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let rax = signal::signal_return(ctx.thread, ctx.process, ctx.regs)?;
    Ok(rax as usize)
}

// ============================================================================
// Credentials
// ============================================================================

pub fn sys_get_uid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.process.credentials().uid as usize)
}

pub fn sys_get_gid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.process.credentials().gid as usize)
}

pub fn sys_get_euid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.process.credentials().euid as usize)
}

pub fn sys_get_egid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    Ok(ctx.process.credentials().egid as usize)
}

/// Root may become anyone; everyone else may only keep their uid
pub fn sys_set_uid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let uid = ctx.args.arg_u32(0);
    let creds = ctx.process.credentials();
    if !creds.is_root() && uid != creds.uid {
        return Err(Status::NotPermitted);
    }
    ctx.process.set_credentials(Credentials {
        uid,
        euid: uid,
        ..creds
    });
    Ok(0)
}

/// A real uid of root may pick any euid; others may only switch back to
/// their real uid
pub fn sys_set_euid(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let euid = ctx.args.arg_u32(0);
    let creds = ctx.process.credentials();
    if euid == creds.euid {
        return Ok(0);
    }
    if creds.uid != 0 && euid != creds.uid {
        return Err(Status::NotPermitted);
    }
    ctx.process.set_credentials(Credentials { euid, ..creds });
    Ok(0)
}

// ============================================================================
// Process information
// ============================================================================

/// Fill `info*` with a record for `pid`
pub fn sys_get_process_info(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let pid = ctx.args.arg_i64(0);
    let info_ptr = ctx.args.arg_u64(1);
    usercopy::check(ctx.space(), info_ptr, ProcessInfo::SIZE, true)?;
    let info = ctx.kernel.process_info(pid)?;
    usercopy::write_bytes(ctx.space(), info_ptr, &info.to_bytes())?;
    Ok(0)
}

/// Advance the PID at `pid*` to the next process and fill `info*` for it
///
/// Returns 1, with the PID reset to 0, once the table is exhausted.
pub fn sys_get_next_process_info(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let pid_ptr = ctx.args.arg_u64(0);
    let info_ptr = ctx.args.arg_u64(1);
    let space = ctx.space();
    usercopy::check(space, info_ptr, ProcessInfo::SIZE, true)?;
    usercopy::check(space, pid_ptr, 8, true)?;

    let after = usercopy::read_u64(space, pid_ptr)? as i64;
    match ctx.kernel.next_process_info(after) {
        Some(info) => {
            usercopy::write_u64(space, pid_ptr, info.pid as u64)?;
            usercopy::write_bytes(space, info_ptr, &info.to_bytes())?;
            Ok(0)
        }
        None => {
            usercopy::write_u64(space, pid_ptr, 0)?;
            Ok(1)
        }
    }
}
