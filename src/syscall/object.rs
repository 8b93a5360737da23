// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel object and handle syscalls

use alloc::vec::Vec;

use crate::arch;
use crate::config::MAX_WAIT_HANDLES;
use crate::error::{KResult, Status};
use crate::object::{self, HandleFlags};

use super::usercopy;
use super::SyscallContext;

/// Wait for one object to become signaled
pub fn sys_object_wait_one(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let target = ctx
        .process
        .handles()
        .get(ctx.args.arg_u64(0))
        .ok_or(Status::BadHandle)?;
    let timeout = arch::timeout_from_micros(ctx.args.arg_i64(1));
    object::wait_any(&[target], ctx.thread, timeout)?;
    Ok(0)
}

/// Wait for any of `count` objects; returns the index of a signaled one
pub fn sys_object_wait(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let handles_ptr = ctx.args.arg_u64(0);
    let count = ctx.args.arg(1);
    if count == 0 || count > MAX_WAIT_HANDLES {
        return Err(Status::InvalidArgument);
    }
    let raw = usercopy::read_bytes(ctx.space(), handles_ptr, count * 8)?;

    let table = ctx.process.handles();
    let objects = raw
        .chunks_exact(8)
        .map(|chunk| {
            let mut id = [0u8; 8];
            id.copy_from_slice(chunk);
            table.get(u64::from_le_bytes(id)).ok_or(Status::BadHandle)
        })
        .collect::<KResult<Vec<_>>>()?;

    let timeout = arch::timeout_from_micros(ctx.args.arg_i64(2));
    object::wait_any(&objects, ctx.thread, timeout)
}

pub fn sys_object_destroy(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    ctx.process.handles().destroy(ctx.args.arg_u64(0))?;
    Ok(0)
}

pub fn sys_handle_set_flags(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let bits = u32::try_from(ctx.args.arg(1)).map_err(|_| Status::InvalidArgument)?;
    let flags = HandleFlags::from_bits(bits).ok_or(Status::InvalidArgument)?;
    ctx.process.handles().set_flags(ctx.args.arg_u64(0), flags)?;
    Ok(0)
}
