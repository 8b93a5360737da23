// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Memory syscalls: shared memory objects and anonymous mappings

use crate::error::{KResult, Status};
use crate::mm::SharedMemoryFlags;
use crate::process::MapFlags;

use super::SyscallContext;

/// Protection bits user code may ask for in map_anonymous
const USER_MAP_FLAGS: MapFlags = MapFlags::READ.union(MapFlags::WRITE).union(MapFlags::EXEC);

fn hint(raw: u64) -> Option<u64> {
    (raw != 0).then_some(raw)
}

pub fn sys_create_shared_memory(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let size = ctx.args.arg_u64(0);
    let flags = SharedMemoryFlags::from_bits(ctx.args.arg_u64(1)).ok_or(Status::InvalidArgument)?;
    let recipient = ctx.args.arg_i64(2);
    let key = ctx
        .kernel
        .shared_memory()
        .create(size, flags, ctx.process.pid(), recipient)?;
    Ok(key as usize)
}

pub fn sys_map_shared_memory(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let key = ctx.args.arg_u64(0);
    let addr = ctx
        .kernel
        .shared_memory()
        .map(key, ctx.process, hint(ctx.args.arg_u64(1)))?;
    Ok(addr as usize)
}

pub fn sys_unmap_shared_memory(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let addr = ctx.args.arg_u64(0);
    let key = ctx.args.arg_u64(1);
    ctx.kernel.shared_memory().unmap(ctx.process, addr, key)?;
    Ok(0)
}

pub fn sys_destroy_shared_memory(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let key = ctx.args.arg_u64(0);
    ctx.kernel.shared_memory().destroy(key, ctx.process.pid())?;
    Ok(0)
}

/// Map zeroed private memory; no protection bits means read/write
pub fn sys_map_anonymous(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let size = ctx.args.arg_u64(0);
    let bits = u32::try_from(ctx.args.arg(2)).map_err(|_| Status::InvalidArgument)?;
    let flags = MapFlags::from_bits(bits)
        .filter(|flags| USER_MAP_FLAGS.contains(*flags))
        .ok_or(Status::InvalidArgument)?;
    let flags = if flags.is_empty() { MapFlags::RW } else { flags };
    if size == 0 {
        return Err(Status::InvalidArgument);
    }
    let addr = ctx
        .space()
        .allocate_region(size, hint(ctx.args.arg_u64(1)), false, flags)?;
    Ok(addr as usize)
}

pub fn sys_unmap(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    ctx.space().unmap(ctx.args.arg_u64(0), ctx.args.arg_u64(1))?;
    Ok(0)
}
