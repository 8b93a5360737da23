// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Futex syscalls

use crate::arch;
use crate::error::{KResult, Status};

use super::usercopy;
use super::SyscallContext;

fn futex_addr(addr: u64) -> KResult<u64> {
    if addr % 4 != 0 {
        return Err(Status::InvalidArgument);
    }
    Ok(addr)
}

/// Block while the word at `addr` holds `expected`
///
/// A word that already differs returns 0 at once.
pub fn sys_futex_wait(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let addr = futex_addr(ctx.args.arg_u64(0))?;
    let expected = ctx.args.arg_i32(1);
    let timeout = arch::timeout_from_micros(ctx.args.arg_i64(2));
    let space = ctx.process.address_space();
    usercopy::check(space, addr, 4, false)?;

    ctx.process.futexes().wait(
        addr,
        expected,
        || usercopy::read_i32(space, addr),
        ctx.thread,
        timeout,
    )?;
    Ok(0)
}

pub fn sys_futex_wake(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let addr = futex_addr(ctx.args.arg_u64(0))?;
    let policy = ctx.kernel.config().futex_wake_policy;
    Ok(ctx.process.futexes().wake(addr, policy))
}
