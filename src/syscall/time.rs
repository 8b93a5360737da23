// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Clock, sleep and alarm syscalls

use core::time::Duration;

use crate::arch;
use crate::error::KResult;

use super::usercopy;
use super::SyscallContext;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Sleep for a number of microseconds; 0 returns at once
pub fn sys_sleep(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    ctx.thread.sleep(Duration::from_micros(ctx.args.arg_u64(0)))?;
    Ok(0)
}

/// Sleep for a number of nanoseconds; 0 returns at once
pub fn sys_nano_sleep(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    ctx.thread.sleep(Duration::from_nanos(ctx.args.arg_u64(0)))?;
    Ok(0)
}

/// Store nanoseconds since boot at `ns*` (a null pointer is allowed)
pub fn sys_uptime(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    if let Some(ptr) = ctx.args.arg_ptr(0) {
        usercopy::write_u64(ctx.space(), ptr, arch::now_ns())?;
    }
    Ok(0)
}

/// Deliver SIGALRM after `seconds`, replacing any pending alarm
///
/// Zero cancels. Returns the whole seconds, rounded up, that were left on
/// the previous alarm.
pub fn sys_alarm(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let seconds = ctx.args.arg_u64(0);
    let after = (seconds != 0).then(|| Duration::from_secs(seconds));
    let left = ctx.process.set_alarm(after).map_or(0, |left| {
        left.as_nanos().div_ceil(NANOS_PER_SEC)
    });
    Ok(usize::try_from(left).unwrap_or(usize::MAX))
}
