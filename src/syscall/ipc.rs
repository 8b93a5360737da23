// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! IPC syscalls: services, interfaces and endpoints

use crate::arch;
use crate::config::{MAX_MESSAGE_SIZE, MAX_PATH_LENGTH};
use crate::error::{KResult, Status};
use crate::ipc::{MessageEndpoint, MessageInterface, Service};

use super::usercopy;
use super::SyscallContext;

/// Size of the user `EndpointCallInfo { size: u64, timeout_us: i64 }`
const CALL_INFO_SIZE: usize = 16;

pub fn sys_create_service(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let name = usercopy::read_string(ctx.space(), ctx.args.arg_u64(0), MAX_PATH_LENGTH)?;
    let service = ctx.kernel.services().create_service(&name)?;
    ctx.install(service)
}

pub fn sys_create_interface(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let service = ctx.process.handles().get_typed::<Service>(ctx.args.arg_u64(0))?;
    let name = usercopy::read_string(ctx.space(), ctx.args.arg_u64(1), MAX_PATH_LENGTH)?;
    let size = u16::try_from(ctx.args.arg(2))
        .ok()
        .filter(|&size| size <= MAX_MESSAGE_SIZE)
        .ok_or(Status::InvalidArgument)?;

    let depth = ctx.kernel.config().endpoint_queue_depth;
    let interface = service.create_interface(&name, size, depth)?;
    ctx.install(interface)
}

/// Accept one pending connection; 0 when nobody is waiting
pub fn sys_interface_accept(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let interface = ctx
        .process
        .handles()
        .get_typed::<MessageInterface>(ctx.args.arg_u64(0))?;
    match interface.accept()? {
        Some(endpoint) => ctx.install(endpoint),
        None => Ok(0),
    }
}

pub fn sys_interface_connect(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let path = usercopy::read_string(ctx.space(), ctx.args.arg_u64(0), MAX_PATH_LENGTH)?;
    let interface = ctx.kernel.services().resolve(&path)?;
    let endpoint = interface.connect(ctx.thread)?;
    log::debug!("pid {}: connected to '{}'", ctx.process.pid(), path);
    ctx.install(endpoint)
}

fn endpoint(ctx: &SyscallContext<'_>) -> KResult<alloc::sync::Arc<MessageEndpoint>> {
    ctx.process
        .handles()
        .get_typed::<MessageEndpoint>(ctx.args.arg_u64(0))
}

pub fn sys_endpoint_queue(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let endpoint = endpoint(ctx)?;
    let id = ctx.args.arg_u64(1);
    let size = ctx.args.arg(2);
    if size > usize::from(endpoint.max_message_size()) {
        return Err(Status::MessageTooLarge);
    }
    let data = usercopy::read_bytes(ctx.space(), ctx.args.arg_u64(3), size)?;
    endpoint.queue(id, &data)?;
    Ok(0)
}

/// Take the oldest message: 1 if one was copied out, 0 if the inbox is empty
///
/// `size*` is a u16 and `data*` must have room for the endpoint's maximum
/// message size.
pub fn sys_endpoint_dequeue(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let endpoint = endpoint(ctx)?;
    let id_ptr = ctx.args.arg_u64(1);
    let size_ptr = ctx.args.arg_u64(2);
    let data_ptr = ctx.args.arg_u64(3);
    let space = ctx.space();
    usercopy::check(space, id_ptr, 8, true)?;
    usercopy::check(space, size_ptr, 2, true)?;
    usercopy::check(space, data_ptr, usize::from(endpoint.max_message_size()), true)?;

    let Some(message) = endpoint.dequeue()? else {
        return Ok(0);
    };
    usercopy::write_u64(space, id_ptr, message.id)?;
    usercopy::write_u16(space, size_ptr, message.size() as u16)?;
    usercopy::write_bytes(space, data_ptr, &message.data)?;
    Ok(1)
}

/// Send a request and wait for the reply with `expected_id`
///
/// The sixth argument points at `EndpointCallInfo`; its `size` carries the
/// request length in and the reply length out.
pub fn sys_endpoint_call(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let endpoint = endpoint(ctx)?;
    let id = ctx.args.arg_u64(1);
    let data_ptr = ctx.args.arg_u64(2);
    let expected_id = ctx.args.arg_u64(3);
    let reply_ptr = ctx.args.arg_u64(4);
    let info_ptr = ctx.args.arg_u64(5);
    let space = ctx.space();
    let max = usize::from(endpoint.max_message_size());

    usercopy::check(space, info_ptr, CALL_INFO_SIZE, true)?;
    let size = usercopy::read_u64(space, info_ptr)?;
    let timeout_us = usercopy::read_u64(space, info_ptr + 8)? as i64;
    let size = usize::try_from(size).map_err(|_| Status::MessageTooLarge)?;
    if size > max {
        return Err(Status::MessageTooLarge);
    }
    let request = usercopy::read_bytes(space, data_ptr, size)?;
    usercopy::check(space, reply_ptr, max, true)?;

    let timeout = arch::timeout_from_micros(timeout_us);
    let reply = endpoint.call(ctx.thread, id, &request, expected_id, timeout)?;
    usercopy::write_bytes(space, reply_ptr, &reply.data)?;
    usercopy::write_u64(space, info_ptr, reply.size() as u64)?;
    Ok(0)
}

/// Report the endpoint's maximum message size as a u64 at `info*`
pub fn sys_endpoint_info(ctx: &mut SyscallContext<'_>) -> KResult<usize> {
    let info_ptr = ctx.args.arg_u64(1);
    usercopy::check(ctx.space(), info_ptr, 8, true)?;
    let endpoint = endpoint(ctx)?;
    usercopy::write_u64(ctx.space(), info_ptr, u64::from(endpoint.max_message_size()))?;
    Ok(0)
}
