// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! User Memory Access
//!
//! Every pointer a syscall receives is checked against the calling
//! process's address space before it is touched. Reads and writes go
//! through [`AddressSpace`], which fails with `Fault` for any byte outside
//! a mapped region with the right permission.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{MAX_EXEC_ARGS, PAGE_SIZE};
use crate::error::{KResult, Status};
use crate::process::AddressSpace;

/// Validate that `[addr, addr + len)` may be read (or written)
pub fn check(space: &AddressSpace, addr: u64, len: usize, write: bool) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    space.check_range(addr, len, write)
}

/// Copy `len` bytes in from user memory
pub fn read_bytes(space: &AddressSpace, addr: u64, len: usize) -> KResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    if len > 0 {
        space.read(addr, &mut buf)?;
    }
    Ok(buf)
}

/// Copy `data` out to user memory
pub fn write_bytes(space: &AddressSpace, addr: u64, data: &[u8]) -> KResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    space.write(addr, data)
}

pub fn read_u64(space: &AddressSpace, addr: u64) -> KResult<u64> {
    let mut raw = [0u8; 8];
    space.read(addr, &mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

pub fn write_u64(space: &AddressSpace, addr: u64, value: u64) -> KResult<()> {
    space.write(addr, &value.to_le_bytes())
}

pub fn read_i32(space: &AddressSpace, addr: u64) -> KResult<i32> {
    let mut raw = [0u8; 4];
    space.read(addr, &mut raw)?;
    Ok(i32::from_le_bytes(raw))
}

pub fn write_i32(space: &AddressSpace, addr: u64, value: i32) -> KResult<()> {
    space.write(addr, &value.to_le_bytes())
}

pub fn write_u16(space: &AddressSpace, addr: u64, value: u16) -> KResult<()> {
    space.write(addr, &value.to_le_bytes())
}

/// Read a NUL-terminated string of at most `max_len` bytes
///
/// The scan proceeds one page at a time, so a string that ends right
/// before an unmapped page is still accepted. A string with no NUL
/// within `max_len` bytes is `InvalidArgument`.
pub fn read_string(space: &AddressSpace, addr: u64, max_len: usize) -> KResult<String> {
    if addr == 0 {
        return Err(Status::Fault);
    }
    let mut bytes = Vec::new();
    let mut cursor = addr;
    while bytes.len() <= max_len {
        let to_page_end = PAGE_SIZE - (cursor % PAGE_SIZE);
        let chunk_len = to_page_end.min((max_len + 1 - bytes.len()) as u64) as usize;
        let chunk = read_bytes(space, cursor, chunk_len)?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&chunk[..nul]);
            return String::from_utf8(bytes).map_err(|_| Status::InvalidArgument);
        }
        bytes.extend_from_slice(&chunk);
        cursor = cursor.checked_add(chunk_len as u64).ok_or(Status::Fault)?;
    }
    Err(Status::InvalidArgument)
}

/// Read `count` string pointers at `addr` and the strings they point to
pub fn read_string_array(space: &AddressSpace, addr: u64, count: usize, max_len: usize) -> KResult<Vec<String>> {
    if count > MAX_EXEC_ARGS {
        return Err(Status::InvalidArgument);
    }
    let mut strings = Vec::with_capacity(count);
    for i in 0..count {
        let slot = addr.checked_add(i as u64 * 8).ok_or(Status::Fault)?;
        let ptr = read_u64(space, slot)?;
        strings.push(read_string(space, ptr, max_len)?);
    }
    Ok(strings)
}

/// Read a NULL-terminated array of string pointers; a null array is empty
pub fn read_string_list(space: &AddressSpace, addr: u64, max_len: usize) -> KResult<Vec<String>> {
    let mut strings = Vec::new();
    if addr == 0 {
        return Ok(strings);
    }
    loop {
        let slot = addr
            .checked_add(strings.len() as u64 * 8)
            .ok_or(Status::Fault)?;
        let ptr = read_u64(space, slot)?;
        if ptr == 0 {
            return Ok(strings);
        }
        if strings.len() == MAX_EXEC_ARGS {
            return Err(Status::InvalidArgument);
        }
        strings.push(read_string(space, ptr, max_len)?);
    }
}
