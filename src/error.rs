// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Status Codes
//!
//! Every fallible kernel operation returns [`KResult`]. The numeric values
//! double as the negated syscall return codes seen by user programs.
//!
//! # Design
//!
//! - **Argument errors**: bad handle, wrong object type, malformed path
//! - **Exhaustion**: handle table full, message queue full, no region space
//! - **Faults**: a user pointer outside the caller's mapped memory
//! - **Interruption**: timeouts and explicit interrupts are distinct codes
//!
//! Internal invariant violations are not statuses; they panic.

use core::fmt;

/// Kernel status code
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation not permitted
    NotPermitted = 1,
    /// No such file, service or interface
    NoSuchEntry = 2,
    /// No such process or thread
    NoSuchProcess = 3,
    /// Wait interrupted
    Interrupted = 4,
    /// I/O error from a collaborator
    Io = 5,
    /// Image format not recognised
    ExecFormat = 8,
    /// Handle does not exist
    BadHandle = 9,
    /// No such child process
    NoChild = 10,
    /// Resource temporarily unavailable
    WouldBlock = 11,
    /// Out of memory or address space
    NoMemory = 12,
    /// Invalid user pointer
    Fault = 14,
    /// Name already exists
    Exists = 17,
    /// Invalid argument or wrong object type
    InvalidArgument = 22,
    /// Handle table exhausted
    TooManyHandles = 24,
    /// Unknown system call
    NotImplemented = 38,
    /// Payload exceeds the interface's message size
    MessageTooLarge = 90,
    /// Message queue full
    QueueFull = 105,
    /// Peer endpoint or interface closed
    NotConnected = 107,
    /// Wait timed out
    TimedOut = 110,
}

/// Result type for kernel operations
pub type KResult<T> = Result<T, Status>;

impl Status {
    /// Errno value of this status
    pub const fn errno(self) -> i32 {
        self as i32
    }

    /// Recover a status from an errno value
    pub fn from_errno(errno: i32) -> Option<Self> {
        const ALL: [Status; 19] = [
            Status::NotPermitted,
            Status::NoSuchEntry,
            Status::NoSuchProcess,
            Status::Interrupted,
            Status::Io,
            Status::ExecFormat,
            Status::BadHandle,
            Status::NoChild,
            Status::WouldBlock,
            Status::NoMemory,
            Status::Fault,
            Status::Exists,
            Status::InvalidArgument,
            Status::TooManyHandles,
            Status::NotImplemented,
            Status::MessageTooLarge,
            Status::QueueFull,
            Status::NotConnected,
            Status::TimedOut,
        ];
        ALL.iter().copied().find(|s| s.errno() == errno)
    }

    /// Short description
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::NotPermitted => "operation not permitted",
            Status::NoSuchEntry => "no such entry",
            Status::NoSuchProcess => "no such process",
            Status::Interrupted => "interrupted",
            Status::Io => "i/o error",
            Status::ExecFormat => "exec format error",
            Status::BadHandle => "bad handle",
            Status::NoChild => "no child processes",
            Status::WouldBlock => "would block",
            Status::NoMemory => "out of memory",
            Status::Fault => "bad address",
            Status::Exists => "already exists",
            Status::InvalidArgument => "invalid argument",
            Status::TooManyHandles => "too many handles",
            Status::NotImplemented => "not implemented",
            Status::MessageTooLarge => "message too large",
            Status::QueueFull => "queue full",
            Status::NotConnected => "not connected",
            Status::TimedOut => "timed out",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.as_str(), self.errno())
    }
}

// ============================================================================
// Tests
// ============================================================================
