// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Saved User Register Context
//!
//! The register file captured when a thread traps into the kernel, laid out
//! for x86-64. Syscall arguments travel in rdi, rsi, rdx, r10, r8, r9 with
//! the call number and return value in rax.

/// User code segment selector (RPL 3)
pub const USER_CS: u64 = 0x1B;

/// User stack segment selector (RPL 3)
pub const USER_SS: u64 = 0x23;

/// Interrupt enable flag
pub const RFLAGS_IF: u64 = 1 << 9;

/// Reserved bit 1, always set
pub const RFLAGS_RESERVED: u64 = 1 << 1;

/// Flags user code may restore through a signal frame
/// (CF, PF, AF, ZF, SF, TF, DF, OF)
pub const RFLAGS_USER_MASK: u64 = 0xCD5;

/// Saved register state
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
}

impl RegisterContext {
    /// Number of 64-bit words in the serialized form
    pub const WORDS: usize = 20;

    /// Create a zeroed context
    pub const fn new() -> Self {
        Self {
            rax: 0, rbx: 0, rcx: 0, rdx: 0,
            rsi: 0, rdi: 0, rbp: 0, rsp: 0,
            r8: 0, r9: 0, r10: 0, r11: 0,
            r12: 0, r13: 0, r14: 0, r15: 0,
            rip: 0,
            rflags: 0,
            cs: 0,
            ss: 0,
        }
    }

    /// Context for a thread starting in user mode at `entry` with `stack`
    pub const fn for_entry(entry: u64, stack: u64) -> Self {
        let mut ctx = Self::new();
        ctx.rip = entry;
        ctx.rsp = stack;
        ctx.rflags = RFLAGS_IF | RFLAGS_RESERVED;
        ctx.cs = USER_CS;
        ctx.ss = USER_SS;
        ctx
    }

    /// Syscall number (rax)
    pub const fn syscall_number(&self) -> u64 {
        self.rax
    }

    /// Syscall arguments in ABI order
    pub const fn syscall_args(&self) -> [usize; 6] {
        [
            self.rdi as usize,
            self.rsi as usize,
            self.rdx as usize,
            self.r10 as usize,
            self.r8 as usize,
            self.r9 as usize,
        ]
    }

    /// Store a syscall return value
    pub fn set_return(&mut self, value: isize) {
        self.rax = value as u64;
    }

    /// Serialize for a user signal frame
    pub fn to_words(&self) -> [u64; Self::WORDS] {
        [
            self.rax, self.rbx, self.rcx, self.rdx,
            self.rsi, self.rdi, self.rbp, self.rsp,
            self.r8, self.r9, self.r10, self.r11,
            self.r12, self.r13, self.r14, self.r15,
            self.rip, self.rflags, self.cs, self.ss,
        ]
    }

    /// Restore from a user signal frame
    ///
    /// Segment selectors are never taken from user memory and only the
    /// arithmetic/direction flags may change.
    pub fn restore_from_user(&mut self, w: &[u64; Self::WORDS]) {
        self.rax = w[0];
        self.rbx = w[1];
        self.rcx = w[2];
        self.rdx = w[3];
        self.rsi = w[4];
        self.rdi = w[5];
        self.rbp = w[6];
        self.rsp = w[7];
        self.r8 = w[8];
        self.r9 = w[9];
        self.r10 = w[10];
        self.r11 = w[11];
        self.r12 = w[12];
        self.r13 = w[13];
        self.r14 = w[14];
        self.r15 = w[15];
        self.rip = w[16];
        self.rflags = (w[17] & RFLAGS_USER_MASK) | RFLAGS_IF | RFLAGS_RESERVED;
        self.cs = USER_CS;
        self.ss = USER_SS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_args_order() {
        let mut ctx = RegisterContext::new();
        ctx.rdi = 1;
        ctx.rsi = 2;
        ctx.rdx = 3;
        ctx.r10 = 4;
        ctx.r8 = 5;
        ctx.r9 = 6;
        assert_eq!(ctx.syscall_args(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_restore_sanitizes_privileged_state() {
        let mut ctx = RegisterContext::for_entry(0x1000, 0x2000);
        let mut words = ctx.to_words();
        words[16] = 0x4000;
        words[17] = u64::MAX;
        words[18] = 0x08;
        ctx.restore_from_user(&words);
        assert_eq!(ctx.rip, 0x4000);
        assert_eq!(ctx.cs, USER_CS);
        assert_eq!(ctx.rflags, RFLAGS_USER_MASK | RFLAGS_IF | RFLAGS_RESERVED);
    }
}
