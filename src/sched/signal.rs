// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Signals
//!
//! Signal numbers, per-process handler tables, and delivery on the way
//! out of a syscall.
//!
//! # Design
//!
//! - **Pending state** is a per-thread bitmask, bit (n - 1) for signal n
//! - **Delivery** happens only in the dispatcher's post-call step, one
//!   signal per kernel exit, lowest number first
//! - **User handlers** run on the interrupted user stack. The kernel pushes
//!   a frame holding the old mask and registers, and `signal_return`
//!   restores it
//!
//! # User signal frame
//!
//! ```text
//! rsp ->  restorer return address
//!         old signal mask
//!         saved registers (RegisterContext::WORDS words)
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::arch::RegisterContext;
use crate::config::SIGNAL_MAX;
use crate::error::{KResult, Status};
use crate::kernel::Kernel;
use crate::process::Process;
use crate::sched::thread::Thread;

/// Signal number (1..=SIGNAL_MAX)
pub type Signal = u32;

pub const SIGHUP: Signal = 1;
pub const SIGINT: Signal = 2;
pub const SIGQUIT: Signal = 3;
pub const SIGILL: Signal = 4;
pub const SIGTRAP: Signal = 5;
pub const SIGABRT: Signal = 6;
pub const SIGBUS: Signal = 7;
pub const SIGFPE: Signal = 8;
pub const SIGKILL: Signal = 9;
pub const SIGUSR1: Signal = 10;
pub const SIGSEGV: Signal = 11;
pub const SIGUSR2: Signal = 12;
pub const SIGPIPE: Signal = 13;
pub const SIGALRM: Signal = 14;
pub const SIGTERM: Signal = 15;
pub const SIGCHLD: Signal = 17;
pub const SIGCONT: Signal = 18;
pub const SIGSTOP: Signal = 19;
pub const SIGURG: Signal = 23;
pub const SIGWINCH: Signal = 28;

/// Bit for a signal in pending and mask words
pub const fn signal_bit(sig: Signal) -> u64 {
    1u64 << (sig - 1)
}

/// Signals that can never be blocked
pub const UNBLOCKABLE_MASK: u64 = signal_bit(SIGKILL) | signal_bit(SIGSTOP);

/// Red zone below the interrupted stack pointer left untouched
const RED_ZONE: u64 = 128;

/// Words in the frame after the return address
pub const SIGNAL_FRAME_WORDS: usize = 1 + RegisterContext::WORDS;

/// Check a user supplied signal number
pub fn is_valid(sig: Signal) -> bool {
    sig >= 1 && (sig as usize) <= SIGNAL_MAX
}

/// Check if user code may install a handler for the signal
pub fn is_overridable(sig: Signal) -> bool {
    !matches!(sig, SIGKILL | SIGSTOP | SIGCONT)
}

/// What happens to a signal nobody handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Ignore,
}

pub fn default_action(sig: Signal) -> DefaultAction {
    match sig {
        SIGCHLD | SIGCONT | SIGURG | SIGWINCH => DefaultAction::Ignore,
        _ => DefaultAction::Terminate,
    }
}

bitflags! {
    /// Flags accepted by signal_action
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SignalActionFlags: u64 {
        /// Do not block the signal while its handler runs
        const NODEFER = 0x4000_0000;
        /// Reset to the default action after one delivery
        const RESETHAND = 0x8000_0000;
    }
}

/// Disposition of one signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Default,
    Ignore,
    /// User handler entry point
    Handler(u64),
}

/// Handler table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalHandler {
    pub action: SignalAction,
    /// Extra signals blocked while the handler runs
    pub mask: u64,
    pub flags: SignalActionFlags,
    /// Where the handler returns to; expected to invoke signal_return
    pub restorer: u64,
}

impl SignalHandler {
    pub const DEFAULT: Self = Self {
        action: SignalAction::Default,
        mask: 0,
        flags: SignalActionFlags::empty(),
        restorer: 0,
    };

    /// Size of the user-visible structure in 64-bit words
    pub const USER_WORDS: usize = 4;

    /// Decode `[handler, mask, flags, restorer]`; handler 0 is default, 1 is ignore
    pub fn from_user(words: [u64; Self::USER_WORDS]) -> KResult<Self> {
        let flags = SignalActionFlags::from_bits(words[2]).ok_or(Status::InvalidArgument)?;
        let action = match words[0] {
            0 => SignalAction::Default,
            1 => SignalAction::Ignore,
            entry => SignalAction::Handler(entry),
        };
        Ok(Self {
            action,
            mask: words[1] & !UNBLOCKABLE_MASK,
            flags,
            restorer: words[3],
        })
    }

    pub fn to_user(&self) -> [u64; Self::USER_WORDS] {
        let handler = match self.action {
            SignalAction::Default => 0,
            SignalAction::Ignore => 1,
            SignalAction::Handler(entry) => entry,
        };
        [handler, self.mask, self.flags.bits(), self.restorer]
    }
}

/// Per-process handler table indexed by signal number
#[derive(Debug, Clone)]
pub struct SignalTable {
    handlers: [SignalHandler; SIGNAL_MAX],
}

impl SignalTable {
    pub const fn new() -> Self {
        Self {
            handlers: [SignalHandler::DEFAULT; SIGNAL_MAX],
        }
    }

    pub fn get(&self, sig: Signal) -> SignalHandler {
        if is_valid(sig) {
            self.handlers[sig as usize - 1]
        } else {
            SignalHandler::DEFAULT
        }
    }

    /// Install a handler, returning the previous one
    pub fn set(&mut self, sig: Signal, handler: SignalHandler) -> KResult<SignalHandler> {
        if !is_valid(sig) || !is_overridable(sig) {
            return Err(Status::InvalidArgument);
        }
        let slot = &mut self.handlers[sig as usize - 1];
        Ok(core::mem::replace(slot, handler))
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Deliver the lowest deliverable pending signal, if any
///
/// Called by the dispatcher after a syscall returns. A default-terminate
/// signal kills the process, which leaves `thread` Dying.
pub fn deliver_pending(
    kernel: &Kernel,
    thread: &Arc<Thread>,
    process: &Arc<Process>,
    regs: &mut RegisterContext,
) {
    let deliverable = thread.deliverable_signals();
    if deliverable == 0 {
        return;
    }
    let sig = deliverable.trailing_zeros() + 1;
    thread.take_signal(sig);

    let handler = process.signal_handler(sig);
    match handler.action {
        SignalAction::Ignore => {}
        SignalAction::Default => {
            if default_action(sig) == DefaultAction::Terminate {
                log::info!("pid {}: terminated by signal {}", process.pid(), sig);
                kernel.terminate_process(process, 128 + sig as i32);
            }
        }
        SignalAction::Handler(entry) => {
            if push_frame(thread, process, regs, sig, entry, &handler).is_err() {
                log::warn!("pid {}: bad stack delivering signal {}", process.pid(), sig);
                kernel.terminate_process(process, 128 + SIGSEGV as i32);
            }
        }
    }
}

fn push_frame(
    thread: &Thread,
    process: &Process,
    regs: &mut RegisterContext,
    sig: Signal,
    entry: u64,
    handler: &SignalHandler,
) -> KResult<()> {
    let old_mask = thread.signal_mask();
    let frame_bytes = (SIGNAL_FRAME_WORDS * 8) as u64;
    let frame = regs
        .rsp
        .checked_sub(RED_ZONE + frame_bytes)
        .ok_or(Status::Fault)?
        & !0xF;
    let return_slot = frame.checked_sub(8).ok_or(Status::Fault)?;

    let mut bytes = Vec::with_capacity(8 + frame_bytes as usize);
    bytes.extend_from_slice(&handler.restorer.to_le_bytes());
    bytes.extend_from_slice(&old_mask.to_le_bytes());
    for word in regs.to_words() {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    process.address_space().write(return_slot, &bytes)?;

    let mut new_mask = old_mask | handler.mask;
    if !handler.flags.contains(SignalActionFlags::NODEFER) {
        new_mask |= signal_bit(sig);
    }
    thread.set_signal_mask(new_mask);
    if handler.flags.contains(SignalActionFlags::RESETHAND) {
        process.reset_signal_handler(sig);
    }

    regs.rsp = return_slot;
    regs.rip = entry;
    regs.rdi = sig as u64;
    Ok(())
}

/// Undo a signal frame at the current user stack pointer
///
/// Returns the restored rax so the dispatcher hands it back unchanged.
pub fn signal_return(thread: &Thread, process: &Process, regs: &mut RegisterContext) -> KResult<u64> {
    let mut bytes = [0u8; SIGNAL_FRAME_WORDS * 8];
    process.address_space().read(regs.rsp, &mut bytes)?;

    let mut words = [0u64; SIGNAL_FRAME_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *word = u64::from_le_bytes(raw);
    }

    let mut saved = [0u64; RegisterContext::WORDS];
    saved.copy_from_slice(&words[1..]);
    thread.set_signal_mask(words[0]);
    regs.restore_from_user(&saved);
    Ok(regs.rax)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_bits() {
        assert_eq!(signal_bit(1), 1);
        assert_eq!(signal_bit(SIGKILL), 1 << 8);
        assert_eq!(signal_bit(64), 1 << 63);
    }

    #[test]
    fn test_validity() {
        assert!(!is_valid(0));
        assert!(is_valid(SIGTERM));
        assert!(!is_valid(SIGNAL_MAX as Signal + 1));
        assert!(!is_overridable(SIGKILL));
        assert!(!is_overridable(SIGSTOP));
        assert!(!is_overridable(SIGCONT));
        assert!(is_overridable(SIGUSR1));
    }

    #[test]
    fn test_default_actions() {
        assert_eq!(default_action(SIGCHLD), DefaultAction::Ignore);
        assert_eq!(default_action(SIGWINCH), DefaultAction::Ignore);
        assert_eq!(default_action(SIGTERM), DefaultAction::Terminate);
        assert_eq!(default_action(SIGSEGV), DefaultAction::Terminate);
    }

    #[test]
    fn test_table_rejects_unoverridable() {
        let mut table = SignalTable::new();
        let ignore = SignalHandler {
            action: SignalAction::Ignore,
            ..SignalHandler::DEFAULT
        };
        assert_eq!(table.set(SIGKILL, ignore), Err(Status::InvalidArgument));
        assert_eq!(table.set(0, ignore), Err(Status::InvalidArgument));
        assert_eq!(table.set(SIGUSR1, ignore), Ok(SignalHandler::DEFAULT));
        assert_eq!(table.get(SIGUSR1).action, SignalAction::Ignore);
    }

    #[test]
    fn test_user_encoding() {
        let handler = SignalHandler::from_user([0x40_1000, u64::MAX, 0x4000_0000, 0x40_2000]).unwrap();
        assert_eq!(handler.action, SignalAction::Handler(0x40_1000));
        assert_eq!(handler.mask & UNBLOCKABLE_MASK, 0);
        assert!(handler.flags.contains(SignalActionFlags::NODEFER));
        assert_eq!(handler.to_user()[0], 0x40_1000);
        assert_eq!(SignalHandler::from_user([1, 0, 0, 0]).unwrap().action, SignalAction::Ignore);
        assert_eq!(SignalHandler::from_user([0, 0, 0x1, 0]), Err(Status::InvalidArgument));
    }
}
