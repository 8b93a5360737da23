// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread representation and management
//!
//! A thread is owned by exactly one process and referenced by the
//! scheduler's run queue and its process's thread list. The thread only
//! points back at its process and its current blocker weakly.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::arch::{self, RegisterContext};
use crate::config::KERNEL_STACK_SIZE;
use crate::error::{KResult, Status};
use crate::process::Process;
use crate::sched::blocker::{Blocker, WaitResult};
use crate::sched::signal::{self, Signal};
use crate::sched::state::ThreadState;
use crate::sync::SpinMutex;

/// Thread ID type (unique within a process)
pub type ThreadId = u64;

/// Sentinel for "not assigned to a CPU"
const NO_CPU: usize = usize::MAX;

/// Kernel stack, exclusively owned by its thread
pub struct KernelStack {
    memory: Box<[u8]>,
}

impl KernelStack {
    fn new(size: usize) -> Self {
        Self {
            memory: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Top of the stack (stack grows down), 16-byte aligned
    pub fn top(&self) -> usize {
        (self.memory.as_ptr() as usize + self.memory.len()) & !0xF
    }
}

/// State guarded by the per-thread lock
struct ThreadInner {
    state: ThreadState,
    registers: RegisterContext,
    blocker: Option<Weak<Blocker>>,
}

/// Thread
pub struct Thread {
    tid: ThreadId,
    process: Weak<Process>,
    inner: SpinMutex<ThreadInner>,
    /// Pending signals, bit (n - 1) for signal n
    pending_signals: AtomicU64,
    /// Blocked signals
    signal_mask: AtomicU64,
    /// Syscall re-entrancy lock
    in_kernel: AtomicBool,
    /// Whether the timer may preempt this thread
    preemptible: AtomicBool,
    cpu: AtomicUsize,
    kernel_stack: KernelStack,
}

impl Thread {
    /// Create a thread in the Running state
    pub fn new(tid: ThreadId, process: Weak<Process>, registers: RegisterContext) -> Arc<Self> {
        Arc::new(Self {
            tid,
            process,
            inner: SpinMutex::new(ThreadInner {
                state: ThreadState::Running,
                registers,
                blocker: None,
            }),
            pending_signals: AtomicU64::new(0),
            signal_mask: AtomicU64::new(0),
            in_kernel: AtomicBool::new(false),
            preemptible: AtomicBool::new(true),
            cpu: AtomicUsize::new(NO_CPU),
            kernel_stack: KernelStack::new(KERNEL_STACK_SIZE),
        })
    }

    /// Thread ID
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Owning process, if it still exists
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Current state
    pub fn state(&self) -> ThreadState {
        self.inner.lock().state
    }

    /// Check if exit has been requested
    pub fn is_exiting(&self) -> bool {
        self.state().is_exiting()
    }

    /// Saved user registers
    pub fn registers(&self) -> RegisterContext {
        self.inner.lock().registers
    }

    /// Replace the saved user registers
    pub fn set_registers(&self, registers: RegisterContext) {
        self.inner.lock().registers = registers;
    }

    pub fn kernel_stack(&self) -> &KernelStack {
        &self.kernel_stack
    }

    /// CPU whose run queue holds this thread
    pub fn cpu(&self) -> Option<usize> {
        match self.cpu.load(Ordering::Relaxed) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    pub(crate) fn set_cpu(&self, cpu: Option<usize>) {
        self.cpu.store(cpu.unwrap_or(NO_CPU), Ordering::Relaxed);
    }

    // ========================================================================
    // Blocking
    // ========================================================================

    /// Park this thread on `blocker` until it fires or `deadline` passes
    ///
    /// Must be called by the thread itself with no spinlock held. Returns
    /// immediately if the blocker already fired, the thread is exiting, or
    /// a deliverable signal is pending.
    pub fn block(self: &Arc<Self>, blocker: &Arc<Blocker>, deadline: Option<u64>) -> WaitResult {
        blocker.attach(self);
        {
            let mut inner = self.inner.lock();
            if inner.state.is_exiting() || self.deliverable_signals() != 0 {
                drop(inner);
                blocker.interrupt();
                return blocker.result();
            }
            if !blocker.should_block() {
                return blocker.result();
            }
            inner.blocker = Some(Arc::downgrade(blocker));
            inner.state = ThreadState::Blocked;
        }

        while blocker.should_block() {
            if let Some(deadline) = deadline {
                if arch::now_ns() >= deadline {
                    blocker.expire();
                    break;
                }
            }
            arch::yield_cpu();
        }

        let mut inner = self.inner.lock();
        inner.blocker = None;
        if inner.state == ThreadState::Blocked {
            inner.state = ThreadState::Running;
        }
        drop(inner);
        blocker.result()
    }

    /// Sleep for `duration`
    ///
    /// Nothing wakes the blocker, so only the deadline or an interruption
    /// ends the sleep.
    pub fn sleep(self: &Arc<Self>, duration: core::time::Duration) -> KResult<()> {
        if duration.is_zero() {
            return Ok(());
        }
        let blocker = Blocker::new();
        match self.block(&blocker, arch::deadline_after(Some(duration))) {
            WaitResult::Interrupted => Err(Status::Interrupted),
            WaitResult::Woken | WaitResult::TimedOut => Ok(()),
        }
    }

    /// Transition back to Running once `blocker` fired
    pub(crate) fn wake(&self, blocker: &Blocker) {
        let mut inner = self.inner.lock();
        let ours = inner
            .blocker
            .as_ref()
            .map_or(false, |b| core::ptr::eq(b.as_ptr(), blocker));
        if ours && inner.state == ThreadState::Blocked {
            inner.state = ThreadState::Running;
        }
    }

    /// Interrupt whatever this thread is blocked on
    ///
    /// Returns true if a blocked wait was cut short.
    pub fn interrupt(&self) -> bool {
        let blocker = self.inner.lock().blocker.as_ref().and_then(Weak::upgrade);
        match blocker {
            Some(blocker) => blocker.interrupt(),
            None => false,
        }
    }

    // ========================================================================
    // Exit
    // ========================================================================

    /// Ask the thread to exit
    ///
    /// A thread that is not inside the kernel stops immediately; one that is
    /// becomes Dying and finishes when it unwinds out of its syscall.
    pub fn kill(&self) {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ThreadState::Dying | ThreadState::Zombie => return,
                _ => {}
            }
            inner.state = if self.in_kernel() {
                ThreadState::Dying
            } else {
                ThreadState::Zombie
            };
        }
        self.interrupt();
    }

    /// Complete a Dying -> Zombie transition
    pub fn finish_exit(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ThreadState::Dying {
            inner.state = ThreadState::Zombie;
        }
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Mark a signal pending and interrupt any wait it should cut short
    pub fn send_signal(&self, sig: Signal) {
        self.pending_signals
            .fetch_or(signal::signal_bit(sig), Ordering::AcqRel);
        if self.deliverable_signals() != 0 {
            self.interrupt();
        }
    }

    /// Pending signal bits
    pub fn pending_signals(&self) -> u64 {
        self.pending_signals.load(Ordering::Acquire)
    }

    /// Pending signals not blocked by the effective mask
    pub fn deliverable_signals(&self) -> u64 {
        self.pending_signals() & !self.signal_mask()
    }

    /// Clear a pending signal, returning whether it was pending
    pub fn take_signal(&self, sig: Signal) -> bool {
        let bit = signal::signal_bit(sig);
        self.pending_signals.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Effective signal mask (never includes SIGKILL or SIGSTOP)
    pub fn signal_mask(&self) -> u64 {
        self.signal_mask.load(Ordering::Acquire)
    }

    /// Replace the signal mask
    pub fn set_signal_mask(&self, mask: u64) {
        self.signal_mask
            .store(mask & !signal::UNBLOCKABLE_MASK, Ordering::Release);
    }

    // ========================================================================
    // Kernel entry bookkeeping
    // ========================================================================

    /// Take the syscall re-entrancy lock
    pub fn try_enter_kernel(&self) -> bool {
        self.in_kernel
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the syscall re-entrancy lock
    pub fn leave_kernel(&self) {
        self.in_kernel.store(false, Ordering::Release);
    }

    /// Check if the thread is inside a syscall
    pub fn in_kernel(&self) -> bool {
        self.in_kernel.load(Ordering::Acquire)
    }

    pub fn set_preemptible(&self, preemptible: bool) {
        self.preemptible.store(preemptible, Ordering::Release);
    }

    pub fn is_preemptible(&self) -> bool {
        self.preemptible.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
