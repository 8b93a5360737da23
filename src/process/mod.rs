// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Process Management
//!
//! Processes are isolated execution contexts: each owns an address space,
//! a handle table, its threads, a signal handler table and a futex map.
//!
//! # Design
//!
//! - Each process has a unique process ID (PID), never reused
//! - Children are held strongly so the parent can reap their exit status;
//!   the child only points back at its parent weakly
//! - A process is a kernel object; watching it waits for its death
//!
//! # Process States
//!
//! ```text
//! Running -> Dying -> Zombie -> (reaped)
//! ```

pub mod address_space;
pub mod table;

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use core::time::Duration;

use crate::arch::{self, RegisterContext};
use crate::error::{KResult, Status};
use crate::object::{HandleTable, KernelObject, KernelObjectBase, ObjectType, TypedObject};
use crate::sched::signal::{self, DefaultAction, Signal, SignalAction, SignalHandler, SignalTable};
use crate::sched::{Thread, ThreadId, WaitResult};
use crate::sync::{FutexTable, SpinMutex, WaitQueue};

pub use address_space::{AddressSpace, MapFlags, RegionInfo};
pub use table::ProcessTable;

/// ============================================================================
/// Process ID
/// ============================================================================

/// Process ID type
pub type Pid = i64;

/// PID of the first process created
pub const PID_FIRST_USER: Pid = 1;

/// ============================================================================
/// Process State
/// ============================================================================

/// Process state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has at least one live thread
    Running = 0,

    /// Exit requested, threads are unwinding
    Dying = 1,

    /// Exit code recorded, waiting for the parent to collect it
    Zombie = 2,
}

impl ProcessState {
    /// Check if the process is still alive
    pub const fn is_alive(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// User and group identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

impl Credentials {
    pub const ROOT: Self = Self {
        uid: 0,
        gid: 0,
        euid: 0,
        egid: 0,
    };

    pub const fn is_root(&self) -> bool {
        self.euid == 0
    }
}

/// ============================================================================
/// Process
/// ============================================================================

/// Process
pub struct Process {
    base: KernelObjectBase,

    pid: Pid,

    name: SpinMutex<String>,

    parent: SpinMutex<Weak<Process>>,

    creds: SpinMutex<Credentials>,

    state: SpinMutex<ProcessState>,

    exit_code: AtomicI32,

    address_space: AddressSpace,

    handles: HandleTable,

    threads: SpinMutex<Vec<Arc<Thread>>>,

    next_tid: AtomicU64,

    /// Children not yet reaped, live or zombie
    children: SpinMutex<Vec<Arc<Process>>>,

    /// Threads blocked in wait_pid
    child_waiters: WaitQueue,

    signal_handlers: SpinMutex<SignalTable>,

    futexes: FutexTable,

    cwd: SpinMutex<String>,

    /// Clock reading at creation
    created_ns: u64,

    /// Absolute deadline of the pending alarm
    alarm: SpinMutex<Option<u64>>,
}

impl Process {
    /// Create a process with an empty thread list
    pub fn new(pid: Pid, name: &str, address_space: AddressSpace, handles: HandleTable) -> Arc<Self> {
        Arc::new(Self {
            base: KernelObjectBase::new(ObjectType::Process),
            pid,
            name: SpinMutex::new(String::from(name)),
            parent: SpinMutex::new(Weak::new()),
            creds: SpinMutex::new(Credentials::ROOT),
            state: SpinMutex::new(ProcessState::Running),
            exit_code: AtomicI32::new(0),
            address_space,
            handles,
            threads: SpinMutex::new(Vec::new()),
            next_tid: AtomicU64::new(1),
            children: SpinMutex::new(Vec::new()),
            child_waiters: WaitQueue::new(),
            signal_handlers: SpinMutex::new(SignalTable::new()),
            futexes: FutexTable::new(),
            cwd: SpinMutex::new(String::from("/")),
            created_ns: arch::now_ns(),
            alarm: SpinMutex::new(None),
        })
    }

    /// Create a forked copy of this process
    ///
    /// The child gets a copy of the address space and handle table and
    /// inherits credentials, signal handlers and working directory. It has
    /// no threads yet and is not yet registered as a child.
    pub fn fork_copy(&self, pid: Pid) -> Arc<Self> {
        let child = Self::new(pid, &self.name(), self.address_space.fork_clone(), self.handles.fork_copy());
        child.inherit_from(self);
        child
    }

    /// Copy credentials, signal handlers and working directory from `other`
    pub fn inherit_from(&self, other: &Process) {
        *self.creds.lock() = other.credentials();
        *self.signal_handlers.lock() = other.signal_handlers.lock().clone();
        *self.cwd.lock() = other.cwd();
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Parent process, if it is still around
    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    /// Parent PID, or 0 for an orphan
    pub fn ppid(&self) -> Pid {
        self.parent().map_or(0, |p| p.pid())
    }

    pub fn credentials(&self) -> Credentials {
        *self.creds.lock()
    }

    pub fn set_credentials(&self, creds: Credentials) {
        *self.creds.lock() = creds;
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    /// Recorded exit code (meaningful once Dying)
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn futexes(&self) -> &FutexTable {
        &self.futexes
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, cwd: &str) {
        *self.cwd.lock() = String::from(cwd);
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Create a thread starting with `registers`
    pub fn create_thread(self: &Arc<Self>, registers: RegisterContext) -> KResult<Arc<Thread>> {
        if !self.is_alive() {
            return Err(Status::NoSuchProcess);
        }
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let thread = Thread::new(tid, Arc::downgrade(self), registers);
        self.threads.lock().push(thread.clone());
        Ok(thread)
    }

    /// Lowest-numbered thread still in the thread list
    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        self.threads.lock().iter().min_by_key(|t| t.tid()).cloned()
    }

    pub fn find_thread(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        self.threads.lock().iter().find(|t| t.tid() == tid).cloned()
    }

    /// Snapshot of the thread list
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().clone()
    }

    pub fn remove_thread(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        let mut threads = self.threads.lock();
        let index = threads.iter().position(|t| t.tid() == tid)?;
        Some(threads.remove(index))
    }

    /// Threads that have not begun exiting
    pub fn live_thread_count(&self) -> usize {
        self.threads.lock().iter().filter(|t| !t.is_exiting()).count()
    }

    // ========================================================================
    // Exit
    // ========================================================================

    /// Move Running -> Dying, recording `code`
    ///
    /// Returns false if the process was already exiting.
    pub fn begin_exit(&self, code: i32) -> bool {
        let mut state = self.state.lock();
        if *state != ProcessState::Running {
            return false;
        }
        *state = ProcessState::Dying;
        self.exit_code.store(code, Ordering::Release);
        true
    }

    /// Move Dying -> Zombie and wake anyone watching the process
    pub fn finish_exit(&self) {
        *self.state.lock() = ProcessState::Zombie;
        self.base.signal_watchers();
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// Register `child` and point it back at this process
    pub fn add_child(self: &Arc<Self>, child: Arc<Process>) {
        *child.parent.lock() = Arc::downgrade(self);
        self.children.lock().push(child);
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    pub fn child_pids(&self) -> Vec<Pid> {
        self.children.lock().iter().map(|c| c.pid()).collect()
    }

    /// Remove a zombie child matching `pid` (-1 for any)
    ///
    /// `Ok(None)` means matching children exist but none has exited yet.
    pub fn take_dead_child(&self, pid: Pid) -> KResult<Option<Arc<Process>>> {
        let mut children = self.children.lock();
        let mut matched = false;
        let mut found = None;
        for (i, child) in children.iter().enumerate() {
            if pid != -1 && child.pid() != pid {
                continue;
            }
            matched = true;
            if child.state() == ProcessState::Zombie {
                found = Some(i);
                break;
            }
        }
        if !matched {
            return Err(Status::NoChild);
        }
        Ok(found.map(|i| children.remove(i)))
    }

    /// Remove a child regardless of state
    pub fn take_child(&self, pid: Pid) -> Option<Arc<Process>> {
        let mut children = self.children.lock();
        let index = children.iter().position(|c| c.pid() == pid)?;
        Some(children.remove(index))
    }

    /// Drop every child, orphaning the live ones
    pub fn release_children(&self) -> Vec<Arc<Process>> {
        let children = core::mem::take(&mut *self.children.lock());
        for child in &children {
            *child.parent.lock() = Weak::new();
        }
        children
    }

    /// Wait for a child matching `pid` to become a zombie
    ///
    /// With `nohang` returns `Ok(None)` instead of blocking.
    pub fn wait_for_child(
        &self,
        current: &Arc<Thread>,
        pid: Pid,
        nohang: bool,
        timeout: Option<Duration>,
    ) -> KResult<Option<Arc<Process>>> {
        let mut outcome = None;
        let deadline = arch::deadline_after(timeout);
        let result = self.child_waiters.wait_until(current, deadline, || {
            let found = self.take_dead_child(pid);
            let done = !matches!(found, Ok(None)) || nohang;
            outcome = Some(found);
            done
        });
        match result {
            WaitResult::Woken => outcome.unwrap_or(Ok(None)),
            WaitResult::Interrupted => Err(Status::Interrupted),
            WaitResult::TimedOut => Err(Status::TimedOut),
        }
    }

    /// A child died: wake waiters in wait_pid
    pub fn handle_child_death(&self) {
        self.child_waiters.wake_all();
    }

    // ========================================================================
    // Signals
    // ========================================================================

    pub fn signal_handler(&self, sig: Signal) -> SignalHandler {
        self.signal_handlers.lock().get(sig)
    }

    /// Install a handler, returning the previous one
    pub fn set_signal_handler(&self, sig: Signal, handler: SignalHandler) -> KResult<SignalHandler> {
        self.signal_handlers.lock().set(sig, handler)
    }

    pub fn reset_signal_handler(&self, sig: Signal) {
        let _ = self.signal_handlers.lock().set(sig, SignalHandler::DEFAULT);
    }

    /// Whether `sig` would be dropped on delivery
    pub fn ignores(&self, sig: Signal) -> bool {
        match self.signal_handler(sig).action {
            SignalAction::Ignore => true,
            SignalAction::Default => signal::default_action(sig) == DefaultAction::Ignore,
            SignalAction::Handler(_) => false,
        }
    }

    /// Send `sig` to the main thread
    ///
    /// Ignored signals are discarded here so they never cut a wait short.
    pub fn send_signal(&self, sig: Signal) -> KResult<()> {
        let thread = self.main_thread().ok_or(Status::NoSuchProcess)?;
        if !self.ignores(sig) {
            thread.send_signal(sig);
        }
        Ok(())
    }

    // ========================================================================
    // Alarm
    // ========================================================================

    /// Arm SIGALRM `after` from now, or cancel with `None`
    ///
    /// Returns the time that was left on the previous alarm.
    pub fn set_alarm(&self, after: Option<Duration>) -> Option<Duration> {
        let now = arch::now_ns();
        let deadline = arch::deadline_after(after);
        let previous = core::mem::replace(&mut *self.alarm.lock(), deadline);
        previous.map(|d| Duration::from_nanos(d.saturating_sub(now)))
    }

    /// Send SIGALRM if the alarm is due at `now`; the alarm is one-shot
    pub fn fire_alarm(&self, now: u64) -> bool {
        let due = {
            let mut alarm = self.alarm.lock();
            match *alarm {
                Some(deadline) if deadline <= now => alarm.take().is_some(),
                _ => false,
            }
        };
        if due {
            log::debug!("pid {}: alarm expired", self.pid);
            if let Err(status) = self.send_signal(signal::SIGALRM) {
                log::debug!("pid {}: SIGALRM dropped: {}", self.pid, status);
            }
        }
        due
    }

    // ========================================================================
    // Information
    // ========================================================================

    /// Time since the process was created
    pub fn running_time(&self) -> Duration {
        Duration::from_nanos(arch::now_ns().saturating_sub(self.created_ns))
    }

    /// Snapshot for process listing
    pub fn info(&self) -> ProcessInfo {
        let creds = self.credentials();
        ProcessInfo {
            pid: self.pid,
            uid: creds.uid,
            gid: creds.gid,
            thread_count: self.live_thread_count() as u64,
            state: self.state(),
            running_secs: self.running_time().as_secs(),
            used_memory: self.address_space.mapped_bytes(),
            name: self.name(),
        }
    }
}

/// ============================================================================
/// Process Information
/// ============================================================================

/// What process listing reports about one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub uid: u32,
    pub gid: u32,
    pub thread_count: u64,
    pub state: ProcessState,
    pub running_secs: u64,
    /// Bytes mapped into the address space
    pub used_memory: u64,
    pub name: String,
}

impl ProcessInfo {
    /// Bytes reserved for the NUL-terminated name
    pub const NAME_LEN: usize = 64;

    /// Size of the user-visible record
    ///
    /// ```text
    /// 0   pid            i64
    /// 8   uid            u32
    /// 12  gid            u32
    /// 16  thread_count   u64
    /// 24  state          u32
    /// 28  reserved       u32
    /// 32  running_secs   u64
    /// 40  used_memory    u64
    /// 48  name           [u8; 64]
    /// ```
    pub const SIZE: usize = 48 + Self::NAME_LEN;

    /// Little-endian user layout; long names are truncated
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.pid.to_le_bytes());
        out[8..12].copy_from_slice(&self.uid.to_le_bytes());
        out[12..16].copy_from_slice(&self.gid.to_le_bytes());
        out[16..24].copy_from_slice(&self.thread_count.to_le_bytes());
        out[24..28].copy_from_slice(&u32::from(self.state as u8).to_le_bytes());
        out[32..40].copy_from_slice(&self.running_secs.to_le_bytes());
        out[40..48].copy_from_slice(&self.used_memory.to_le_bytes());
        let name = self.name.as_bytes();
        let len = name.len().min(Self::NAME_LEN - 1);
        out[48..48 + len].copy_from_slice(&name[..len]);
        out
    }
}

impl KernelObject for Process {
    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn is_signaled(&self) -> bool {
        self.state() == ProcessState::Zombie
    }
}

impl TypedObject for Process {
    const TYPE: ObjectType = ObjectType::Process;
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::HandleFlags;
    use crate::sched::signal::{SignalAction, SIGUSR1};

    fn process(pid: Pid) -> Arc<Process> {
        Process::new(pid, "test", AddressSpace::new(), HandleTable::new(16))
    }

    #[test]
    fn test_thread_ids_per_process() {
        let p = process(1);
        let a = p.create_thread(RegisterContext::new()).unwrap();
        let b = p.create_thread(RegisterContext::new()).unwrap();
        assert_eq!(a.tid(), 1);
        assert_eq!(b.tid(), 2);
        assert_eq!(p.main_thread().unwrap().tid(), 1);
        assert!(Arc::ptr_eq(&a.process().unwrap(), &p));

        let q = process(2);
        assert_eq!(q.create_thread(RegisterContext::new()).unwrap().tid(), 1);
    }

    #[test]
    fn test_no_threads_after_exit() {
        let p = process(1);
        assert!(p.begin_exit(3));
        assert!(!p.begin_exit(4));
        assert_eq!(p.exit_code(), 3);
        assert_eq!(p.create_thread(RegisterContext::new()).err(), Some(Status::NoSuchProcess));
    }

    #[test]
    fn test_take_dead_child() {
        let parent = process(1);
        let child = process(2);
        parent.add_child(child.clone());
        assert_eq!(child.ppid(), 1);

        assert!(matches!(parent.take_dead_child(-1), Ok(None)));
        assert_eq!(parent.take_dead_child(9).err(), Some(Status::NoChild));

        child.begin_exit(7);
        child.finish_exit();
        let reaped = parent.take_dead_child(2).unwrap().unwrap();
        assert_eq!(reaped.exit_code(), 7);
        assert_eq!(parent.take_dead_child(-1).err(), Some(Status::NoChild));
    }

    #[test]
    fn test_wait_for_child_nohang() {
        let parent = process(1);
        let waiter = parent.create_thread(RegisterContext::new()).unwrap();
        parent.add_child(process(2));
        assert!(matches!(parent.wait_for_child(&waiter, -1, true, None), Ok(None)));
    }

    #[test]
    fn test_wait_for_child_blocks_until_zombie() {
        let parent = process(1);
        let waiter = parent.create_thread(RegisterContext::new()).unwrap();
        let child = process(2);
        parent.add_child(child.clone());

        let dying = child.clone();
        let notify = parent.clone();
        let probe = waiter.clone();
        let handle = std::thread::spawn(move || {
            while probe.state() != crate::sched::ThreadState::Blocked {
                std::thread::yield_now();
            }
            dying.begin_exit(42);
            dying.finish_exit();
            notify.handle_child_death();
        });

        let reaped = parent.wait_for_child(&waiter, -1, false, None).unwrap().unwrap();
        handle.join().unwrap();
        assert_eq!(reaped.pid(), 2);
        assert_eq!(reaped.exit_code(), 42);
        assert_eq!(parent.child_count(), 0);
    }

    #[test]
    fn test_fork_copy_inherits() {
        let parent = process(1);
        parent.set_cwd("/home");
        parent.set_credentials(Credentials { uid: 5, gid: 5, euid: 5, egid: 5 });
        let handler = SignalHandler {
            action: SignalAction::Ignore,
            ..SignalHandler::DEFAULT
        };
        parent.set_signal_handler(SIGUSR1, handler).unwrap();
        let obj: Arc<dyn KernelObject> = process(99);
        let h = parent.handles().allocate(obj, HandleFlags::empty()).unwrap();

        let child = parent.fork_copy(2);
        assert_eq!(child.cwd(), "/home");
        assert_eq!(child.credentials().uid, 5);
        assert_eq!(child.signal_handler(SIGUSR1).action, SignalAction::Ignore);
        assert!(child.handles().get(h).is_some());
        child.handles().destroy(h).unwrap();
        assert!(parent.handles().get(h).is_some());
    }

    #[test]
    fn test_process_signaled_when_zombie() {
        let p = process(1);
        assert!(!p.is_signaled());
        p.begin_exit(0);
        assert!(!p.is_signaled());
        p.finish_exit();
        assert!(p.is_signaled());
    }

    #[test]
    fn test_alarm_rearm_reports_remaining() {
        let p = process(1);
        assert_eq!(p.set_alarm(Some(Duration::from_secs(10))), None);
        let left = p.set_alarm(Some(Duration::from_secs(3))).unwrap();
        assert!(left > Duration::from_secs(9) && left <= Duration::from_secs(10));
        assert!(p.set_alarm(None).is_some());
        assert!(!p.fire_alarm(u64::MAX));
    }

    #[test]
    fn test_alarm_fires_once() {
        let p = process(1);
        let main = p.create_thread(RegisterContext::new()).unwrap();
        p.set_alarm(Some(Duration::from_millis(1)));
        assert!(!p.fire_alarm(0));
        assert!(p.fire_alarm(u64::MAX));
        assert!(!p.fire_alarm(u64::MAX));
        assert_eq!(main.pending_signals(), 1 << (signal::SIGALRM - 1));
    }

    #[test]
    fn test_forked_child_has_no_alarm() {
        let parent = process(1);
        parent.set_alarm(Some(Duration::from_secs(10)));
        let child = parent.fork_copy(2);
        assert_eq!(child.set_alarm(None), None);
    }

    #[test]
    fn test_info_record() {
        let p = Process::new(7, "lemon.wm", AddressSpace::new(), HandleTable::new(4));
        p.set_credentials(Credentials { uid: 100, gid: 200, euid: 100, egid: 200 });
        p.create_thread(RegisterContext::new()).unwrap();
        p.create_thread(RegisterContext::new()).unwrap();

        let info = p.info();
        assert_eq!(info.thread_count, 2);
        assert_eq!(info.state, ProcessState::Running);

        let raw = info.to_bytes();
        assert_eq!(raw.len(), ProcessInfo::SIZE);
        assert_eq!(raw[0..8], 7i64.to_le_bytes());
        assert_eq!(raw[8..12], 100u32.to_le_bytes());
        assert_eq!(raw[12..16], 200u32.to_le_bytes());
        assert_eq!(raw[16..24], 2u64.to_le_bytes());
        assert_eq!(&raw[48..57], b"lemon.wm\0");
    }

    #[test]
    fn test_info_name_truncated() {
        let long = "x".repeat(100);
        let p = Process::new(1, &long, AddressSpace::new(), HandleTable::new(4));
        let raw = p.info().to_bytes();
        assert_eq!(raw[ProcessInfo::SIZE - 1], 0);
        assert_eq!(raw[ProcessInfo::SIZE - 2], b'x');
    }
}
