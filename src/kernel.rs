// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Registry
//!
//! [`Kernel`] owns every system-wide table: the scheduler, the process
//! table, the service namespace and the shared memory registry, plus the
//! filesystem and image loader collaborators. It is created once at boot
//! and passed by reference into every syscall; there are no ambient
//! globals.

use alloc::string::String;
use alloc::sync::Arc;

use bitflags::bitflags;

use crate::arch::{self, RegisterContext};
use crate::config::KernelConfig;
use crate::error::{KResult, Status};
use crate::exec::ImageLoader;
use crate::fs::Filesystem;
use crate::ipc::ServiceRegistry;
use crate::mm::SharedMemoryRegistry;
use crate::object::HandleTable;
use crate::process::{AddressSpace, Pid, Process, ProcessInfo, ProcessTable};
use crate::sched::signal::{self, Signal, SIGCHLD};
use crate::sched::{Scheduler, Thread, ThreadId, ThreadState};
use crate::syscall::{self, SyscallExit};

bitflags! {
    /// Flags accepted by exec
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecFlags: u64 {
        /// Make the new process a child of the caller and pass it the
        /// caller's handles (minus close-on-exec ones)
        const CHILD = 1 << 0;
    }
}

bitflags! {
    /// Flags accepted by wait_pid
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WaitFlags: u64 {
        /// Return immediately if no child has exited
        const NOHANG = 1 << 0;
    }
}

/// The kernel
pub struct Kernel {
    config: KernelConfig,
    scheduler: Scheduler,
    processes: ProcessTable,
    services: Arc<ServiceRegistry>,
    shared_memory: SharedMemoryRegistry,
    fs: Arc<dyn Filesystem>,
    loader: Arc<dyn ImageLoader>,
}

impl Kernel {
    pub fn new(config: KernelConfig, fs: Arc<dyn Filesystem>, loader: Arc<dyn ImageLoader>) -> Self {
        log::info!(
            "kernel: {} cpu(s), {} handles per process",
            config.cpu_count,
            config.max_handles
        );
        Self {
            scheduler: Scheduler::new(config.cpu_count, config.time_slice_ticks),
            config,
            processes: ProcessTable::new(),
            services: ServiceRegistry::new(),
            shared_memory: SharedMemoryRegistry::new(),
            fs,
            loader,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn shared_memory(&self) -> &SharedMemoryRegistry {
        &self.shared_memory
    }

    pub fn filesystem(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    // ========================================================================
    // Process creation
    // ========================================================================

    /// Create an empty process (no threads, empty address space)
    pub fn create_process(&self, name: &str, parent: Option<&Arc<Process>>) -> Arc<Process> {
        self.create_process_with(name, parent, HandleTable::new(self.config.max_handles))
    }

    fn create_process_with(&self, name: &str, parent: Option<&Arc<Process>>, handles: HandleTable) -> Arc<Process> {
        let pid = self.processes.allocate_pid();
        let process = Process::new(pid, name, AddressSpace::new(), handles);
        if let Some(parent) = parent {
            process.set_credentials(parent.credentials());
            process.set_cwd(&parent.cwd());
            parent.add_child(process.clone());
        }
        self.processes.insert(process.clone());
        log::info!("pid {}: created '{}'", pid, name);
        process
    }

    /// Add a thread to `process` and make it runnable
    pub fn spawn_thread(&self, process: &Arc<Process>, registers: RegisterContext) -> KResult<Arc<Thread>> {
        let thread = process.create_thread(registers)?;
        self.scheduler.insert_thread(thread.clone());
        Ok(thread)
    }

    /// Load the program at `path` into a fresh `process` and start its main thread
    fn load_program(
        &self,
        process: &Arc<Process>,
        path: &str,
        argv: &[String],
        envp: &[String],
    ) -> KResult<Arc<Thread>> {
        let node = self
            .fs
            .resolve_path(path, &process.cwd())
            .ok_or(Status::NoSuchEntry)?;
        let image = self.fs.read_all(&node)?;
        let loaded = self
            .loader
            .load_image(&image, argv, envp, process.address_space())?;

        let mut registers = RegisterContext::for_entry(loaded.entry, loaded.stack_pointer);
        registers.rdi = loaded.argc;
        registers.rsi = loaded.argv;
        registers.rdx = loaded.envp;
        self.spawn_thread(process, registers)
    }

    /// Create a process running the program at `path`
    pub fn spawn_image(
        &self,
        path: &str,
        argv: &[String],
        envp: &[String],
        parent: Option<&Arc<Process>>,
    ) -> KResult<Arc<Process>> {
        let process = self.create_process(path, parent);
        if let Err(status) = self.load_program(&process, path, argv, envp) {
            self.discard(&process);
            return Err(status);
        }
        Ok(process)
    }

    /// Duplicate `parent`; the child's main thread resumes from `registers`
    /// with a zero return value
    pub fn fork(&self, parent: &Arc<Process>, registers: &RegisterContext) -> KResult<Arc<Process>> {
        let pid = self.processes.allocate_pid();
        let child = parent.fork_copy(pid);

        let mut child_regs = *registers;
        child_regs.rax = 0;
        self.spawn_thread(&child, child_regs)?;

        parent.add_child(child.clone());
        self.processes.insert(child.clone());
        log::info!("pid {}: forked from {}", pid, parent.pid());
        Ok(child)
    }

    /// Start the program at `path` in a new process on behalf of `caller`
    pub fn exec(
        &self,
        caller: &Arc<Process>,
        path: &str,
        argv: &[String],
        envp: &[String],
        flags: ExecFlags,
    ) -> KResult<Arc<Process>> {
        let process = if flags.contains(ExecFlags::CHILD) {
            self.create_process_with(path, Some(caller), caller.handles().exec_copy())
        } else {
            let orphan = self.create_process(path, None);
            orphan.set_credentials(caller.credentials());
            orphan.set_cwd(&caller.cwd());
            orphan
        };
        if let Err(status) = self.load_program(&process, path, argv, envp) {
            self.discard(&process);
            return Err(status);
        }
        Ok(process)
    }

    /// Undo a failed spawn
    fn discard(&self, process: &Arc<Process>) {
        if let Some(parent) = process.parent() {
            parent.take_child(process.pid());
        }
        process.begin_exit(-1);
        process.handles().close_all();
        process.finish_exit();
        self.processes.remove(process.pid());
    }

    // ========================================================================
    // Exit
    // ========================================================================

    /// Stop every thread of `process` and turn it into a zombie
    pub fn terminate_process(&self, process: &Arc<Process>, code: i32) {
        if !process.begin_exit(code) {
            return;
        }
        log::info!("pid {}: exited with code {}", process.pid(), code);

        for thread in process.threads() {
            thread.kill();
            if thread.state() == ThreadState::Zombie {
                self.retire_thread(process, &thread);
            }
        }
        process.handles().close_all();
        process.address_space().clear();
        for child in process.release_children() {
            if child.state() == crate::process::ProcessState::Zombie {
                self.processes.remove(child.pid());
            }
        }
        self.shared_memory.collect();
        process.finish_exit();

        match process.parent() {
            Some(parent) => {
                if let Err(status) = parent.send_signal(SIGCHLD) {
                    log::debug!("pid {}: SIGCHLD to parent {} dropped: {}", process.pid(), parent.pid(), status);
                }
                parent.handle_child_death();
            }
            None => {
                self.processes.remove(process.pid());
            }
        }
    }

    /// Exit one thread; the process exits with 0 when its last thread does
    pub fn exit_thread(&self, process: &Arc<Process>, thread: &Arc<Thread>) {
        thread.kill();
        if thread.state() == ThreadState::Zombie {
            self.retire_thread(process, thread);
        }
        if process.live_thread_count() == 0 {
            self.terminate_process(process, 0);
        }
    }

    /// Drop a finished thread from the scheduler and its process
    pub fn retire_thread(&self, process: &Process, thread: &Arc<Thread>) {
        thread.finish_exit();
        self.scheduler.remove_thread(thread);
        process.remove_thread(thread.tid());
    }

    /// Collect an exited child of `process`
    ///
    /// Returns the child's PID and exit code, or None under `NOHANG` when
    /// no matching child has exited yet.
    pub fn wait_pid(
        &self,
        process: &Arc<Process>,
        current: &Arc<Thread>,
        pid: Pid,
        flags: WaitFlags,
    ) -> KResult<Option<(Pid, i32)>> {
        let nohang = flags.contains(WaitFlags::NOHANG);
        let Some(child) = process.wait_for_child(current, pid, nohang, None)? else {
            return Ok(None);
        };
        self.processes.remove(child.pid());
        Ok(Some((child.pid(), child.exit_code())))
    }

    /// Send `sig` to process `pid` on behalf of `sender`
    ///
    /// Signal 0 only checks that the target exists and may be signalled.
    pub fn kill(&self, sender: &Process, pid: Pid, sig: Signal) -> KResult<()> {
        if sig != 0 && !signal::is_valid(sig) {
            return Err(Status::InvalidArgument);
        }
        let target = self.processes.get(pid).ok_or(Status::NoSuchProcess)?;
        let creds = sender.credentials();
        if !creds.is_root() && creds.uid != target.credentials().uid {
            return Err(Status::NotPermitted);
        }
        if sig == 0 || !target.is_alive() {
            return Ok(());
        }
        target.send_signal(sig)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn find_process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.get(pid)
    }

    pub fn find_thread(&self, pid: Pid, tid: ThreadId) -> Option<Arc<Thread>> {
        self.processes.get(pid)?.find_thread(tid)
    }

    /// Information about `pid`
    pub fn process_info(&self, pid: Pid) -> KResult<ProcessInfo> {
        self.processes.get(pid).map(|p| p.info()).ok_or(Status::InvalidArgument)
    }

    /// Information about the first process above `pid`, if any
    pub fn next_process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        let mut cursor = pid;
        loop {
            let next = self.processes.next_after(cursor)?;
            // Reaped between the two lookups: move on
            match self.processes.get(next) {
                Some(process) => return Some(process.info()),
                None => cursor = next,
            }
        }
    }

    // ========================================================================
    // Kernel entry
    // ========================================================================

    /// Timer interrupt on `cpu`: fire due alarms, then run the time slice
    ///
    /// Returns true if the CPU switched threads.
    pub fn timer_tick(&self, cpu: usize) -> bool {
        self.fire_alarms();
        self.scheduler.tick(cpu)
    }

    /// Send SIGALRM to every live process whose alarm is due
    pub fn fire_alarms(&self) -> usize {
        let now = arch::now_ns();
        self.processes
            .all()
            .iter()
            .filter(|p| p.is_alive() && p.fire_alarm(now))
            .count()
    }

    /// Run the syscall in `registers` on behalf of `thread`
    pub fn handle_syscall(&self, thread: &Arc<Thread>, registers: &mut RegisterContext) -> SyscallExit {
        syscall::dispatch(self, thread, registers)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::FlatImageLoader;
    use crate::fs::Ramdisk;
    use crate::object::HandleFlags;
    use crate::process::ProcessState;

    fn kernel() -> Kernel {
        let fs = Ramdisk::new();
        fs.add_file("/bin/init", &[0x90; 32]);
        Kernel::new(KernelConfig::default(), Arc::new(fs), Arc::new(FlatImageLoader::new(8192)))
    }

    #[test]
    fn test_spawn_image() {
        let k = kernel();
        let p = k.spawn_image("/bin/init", &[String::from("init")], &[], None).unwrap();
        let main = p.main_thread().unwrap();
        assert_eq!(main.tid(), 1);
        assert_eq!(main.registers().rdi, 1);
        assert_eq!(k.scheduler().thread_count(), 1);
        assert!(k.find_process(p.pid()).is_some());
    }

    #[test]
    fn test_spawn_missing_image() {
        let k = kernel();
        assert_eq!(k.spawn_image("/bin/none", &[], &[], None).err(), Some(Status::NoSuchEntry));
        assert_eq!(k.processes().count(), 0);
    }

    #[test]
    fn test_fork_child_sees_zero() {
        let k = kernel();
        let parent = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let mut regs = parent.main_thread().unwrap().registers();
        regs.rax = 77;
        let child = k.fork(&parent, &regs).unwrap();

        let child_main = child.main_thread().unwrap();
        assert_eq!(child_main.registers().rax, 0);
        assert_eq!(child_main.tid(), 1);
        assert!(!child_main.in_kernel());
        assert_eq!(child.ppid(), parent.pid());
        assert_eq!(parent.child_pids(), [child.pid()]);
    }

    #[test]
    fn test_exec_child_drops_close_on_exec() {
        let k = kernel();
        let caller = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let svc = k.services().create_service("svc").unwrap();
        let kept = caller.handles().allocate(svc.clone(), HandleFlags::empty()).unwrap();
        let dropped = caller.handles().allocate(svc, HandleFlags::CLOSE_ON_EXEC).unwrap();

        let child = k.exec(&caller, "/bin/init", &[], &[], ExecFlags::CHILD).unwrap();
        assert!(child.handles().get(kept).is_some());
        assert!(child.handles().get(dropped).is_none());
        assert_eq!(child.ppid(), caller.pid());

        let orphan = k.exec(&caller, "/bin/init", &[], &[], ExecFlags::empty()).unwrap();
        assert_eq!(orphan.handles().count(), 0);
        assert_eq!(orphan.ppid(), 0);
    }

    #[test]
    fn test_terminate_and_reap() {
        let k = kernel();
        let parent = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let waiter = parent.main_thread().unwrap();
        let child = k.exec(&parent, "/bin/init", &[], &[], ExecFlags::CHILD).unwrap();

        assert_eq!(k.wait_pid(&parent, &waiter, -1, WaitFlags::NOHANG), Ok(None));
        k.terminate_process(&child, 9);
        assert_eq!(child.state(), ProcessState::Zombie);
        assert!(k.find_process(child.pid()).is_some());
        // SIGCHLD is ignored by default, so nothing is left pending
        assert_eq!(waiter.pending_signals(), 0);

        assert_eq!(k.wait_pid(&parent, &waiter, -1, WaitFlags::empty()), Ok(Some((child.pid(), 9))));
        assert!(k.find_process(child.pid()).is_none());
        assert_eq!(k.wait_pid(&parent, &waiter, -1, WaitFlags::empty()), Err(Status::NoChild));
    }

    #[test]
    fn test_orphan_removed_on_exit() {
        let k = kernel();
        let p = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        k.terminate_process(&p, 0);
        assert!(k.find_process(p.pid()).is_none());
        assert_eq!(k.scheduler().thread_count(), 0);
    }

    #[test]
    fn test_last_thread_exit_ends_process() {
        let k = kernel();
        let p = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let second = k.spawn_thread(&p, RegisterContext::new()).unwrap();
        let main = p.main_thread().unwrap();

        k.exit_thread(&p, &second);
        assert!(p.is_alive());
        k.exit_thread(&p, &main);
        assert_eq!(p.state(), ProcessState::Zombie);
        assert_eq!(p.exit_code(), 0);
    }

    #[test]
    fn test_kill_permissions() {
        let k = kernel();
        let a = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let b = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        b.set_credentials(crate::process::Credentials { uid: 1000, gid: 1000, euid: 1000, egid: 1000 });

        assert_eq!(k.kill(&b, a.pid(), signal::SIGTERM), Err(Status::NotPermitted));
        assert_eq!(k.kill(&a, 999, signal::SIGTERM), Err(Status::NoSuchProcess));
        assert_eq!(k.kill(&a, b.pid(), 200), Err(Status::InvalidArgument));
        k.kill(&a, b.pid(), signal::SIGUSR1).unwrap();
        assert_ne!(b.main_thread().unwrap().pending_signals(), 0);
    }

    #[test]
    fn test_timer_tick_fires_due_alarms() {
        let k = kernel();
        let p = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let idle = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        p.set_alarm(Some(core::time::Duration::from_millis(1)));
        idle.set_alarm(Some(core::time::Duration::from_secs(60)));
        std::thread::sleep(std::time::Duration::from_millis(3));

        k.timer_tick(0);
        assert_eq!(p.main_thread().unwrap().pending_signals(), 1 << (signal::SIGALRM - 1));
        assert_eq!(idle.main_thread().unwrap().pending_signals(), 0);
        assert_eq!(k.fire_alarms(), 0);
    }

    #[test]
    fn test_process_info_walk() {
        let k = kernel();
        let a = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let b = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        let c = k.spawn_image("/bin/init", &[], &[], None).unwrap();
        k.terminate_process(&b, 0);

        assert_eq!(k.process_info(a.pid()).unwrap().thread_count, 1);
        assert_eq!(k.process_info(b.pid()).err(), Some(Status::InvalidArgument));

        let mut seen = Vec::new();
        let mut cursor = 0;
        while let Some(info) = k.next_process_info(cursor) {
            cursor = info.pid;
            seen.push(info.pid);
        }
        assert_eq!(seen, [a.pid(), c.pid()]);
    }
}
