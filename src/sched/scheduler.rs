// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler implementation
//!
//! Per-CPU round-robin run queues. Each queue holds every live thread
//! assigned to that CPU; `schedule` rotates through them, skipping blocked
//! threads and dropping zombies, so a blocked thread is never selected and
//! an exited one leaves the run queue on its next pass.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch;
use crate::sched::state::ThreadState;
use crate::sched::thread::Thread;
use crate::sync::SpinMutex;

/// Run queue for one logical CPU
struct CpuQueue {
    queue: VecDeque<Arc<Thread>>,
    current: Option<Arc<Thread>>,
    ticks_left: u32,
}

impl CpuQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            ticks_left: 0,
        }
    }

    fn load(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }
}

/// Scheduler
pub struct Scheduler {
    cpus: Vec<SpinMutex<CpuQueue>>,
    time_slice: u32,
}

impl Scheduler {
    /// Create a scheduler for `cpu_count` CPUs with `time_slice` ticks per quantum
    pub fn new(cpu_count: usize, time_slice: u32) -> Self {
        let cpus = (0..cpu_count.max(1))
            .map(|_| SpinMutex::new(CpuQueue::new()))
            .collect();
        Self {
            cpus,
            time_slice: time_slice.max(1),
        }
    }

    /// Number of logical CPUs
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Add a thread to the least loaded CPU
    pub fn insert_thread(&self, thread: Arc<Thread>) -> usize {
        let cpu = (0..self.cpus.len())
            .min_by_key(|&cpu| self.cpus[cpu].lock().load())
            .unwrap_or(0);
        thread.set_cpu(Some(cpu));
        self.cpus[cpu].lock().queue.push_back(thread);
        cpu
    }

    /// Remove a thread from whichever CPU holds it
    pub fn remove_thread(&self, thread: &Arc<Thread>) -> bool {
        let Some(cpu) = thread.cpu() else {
            return false;
        };
        let mut q = self.cpus[cpu].lock();
        let before = q.load();
        q.queue.retain(|t| !Arc::ptr_eq(t, thread));
        if q.current.as_ref().map_or(false, |t| Arc::ptr_eq(t, thread)) {
            q.current = None;
        }
        let removed = q.load() != before;
        drop(q);
        if removed {
            thread.set_cpu(None);
        }
        removed
    }

    /// Pick the next thread to run on `cpu`
    ///
    /// The outgoing thread goes to the back of the queue. Blocked threads
    /// are skipped, zombies are dropped. Returns None if the CPU goes idle.
    pub fn schedule(&self, cpu: usize) -> Option<Arc<Thread>> {
        let mut q = self.cpus.get(cpu)?.lock();
        if let Some(prev) = q.current.take() {
            q.queue.push_back(prev);
        }

        let mut next = None;
        for _ in 0..q.queue.len() {
            let Some(thread) = q.queue.pop_front() else {
                break;
            };
            match thread.state() {
                ThreadState::Zombie => thread.set_cpu(None),
                state if state.is_schedulable() => {
                    next = Some(thread);
                    break;
                }
                _ => q.queue.push_back(thread),
            }
        }

        q.current = next.clone();
        q.ticks_left = self.time_slice;
        next
    }

    /// Voluntarily give up `cpu`
    pub fn yield_current(&self, cpu: usize) -> Option<Arc<Thread>> {
        let next = self.schedule(cpu);
        arch::yield_cpu();
        next
    }

    /// Timer tick on `cpu`
    ///
    /// Returns true if the current thread's quantum expired and it was
    /// preemptible, in which case a new thread has been scheduled.
    pub fn tick(&self, cpu: usize) -> bool {
        let Some(slot) = self.cpus.get(cpu) else {
            return false;
        };
        {
            let mut q = slot.lock();
            let preemptible = match q.current.as_ref() {
                Some(current) => current.is_preemptible(),
                None => return false,
            };
            q.ticks_left = q.ticks_left.saturating_sub(1);
            if q.ticks_left > 0 || !preemptible {
                return false;
            }
        }
        self.schedule(cpu);
        true
    }

    /// Thread currently selected on `cpu`
    pub fn current(&self, cpu: usize) -> Option<Arc<Thread>> {
        self.cpus.get(cpu)?.lock().current.clone()
    }

    /// Threads held by all run queues
    pub fn thread_count(&self) -> usize {
        self.cpus.iter().map(|q| q.lock().load()).sum()
    }

    /// Threads that `schedule` could pick right now
    pub fn runnable_count(&self) -> usize {
        self.cpus
            .iter()
            .map(|q| {
                let q = q.lock();
                q.queue
                    .iter()
                    .chain(q.current.iter())
                    .filter(|t| t.state().is_schedulable())
                    .count()
            })
            .sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
