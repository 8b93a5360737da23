// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Process Table
//!
//! Every process that has not been reaped, keyed by PID. PIDs come from a
//! monotonically increasing counter and are never handed out twice.

use alloc::collections::BTreeMap;
use core::ops::Bound;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, Ordering};

use spin::RwLock;

use crate::process::{Pid, Process, PID_FIRST_USER};

/// Process table
pub struct ProcessTable {
    processes: RwLock<BTreeMap<Pid, Arc<Process>>>,
    next_pid: AtomicI64,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            processes: RwLock::new(BTreeMap::new()),
            next_pid: AtomicI64::new(PID_FIRST_USER),
        }
    }

    /// Reserve a fresh PID
    pub fn allocate_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, process: Arc<Process>) {
        self.processes.write().insert(process.pid(), process);
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.read().get(&pid).cloned()
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.write().remove(&pid)
    }

    pub fn count(&self) -> usize {
        self.processes.read().len()
    }

    /// Snapshot of all PIDs in ascending order
    pub fn pids(&self) -> Vec<Pid> {
        self.processes.read().keys().copied().collect()
    }

    /// Snapshot of every process
    pub fn all(&self) -> Vec<Arc<Process>> {
        self.processes.read().values().cloned().collect()
    }

    /// Lowest PID above `pid`, for walking the table one entry at a time
    pub fn next_after(&self, pid: Pid) -> Option<Pid> {
        self.processes
            .read()
            .range((Bound::Excluded(pid), Bound::Unbounded))
            .next()
            .map(|(&pid, _)| pid)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
