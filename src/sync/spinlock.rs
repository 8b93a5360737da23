// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Spinlock Implementation
//!
//! A test-and-set spinlock for short kernel critical sections.
//!
//! A spinlock is never held across a blocking operation, so a waiter that
//! spins longer than its retry budget is looking at a lock that will never
//! be released. Exceeding the budget panics with a deadlock report instead
//! of hanging the CPU.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;
use crate::config::SPIN_RETRY_BUDGET;

/// A spinlock with a deadlock retry budget
pub struct SpinMutex<T> {
    locked: AtomicBool,
    budget: u32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Create a new spinlock with the default retry budget
    pub const fn new(data: T) -> Self {
        Self::with_budget(data, SPIN_RETRY_BUDGET)
    }

    /// Create a spinlock that declares deadlock after `budget` retries
    pub const fn with_budget(data: T, budget: u32) -> Self {
        Self {
            locked: AtomicBool::new(false),
            budget,
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning until it becomes available
    ///
    /// # Panics
    ///
    /// Panics if the lock stays held for more than the retry budget.
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        let mut retries: u32 = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Wait for the holder to release before retrying the exchange
            while self.locked.load(Ordering::Relaxed) {
                retries = retries.saturating_add(1);
                if retries >= self.budget {
                    self.deadlock(retries);
                }
                arch::cpu_relax();
            }
        }
        SpinMutexGuard { mutex: self }
    }

    /// Try to acquire the lock without spinning
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinMutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Check if the mutex is currently locked
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Mutable access without locking; the borrow proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the lock and return the data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    #[cold]
    #[inline(never)]
    fn deadlock(&self, retries: u32) -> ! {
        log::error!("spinlock {:p} held past {} retries", self, retries);
        panic!("spinlock deadlock detected after {} retries", retries);
    }
}

impl<T: Default> Default for SpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> core::fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard for a SpinMutex
///
/// Dropping the guard releases the lock, including during unwinding.
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<'a, T> Drop for SpinMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
    }
}

impl<'a, T> Deref for SpinMutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for SpinMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

// ============================================================================
// Tests
// ============================================================================
