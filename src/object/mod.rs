// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Objects
//!
//! Everything a process can reach through a handle is a kernel object:
//! services, message interfaces, message endpoints, and processes.
//!
//! # Design
//!
//! - **Lifetime**: memory is reclaimed when the last `Arc` drops; every
//!   handle and every structural reference holds one
//! - **Destruction**: the logical close (waking peers, unlinking from
//!   registries) runs once, when the last handle is destroyed. A second
//!   destroy is an invariant violation and panics
//! - **Type tags**: every object reports an [`ObjectType`]; casts to a
//!   concrete type check the tag first and fail with `InvalidArgument`
//! - **Watching**: waiters register a blocker on the object and are woken
//!   when it becomes signaled (data available, connection pending, exited)
//!
//! # Modules
//!
//! - [`handle`] - Per-process handle table
//! - [`watcher`] - Waiting on several objects at once

pub mod handle;
pub mod watcher;

use alloc::sync::Arc;
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::error::{KResult, Status};
use crate::sched::Blocker;
use crate::sync::WaitQueue;

// Re-exports
pub use handle::{HandleEntry, HandleFlags, HandleId, HandleTable};
pub use watcher::wait_any;

/// ============================================================================
/// Kernel Object Types
/// ============================================================================

/// Kernel object type tag
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Named registry of interfaces
    Service = 1,
    /// Connection rendezvous point
    MessageInterface = 2,
    /// One side of an established channel
    MessageEndpoint = 3,
    /// Process (watchable for exit)
    Process = 4,
}

impl ObjectType {
    /// Get raw value
    pub const fn into_raw(self) -> u32 {
        self as u32
    }

    /// Get name as string
    pub const fn name(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::MessageInterface => "interface",
            Self::MessageEndpoint => "endpoint",
            Self::Process => "process",
        }
    }
}

/// Kernel object ID counter
static NEXT_KOID: AtomicU64 = AtomicU64::new(1);

/// ============================================================================
/// Kernel Object Base
/// ============================================================================

/// State shared by all kernel objects
pub struct KernelObjectBase {
    obj_type: ObjectType,
    koid: u64,
    handle_count: AtomicUsize,
    destroyed: AtomicBool,
    watchers: WaitQueue,
}

impl KernelObjectBase {
    /// Create a new kernel object base
    pub fn new(obj_type: ObjectType) -> Self {
        Self {
            obj_type,
            koid: NEXT_KOID.fetch_add(1, Ordering::Relaxed),
            handle_count: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            watchers: WaitQueue::new(),
        }
    }

    pub fn obj_type(&self) -> ObjectType {
        self.obj_type
    }

    /// System-wide object ID
    pub fn koid(&self) -> u64 {
        self.koid
    }

    /// Number of handles referring to the object
    pub fn handle_count(&self) -> usize {
        self.handle_count.load(Ordering::Acquire)
    }

    pub(crate) fn acquire_handle(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one handle; true if it was the last
    pub(crate) fn release_handle(&self) -> bool {
        let prev = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("{} object {} released more handles than it had", self.obj_type.name(), self.koid);
        }
        prev == 1
    }

    /// Check if the object has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Mark the object destroyed
    ///
    /// # Panics
    ///
    /// Panics if the object was already destroyed.
    pub fn mark_destroyed(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            panic!("double destroy of {} object {}", self.obj_type.name(), self.koid);
        }
    }

    /// Register a blocker to be woken when the object is signaled
    pub fn watch(&self, blocker: Arc<Blocker>) {
        self.watchers.enqueue(blocker);
    }

    pub fn unwatch(&self, blocker: &Arc<Blocker>) {
        self.watchers.remove(blocker);
    }

    /// Wake every watcher
    pub fn signal_watchers(&self) -> usize {
        self.watchers.wake_all()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

/// ============================================================================
/// Kernel Object Trait
/// ============================================================================

/// Conversion to `Any` for checked downcasts
pub trait AsAnyArc: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Anything reachable through a handle
pub trait KernelObject: AsAnyArc {
    /// Shared object state
    fn base(&self) -> &KernelObjectBase;

    /// Run-time type tag
    fn object_type(&self) -> ObjectType {
        self.base().obj_type()
    }

    /// Whether a watcher waiting on this object should wake
    fn is_signaled(&self) -> bool {
        false
    }

    /// Logical close, run once when the last handle goes away
    fn destroy(&self) {}
}

/// A kernel object with a fixed type tag
pub trait TypedObject: KernelObject {
    const TYPE: ObjectType;
}

/// Cast an object to a concrete type after checking its tag
pub fn downcast<T: TypedObject>(object: Arc<dyn KernelObject>) -> KResult<Arc<T>> {
    if object.object_type() != T::TYPE {
        return Err(Status::InvalidArgument);
    }
    object.into_any().downcast::<T>().map_err(|_| Status::InvalidArgument)
}

/// Drop one handle reference, destroying the object if it was the last
pub(crate) fn release(object: &Arc<dyn KernelObject>) {
    let base = object.base();
    if base.release_handle() {
        log::trace!("destroying {} object {}", base.obj_type().name(), base.koid());
        base.mark_destroyed();
        object.destroy();
        base.signal_watchers();
    }
}

/// Destroy an object that never made it into a handle table
pub(crate) fn discard(object: &dyn KernelObject) {
    let base = object.base();
    base.mark_destroyed();
    object.destroy();
    base.signal_watchers();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    /// Minimal object for table tests
    pub(crate) struct Dummy {
        pub base: KernelObjectBase,
        pub destroyed: AtomicUsize,
    }

    impl Dummy {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                base: KernelObjectBase::new(ObjectType::Service),
                destroyed: AtomicUsize::new(0),
            })
        }
    }

    impl KernelObject for Dummy {
        fn base(&self) -> &KernelObjectBase {
            &self.base
        }

        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TypedObject for Dummy {
        const TYPE: ObjectType = ObjectType::Service;
    }

    struct Other {
        base: KernelObjectBase,
    }

    impl KernelObject for Other {
        fn base(&self) -> &KernelObjectBase {
            &self.base
        }
    }

    #[test]
    fn test_object_type_names() {
        assert_eq!(ObjectType::MessageEndpoint.name(), "endpoint");
        assert_eq!(ObjectType::Process.into_raw(), 4);
    }

    #[test]
    fn test_koids_unique() {
        let a = KernelObjectBase::new(ObjectType::Service);
        let b = KernelObjectBase::new(ObjectType::Service);
        assert_ne!(a.koid(), b.koid());
    }

    #[test]
    fn test_downcast_checks_tag() {
        let dummy: Arc<dyn KernelObject> = Dummy::new();
        assert!(downcast::<Dummy>(dummy).is_ok());

        let other: Arc<dyn KernelObject> = Arc::new(Other {
            base: KernelObjectBase::new(ObjectType::MessageEndpoint),
        });
        assert_eq!(downcast::<Dummy>(other).err(), Some(Status::InvalidArgument));
    }

    #[test]
    fn test_release_destroys_on_last_handle() {
        let dummy = Dummy::new();
        let object: Arc<dyn KernelObject> = dummy.clone();
        object.base().acquire_handle();
        object.base().acquire_handle();
        release(&object);
        assert_eq!(dummy.destroyed.load(Ordering::SeqCst), 0);
        release(&object);
        assert_eq!(dummy.destroyed.load(Ordering::SeqCst), 1);
        assert!(dummy.base.is_destroyed());
    }

    #[test]
    #[should_panic(expected = "double destroy")]
    fn test_double_destroy_panics() {
        let base = KernelObjectBase::new(ObjectType::Service);
        base.mark_destroyed();
        base.mark_destroyed();
    }

    #[test]
    #[should_panic(expected = "released more handles")]
    fn test_handle_underflow_panics() {
        let base = KernelObjectBase::new(ObjectType::Service);
        base.release_handle();
    }
}
