// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Message Endpoints
//!
//! One side of an established bidirectional connection. Messages written to
//! an endpoint land in its peer's inbox.
//!
//! # Design
//!
//! - **Paired**: created two at a time; each holds its peer weakly, so the
//!   pair never keeps itself alive
//! - **FIFO ordering**: messages are dequeued in the order they were queued
//! - **Bounded queue**: a full peer inbox fails the write with `QueueFull`
//! - **Fixed message size**: set by the interface, enforced on every write
//! - **Peer closure**: destroying one side wakes everything blocked on the
//!   other, which then sees `NotConnected`

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::time::Duration;

use crate::arch;
use crate::error::{KResult, Status};
use crate::ipc::interface::MessageInterface;
use crate::object::{KernelObject, KernelObjectBase, ObjectType, TypedObject};
use crate::sched::{Thread, WaitResult};
use crate::sync::{SpinMutex, WaitQueue};

/// ============================================================================
/// Message
/// ============================================================================

/// A queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(id: u64, data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_vec(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// ============================================================================
/// Endpoint
/// ============================================================================

struct EndpointInner {
    inbox: VecDeque<Message>,
    peer: Weak<MessageEndpoint>,
    /// Set once either side has been destroyed
    closed: bool,
}

/// Message endpoint
pub struct MessageEndpoint {
    base: KernelObjectBase,
    max_message_size: u16,
    queue_depth: usize,
    inner: SpinMutex<EndpointInner>,
    /// Threads blocked in `call` on this endpoint
    readers: WaitQueue,
    /// Interface whose connection list holds this endpoint (server side)
    interface: SpinMutex<Weak<MessageInterface>>,
}

impl MessageEndpoint {
    fn new(max_message_size: u16, queue_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            base: KernelObjectBase::new(ObjectType::MessageEndpoint),
            max_message_size,
            queue_depth: queue_depth.max(1),
            inner: SpinMutex::new(EndpointInner {
                inbox: VecDeque::new(),
                peer: Weak::new(),
                closed: false,
            }),
            readers: WaitQueue::new(),
            interface: SpinMutex::new(Weak::new()),
        })
    }

    /// Create a connected pair
    pub fn create_pair(max_message_size: u16, queue_depth: usize) -> (Arc<Self>, Arc<Self>) {
        let a = Self::new(max_message_size, queue_depth);
        let b = Self::new(max_message_size, queue_depth);
        a.inner.lock().peer = Arc::downgrade(&b);
        b.inner.lock().peer = Arc::downgrade(&a);
        (a, b)
    }

    pub fn max_message_size(&self) -> u16 {
        self.max_message_size
    }

    pub(crate) fn set_interface(&self, interface: &Arc<MessageInterface>) {
        *self.interface.lock() = Arc::downgrade(interface);
    }

    fn peer(&self) -> Option<Arc<MessageEndpoint>> {
        let inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.peer.upgrade()
    }

    /// Check if the other side is still there
    pub fn is_connected(&self) -> bool {
        self.peer().is_some()
    }

    /// Messages waiting in this endpoint's inbox
    pub fn pending_count(&self) -> usize {
        self.inner.lock().inbox.len()
    }

    /// Queue a message for the peer
    ///
    /// Non-blocking. Fails without enqueueing anything if `data` exceeds the
    /// message size, the peer inbox is full or the peer is gone.
    pub fn queue(&self, id: u64, data: &[u8]) -> KResult<()> {
        if data.len() > usize::from(self.max_message_size) {
            return Err(Status::MessageTooLarge);
        }
        let peer = self.peer().ok_or(Status::NotConnected)?;
        peer.deliver(Message::new(id, data))
    }

    fn deliver(&self, message: Message) -> KResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Status::NotConnected);
            }
            if inner.inbox.len() >= self.queue_depth {
                return Err(Status::QueueFull);
            }
            inner.inbox.push_back(message);
        }
        self.readers.wake_all();
        self.base.signal_watchers();
        Ok(())
    }

    /// Take the oldest message, if any
    ///
    /// An empty inbox whose peer has gone away reports `NotConnected`.
    pub fn dequeue(&self) -> KResult<Option<Message>> {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.inbox.pop_front() {
            return Ok(Some(message));
        }
        if inner.closed || inner.peer.strong_count() == 0 {
            return Err(Status::NotConnected);
        }
        Ok(None)
    }

    /// Queue a request and block for the reply with `expected_id`
    ///
    /// Other messages arriving meanwhile stay queued. Fails with `TimedOut`
    /// once `timeout` elapses, `NotConnected` if the peer closes, and
    /// `Interrupted` if the caller is interrupted.
    pub fn call(
        &self,
        current: &Arc<Thread>,
        id: u64,
        data: &[u8],
        expected_id: u64,
        timeout: Option<Duration>,
    ) -> KResult<Message> {
        self.queue(id, data)?;

        let deadline = arch::deadline_after(timeout);
        let mut reply = None;
        let result = self.readers.wait_until(current, deadline, || {
            let mut inner = self.inner.lock();
            if let Some(pos) = inner.inbox.iter().position(|m| m.id == expected_id) {
                reply = inner.inbox.remove(pos).map(Ok);
                return true;
            }
            if inner.closed || inner.peer.strong_count() == 0 {
                reply = Some(Err(Status::NotConnected));
                return true;
            }
            false
        });
        match result {
            WaitResult::Woken => reply.unwrap_or(Err(Status::NotConnected)),
            WaitResult::Interrupted => Err(Status::Interrupted),
            WaitResult::TimedOut => Err(Status::TimedOut),
        }
    }

    /// The other side went away
    fn peer_closed(&self) {
        self.inner.lock().closed = true;
        self.readers.wake_all();
        self.base.signal_watchers();
    }
}

impl KernelObject for MessageEndpoint {
    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn is_signaled(&self) -> bool {
        let inner = self.inner.lock();
        !inner.inbox.is_empty() || inner.closed || inner.peer.strong_count() == 0
    }

    fn destroy(&self) {
        let peer = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.inbox.clear();
            core::mem::take(&mut inner.peer)
        };
        if let Some(peer) = peer.upgrade() {
            peer.peer_closed();
        }
        self.readers.wake_all();

        let interface = core::mem::take(&mut *self.interface.lock());
        if let Some(interface) = interface.upgrade() {
            interface.remove_connection(self);
        }
        log::debug!("endpoint {} closed", self.base.koid());
    }
}

impl TypedObject for MessageEndpoint {
    const TYPE: ObjectType = ObjectType::MessageEndpoint;
}

// ============================================================================
// Tests
// ============================================================================
