// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Message Interfaces
//!
//! The rendezvous point clients connect to. A connect creates an endpoint
//! pair up front and parks the client until the owner accepts; accept hands
//! the server half to the owner and releases the client with its half.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::{KResult, Status};
use crate::ipc::endpoint::MessageEndpoint;
use crate::ipc::service::Service;
use crate::object::{KernelObject, KernelObjectBase, ObjectType, TypedObject};
use crate::sched::{Thread, WaitResult};
use crate::sync::{SpinMutex, WaitQueue};

const PENDING: u8 = 0;
const ACCEPTED: u8 = 1;
const REFUSED: u8 = 2;

/// A connect waiting for accept
struct PendingConnection {
    server: Arc<MessageEndpoint>,
    state: AtomicU8,
}

struct InterfaceInner {
    active: bool,
    pending: VecDeque<Arc<PendingConnection>>,
    /// Accepted server-side endpoints
    connections: Vec<Arc<MessageEndpoint>>,
}

/// Message interface
pub struct MessageInterface {
    base: KernelObjectBase,
    name: String,
    max_message_size: u16,
    queue_depth: usize,
    inner: SpinMutex<InterfaceInner>,
    /// Clients blocked in `connect`
    connectors: WaitQueue,
    service: Weak<Service>,
}

impl MessageInterface {
    pub(crate) fn new(name: &str, max_message_size: u16, queue_depth: usize, service: Weak<Service>) -> Arc<Self> {
        Arc::new(Self {
            base: KernelObjectBase::new(ObjectType::MessageInterface),
            name: String::from(name),
            max_message_size,
            queue_depth,
            inner: SpinMutex::new(InterfaceInner {
                active: true,
                pending: VecDeque::new(),
                connections: Vec::new(),
            }),
            connectors: WaitQueue::new(),
            service,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_message_size(&self) -> u16 {
        self.max_message_size
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Connects waiting for accept
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Accepted connections still open on the server side
    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Connect and block until the owner accepts
    ///
    /// Returns the client endpoint. Fails with `NotConnected` if the
    /// interface goes away first, or `Interrupted` if the caller is.
    pub fn connect(self: &Arc<Self>, current: &Arc<Thread>) -> KResult<Arc<MessageEndpoint>> {
        let (client, server) = MessageEndpoint::create_pair(self.max_message_size, self.queue_depth);
        server.set_interface(self);
        let request = Arc::new(PendingConnection {
            server,
            state: AtomicU8::new(PENDING),
        });
        {
            let mut inner = self.inner.lock();
            if !inner.active {
                return Err(Status::NotConnected);
            }
            inner.pending.push_back(request.clone());
        }
        self.base.signal_watchers();
        log::debug!("interface '{}': connection pending", self.name);

        let result = self
            .connectors
            .wait_until(current, None, || request.state.load(Ordering::Acquire) != PENDING);

        if result != WaitResult::Woken {
            self.inner
                .lock()
                .pending
                .retain(|p| !Arc::ptr_eq(p, &request));
        }
        // An accept may have raced with the interruption
        match request.state.load(Ordering::Acquire) {
            ACCEPTED => Ok(client),
            REFUSED => Err(Status::NotConnected),
            _ => Err(Status::Interrupted),
        }
    }

    /// Accept the oldest pending connection
    ///
    /// Non-blocking: `Ok(None)` when nothing is pending.
    pub fn accept(self: &Arc<Self>) -> KResult<Option<Arc<MessageEndpoint>>> {
        let request = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return Err(Status::NotConnected);
            }
            let Some(request) = inner.pending.pop_front() else {
                return Ok(None);
            };
            inner.connections.push(request.server.clone());
            request.state.store(ACCEPTED, Ordering::Release);
            request
        };
        self.connectors.wake_all();
        log::debug!("interface '{}': connection accepted", self.name);
        Ok(Some(request.server.clone()))
    }

    pub(crate) fn remove_connection(&self, endpoint: &MessageEndpoint) {
        self.inner
            .lock()
            .connections
            .retain(|c| !core::ptr::eq(Arc::as_ptr(c), endpoint));
    }

    /// Stop accepting connections and refuse everyone waiting
    pub(crate) fn deactivate(&self) {
        let (pending, connections) = {
            let mut inner = self.inner.lock();
            inner.active = false;
            (
                core::mem::take(&mut inner.pending),
                core::mem::take(&mut inner.connections),
            )
        };
        for request in &pending {
            request.state.store(REFUSED, Ordering::Release);
        }
        self.connectors.wake_all();
        drop(connections);
        drop(pending);
    }
}

impl KernelObject for MessageInterface {
    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn is_signaled(&self) -> bool {
        !self.inner.lock().pending.is_empty()
    }

    fn destroy(&self) {
        self.deactivate();
        if let Some(service) = self.service.upgrade() {
            service.remove_interface(&self.name);
        }
        log::debug!("interface '{}' destroyed", self.name);
    }
}

impl TypedObject for MessageInterface {
    const TYPE: ObjectType = ObjectType::MessageInterface;
}

// ============================================================================
// Tests
// ============================================================================
