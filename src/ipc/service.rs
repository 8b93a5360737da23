// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Services
//!
//! A service is a named container of interfaces published by one process.
//! Clients find interfaces through the [`ServiceRegistry`] with paths of the
//! form `service/interface`.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::RwLock;

use crate::config::MAX_PATH_LENGTH;
use crate::error::{KResult, Status};
use crate::ipc::interface::MessageInterface;
use crate::object::{KernelObject, KernelObjectBase, ObjectType, TypedObject};
use crate::sync::SpinMutex;

/// ============================================================================
/// Service
/// ============================================================================

/// Service
pub struct Service {
    base: KernelObjectBase,
    name: String,
    interfaces: SpinMutex<Vec<Arc<MessageInterface>>>,
    registry: Weak<ServiceRegistry>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an interface; names are unique within the service
    pub fn create_interface(
        self: &Arc<Self>,
        name: &str,
        max_message_size: u16,
        queue_depth: usize,
    ) -> KResult<Arc<MessageInterface>> {
        validate_name(name)?;
        let mut interfaces = self.interfaces.lock();
        if interfaces.iter().any(|i| i.name() == name) {
            log::warn!("service '{}': interface '{}' already exists", self.name, name);
            return Err(Status::Exists);
        }
        let interface = MessageInterface::new(name, max_message_size, queue_depth, Arc::downgrade(self));
        interfaces.push(interface.clone());
        log::debug!("service '{}': interface '{}' created", self.name, name);
        Ok(interface)
    }

    pub fn find_interface(&self, name: &str) -> Option<Arc<MessageInterface>> {
        self.interfaces.lock().iter().find(|i| i.name() == name).cloned()
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.lock().len()
    }

    pub(crate) fn remove_interface(&self, name: &str) {
        self.interfaces.lock().retain(|i| i.name() != name);
    }
}

impl KernelObject for Service {
    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn destroy(&self) {
        self.interfaces.lock().clear();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.name);
        }
        log::info!("service '{}' destroyed", self.name);
    }
}

impl TypedObject for Service {
    const TYPE: ObjectType = ObjectType::Service;
}

/// ============================================================================
/// Service Registry
/// ============================================================================

/// System-wide service namespace
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(BTreeMap::new()),
        })
    }

    /// Register a new service
    pub fn create_service(self: &Arc<Self>, name: &str) -> KResult<Arc<Service>> {
        validate_name(name)?;
        let mut services = self.services.write();
        if services.contains_key(name) {
            log::warn!("service '{}' already exists", name);
            return Err(Status::Exists);
        }
        let service = Arc::new(Service {
            base: KernelObjectBase::new(ObjectType::Service),
            name: String::from(name),
            interfaces: SpinMutex::new(Vec::new()),
            registry: Arc::downgrade(self),
        });
        services.insert(String::from(name), service.clone());
        log::info!("service '{}' registered", name);
        Ok(service)
    }

    pub fn find(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().get(name).cloned()
    }

    /// Resolve `service/interface`
    pub fn resolve(&self, path: &str) -> KResult<Arc<MessageInterface>> {
        let (service, interface) = path.split_once('/').ok_or(Status::InvalidArgument)?;
        self.find(service)
            .and_then(|s| s.find_interface(interface))
            .ok_or(Status::NoSuchEntry)
    }

    pub(crate) fn remove(&self, name: &str) {
        self.services.write().remove(name);
    }

    pub fn count(&self) -> usize {
        self.services.read().len()
    }
}

/// Names are non-empty, bounded and contain no '/'
fn validate_name(name: &str) -> KResult<()> {
    if name.is_empty() || name.len() > MAX_PATH_LENGTH || name.contains('/') {
        return Err(Status::InvalidArgument);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
