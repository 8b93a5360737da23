// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Inter-Process Messaging
//!
//! ```text
//! Service ("lemon.wm")
//!   └── MessageInterface ("wm", max 64 bytes)
//!         ├── pending connects  ──accept──> MessageEndpoint (server)
//!         └── connections                    ⇅ peer
//!                                           MessageEndpoint (client)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let svc = registry.create_service("svc")?;
//! let iface = svc.create_interface("if", 64, depth)?;
//! // client
//! let ep = registry.resolve("svc/if")?.connect(&current)?;
//! ep.queue(1, b"hello")?;
//! // owner
//! let server = iface.accept()?.expect("pending");
//! let msg = server.dequeue()?;
//! ```

pub mod endpoint;
pub mod interface;
pub mod service;

pub use endpoint::{Message, MessageEndpoint};
pub use interface::MessageInterface;
pub use service::{Service, ServiceRegistry};
