//! nImO Registry - the authoritative store for machines, nodes, channels,
//! connections and applications.
//!
//! - `registry` - the store, its actor and the cloneable handle
//! - `handlers` - one handler per registry command
//! - `status` - relays registry events to the status multicast group
//! - `service` - binds everything to a command port
//!
//! # Panic-Free Policy
//!
//! Production code never panics: lookups use `.get()`, fallible operations
//! return `Result`, and every registry failure reaches the client as a
//! `(false, reason)` response.

pub mod handlers;
pub mod registry;
pub mod service;
pub mod status;

pub use handlers::registry_handlers;
pub use registry::{
    spawn_registry, ApplicationFilter, ChannelFilter, ChannelSpec, ConnectionFilter, NodeFilter,
    NodeRegistration, RegistryCounts, RegistryError, RegistryEvent, RegistryHandle,
};
pub use service::{RegistryService, ServiceError, SERVICE_NAME};
pub use status::{notification_for, StatusBroadcaster};
