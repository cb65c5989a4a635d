//! The nImO registry using the Actor pattern.
//!
//! The registry is the single source of truth for machines, nodes,
//! channels, connections and applications. It receives commands via a
//! tokio mpsc channel, applies them to a `RegistryStore` one at a time, and
//! broadcasts a `RegistryEvent` for each change.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Command sessions│────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                        │
//!         │   RegistryCommand     │   RegistryEvent        │
//!         │   (mpsc channel)      │   (broadcast)          │
//!         ▼                       ▼                        ▼
//!   RegistryHandle           RegistryStore          status multicast
//! ```

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;
mod store;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;
pub use store::{
    ApplicationFilter, ChannelFilter, ChannelRemoval, ChannelSpec, ConnectionFilter, NodeAddition,
    NodeFilter, NodeRegistration, NodeRemoval, RegistryCounts, RegistryStore, MAX_NODES,
};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawns the registry actor and returns a handle to it.
///
/// The actor stops once every handle has been dropped.
///
/// ```no_run
/// use nimo_registry::registry::{spawn_registry, NodeFilter};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///     let nodes = handle.get_nodes(NodeFilter::All).await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
