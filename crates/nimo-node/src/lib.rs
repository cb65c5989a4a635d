//! nImO node runtime.
//!
//! - `client` - command client and the typed registry/node clients
//! - `discovery` - locating the registry, with a bounded wait
//! - `channel` - channel state machine over UDP/TCP transports
//! - `handlers` - the node's own command set
//! - `context` - a running node from registration to shutdown
//! - `connect` - wiring and unwiring channels between nodes
//! - `launcher` - starting applications for launcher nodes

pub mod channel;
pub mod client;
pub mod connect;
pub mod context;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod launcher;
pub mod state;

pub use channel::{
    Channel, ChannelDirection, ChannelReceiver, ChannelSender, ChannelState, Delivery,
    PreparedEndpoint,
};
pub use client::{CommandClient, NodeClient, RegistryClient};
pub use connect::{connect_channels, disconnect_channels, ChannelEnd};
pub use context::{NodeContext, NodeOptions};
pub use discovery::{wait_for_registry, RegistryLocator, StaticLocator};
pub use error::{
    ChannelError, ClientError, ConnectError, DiscoveryError, LaunchError, NodeError,
};
pub use handlers::node_handlers;
pub use launcher::{
    AppCatalogue, LaunchOutcome, LaunchRequest, LaunchableApp, ProcessLauncher, TokioLauncher,
};
pub use state::{LauncherRole, NodeState};
