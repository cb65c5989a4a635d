//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry after successful mutations
//!
//! The `Display` text of a `RegistryError` is the reason string returned to
//! clients in a failed simple response.

use std::net::Ipv4Addr;

use nimo_core::{
    ApplicationInfo, ChannelInfo, ConnectionInfo, LaunchDetails, MachineInfo, NodeInfo,
    TransportType,
};
use thiserror::Error;
use tokio::sync::oneshot;

use super::store::{
    ApplicationFilter, ChannelFilter, ChannelSpec, ConnectionFilter, NodeFilter, NodeRegistration,
    RegistryCounts,
};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot sender for its reply. The actor processes
/// commands one at a time, so every operation is atomic with respect to
/// every other.
#[derive(Debug)]
pub enum RegistryCommand {
    AddMachine {
        name: String,
        address: Ipv4Addr,
        respond_to: oneshot::Sender<Result<MachineInfo, RegistryError>>,
    },

    GetMachine {
        name: String,
        respond_to: oneshot::Sender<Option<MachineInfo>>,
    },

    GetMachines {
        respond_to: oneshot::Sender<Vec<MachineInfo>>,
    },

    /// Registers a node, creating its machine on first sight.
    ///
    /// Boxed to reduce enum size variance.
    AddNode {
        registration: Box<NodeRegistration>,
        respond_to: oneshot::Sender<Result<NodeInfo, RegistryError>>,
    },

    /// Removes a node together with its channels, connections and applications.
    RemoveNode {
        name: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    GetNode {
        name: String,
        respond_to: oneshot::Sender<Option<NodeInfo>>,
    },

    GetNodes {
        filter: NodeFilter,
        respond_to: oneshot::Sender<Vec<NodeInfo>>,
    },

    GetLaunchDetails {
        name: String,
        respond_to: oneshot::Sender<Option<LaunchDetails>>,
    },

    AddChannel {
        spec: ChannelSpec,
        respond_to: oneshot::Sender<Result<ChannelInfo, RegistryError>>,
    },

    RemoveChannel {
        node: String,
        path: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Returns the number of channels removed.
    RemoveChannelsForNode {
        node: String,
        respond_to: oneshot::Sender<Result<usize, RegistryError>>,
    },

    GetChannel {
        node: String,
        path: String,
        respond_to: oneshot::Sender<Option<ChannelInfo>>,
    },

    GetChannels {
        filter: ChannelFilter,
        respond_to: oneshot::Sender<Vec<ChannelInfo>>,
    },

    SetChannelInUse {
        node: String,
        path: String,
        in_use: bool,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    AddConnection {
        connection: Box<ConnectionInfo>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Removes the connection touching `(node, path)`; `from_end` says
    /// whether that channel is the output side.
    RemoveConnection {
        node: String,
        path: String,
        from_end: bool,
        respond_to: oneshot::Sender<Result<ConnectionInfo, RegistryError>>,
    },

    GetConnection {
        node: String,
        path: String,
        from_end: bool,
        respond_to: oneshot::Sender<Option<ConnectionInfo>>,
    },

    GetConnections {
        filter: ConnectionFilter,
        respond_to: oneshot::Sender<Vec<ConnectionInfo>>,
    },

    AddApplication {
        application: ApplicationInfo,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Returns the number of applications removed.
    ClearApplications {
        launcher: String,
        respond_to: oneshot::Sender<Result<usize, RegistryError>>,
    },

    GetApplications {
        filter: ApplicationFilter,
        respond_to: oneshot::Sender<Vec<ApplicationInfo>>,
    },

    GetCounts {
        respond_to: oneshot::Sender<RegistryCounts>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
///
/// On any of these the registry state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry is full (max: {max} nodes)")]
    RegistryFull { max: usize },

    #[error("Machine '{0}' already registered")]
    MachineAlreadyExists(String),

    #[error("A machine with address {0} is already registered")]
    MachineAddressInUse(Ipv4Addr),

    #[error("Node '{0}' already registered")]
    NodeAlreadyExists(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Channel '{node}' '{path}' already registered")]
    ChannelAlreadyExists { node: String, path: String },

    #[error("Channel '{node}' '{path}' not found")]
    ChannelNotFound { node: String, path: String },

    #[error("Channel path must not be empty")]
    EmptyChannelPath,

    #[error("Channel must allow at least one transport")]
    NoTransportModes,

    #[error("Channel '{node}' '{path}' is not an output")]
    NotAnOutput { node: String, path: String },

    #[error("Channel '{node}' '{path}' is not an input")]
    NotAnInput { node: String, path: String },

    #[error("Channel '{node}' '{path}' is already in use")]
    ChannelInUse { node: String, path: String },

    #[error("Channel '{node}' '{path}' is part of a connection")]
    ChannelConnected { node: String, path: String },

    #[error("Data type '{requested}' does not match channel type '{channel}'")]
    DataTypeMismatch { requested: String, channel: String },

    #[error("Transport {mode} is not allowed by both channels")]
    ModeNotAllowed { mode: TransportType },

    #[error("No connection found for '{node}' '{path}'")]
    ConnectionNotFound { node: String, path: String },

    #[error("Application '{app}' already registered for launcher '{launcher}'")]
    ApplicationAlreadyExists { launcher: String, app: String },

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry after a successful mutation.
///
/// Cascaded removals publish one event per removed record, in removal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    MachineAdded(MachineInfo),
    NodeAdded(NodeInfo),
    NodeRemoved { name: String },
    ChannelAdded(ChannelInfo),
    ChannelRemoved { node: String, path: String },
    ConnectionAdded(ConnectionInfo),
    ConnectionRemoved(ConnectionInfo),
    ApplicationAdded(ApplicationInfo),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_reasons() {
        let err = RegistryError::NodeAlreadyExists("A".to_string());
        assert_eq!(err.to_string(), "Node 'A' already registered");

        let err = RegistryError::ChannelNotFound {
            node: "B".to_string(),
            path: "/in1".to_string(),
        };
        assert_eq!(err.to_string(), "Channel 'B' '/in1' not found");

        let err = RegistryError::ModeNotAllowed {
            mode: TransportType::Udp,
        };
        assert_eq!(err.to_string(), "Transport udp is not allowed by both channels");

        let err = RegistryError::RegistryFull { max: 10 };
        assert!(err.to_string().contains("10"));
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<(), RegistryError>>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
