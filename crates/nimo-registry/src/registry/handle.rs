//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to registry events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Mutators map channel errors to `RegistryError::ChannelClosed`
//! - Queries degrade to "absent"/empty when the actor is gone

use std::net::Ipv4Addr;

use tokio::sync::{broadcast, mpsc, oneshot};

use nimo_core::{
    ApplicationInfo, ChannelInfo, ConnectionInfo, LaunchDetails, MachineInfo, NodeInfo,
};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::store::{
    ApplicationFilter, ChannelFilter, ChannelSpec, ConnectionFilter, NodeFilter, NodeRegistration,
    RegistryCounts,
};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// ```ignore
/// let handle = spawn_registry();
/// handle.add_node(registration).await?;
/// let nodes = handle.get_nodes(NodeFilter::All).await;
/// let mut rx = handle.subscribe();
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,

    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(build(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Like [`request`](Self::request) for commands that reply with a `Result`.
    async fn mutate<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RegistryError>>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        self.request(build)
            .await
            .ok_or(RegistryError::ChannelClosed)?
    }

    // ------------------------------------------------------------------------
    // Machines
    // ------------------------------------------------------------------------

    pub async fn add_machine(
        &self,
        name: impl Into<String>,
        address: Ipv4Addr,
    ) -> Result<MachineInfo, RegistryError> {
        let name = name.into();
        self.mutate(|respond_to| RegistryCommand::AddMachine {
            name,
            address,
            respond_to,
        })
        .await
    }

    pub async fn get_machine(&self, name: impl Into<String>) -> Option<MachineInfo> {
        let name = name.into();
        self.request(|respond_to| RegistryCommand::GetMachine { name, respond_to })
            .await
            .flatten()
    }

    pub async fn get_machines(&self) -> Vec<MachineInfo> {
        self.request(|respond_to| RegistryCommand::GetMachines { respond_to })
            .await
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// - `RegistryError::NodeAlreadyExists` if the name is taken
    /// - `RegistryError::RegistryFull` at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn add_node(
        &self,
        registration: NodeRegistration,
    ) -> Result<NodeInfo, RegistryError> {
        self.mutate(|respond_to| RegistryCommand::AddNode {
            registration: Box::new(registration),
            respond_to,
        })
        .await
    }

    pub async fn remove_node(&self, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = name.into();
        self.mutate(|respond_to| RegistryCommand::RemoveNode { name, respond_to })
            .await
    }

    pub async fn get_node(&self, name: impl Into<String>) -> Option<NodeInfo> {
        let name = name.into();
        self.request(|respond_to| RegistryCommand::GetNode { name, respond_to })
            .await
            .flatten()
    }

    pub async fn get_nodes(&self, filter: NodeFilter) -> Vec<NodeInfo> {
        self.request(|respond_to| RegistryCommand::GetNodes { filter, respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn get_launch_details(&self, name: impl Into<String>) -> Option<LaunchDetails> {
        let name = name.into();
        self.request(|respond_to| RegistryCommand::GetLaunchDetails { name, respond_to })
            .await
            .flatten()
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    pub async fn add_channel(&self, spec: ChannelSpec) -> Result<ChannelInfo, RegistryError> {
        self.mutate(|respond_to| RegistryCommand::AddChannel { spec, respond_to })
            .await
    }

    pub async fn remove_channel(
        &self,
        node: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let (node, path) = (node.into(), path.into());
        self.mutate(|respond_to| RegistryCommand::RemoveChannel {
            node,
            path,
            respond_to,
        })
        .await
    }

    /// Returns how many channels were removed.
    pub async fn remove_channels_for_node(
        &self,
        node: impl Into<String>,
    ) -> Result<usize, RegistryError> {
        let node = node.into();
        self.mutate(|respond_to| RegistryCommand::RemoveChannelsForNode { node, respond_to })
            .await
    }

    pub async fn get_channel(
        &self,
        node: impl Into<String>,
        path: impl Into<String>,
    ) -> Option<ChannelInfo> {
        let (node, path) = (node.into(), path.into());
        self.request(|respond_to| RegistryCommand::GetChannel {
            node,
            path,
            respond_to,
        })
        .await
        .flatten()
    }

    pub async fn get_channels(&self, filter: ChannelFilter) -> Vec<ChannelInfo> {
        self.request(|respond_to| RegistryCommand::GetChannels { filter, respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn set_channel_in_use(
        &self,
        node: impl Into<String>,
        path: impl Into<String>,
        in_use: bool,
    ) -> Result<(), RegistryError> {
        let (node, path) = (node.into(), path.into());
        self.mutate(|respond_to| RegistryCommand::SetChannelInUse {
            node,
            path,
            in_use,
            respond_to,
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    pub async fn add_connection(&self, connection: ConnectionInfo) -> Result<(), RegistryError> {
        self.mutate(|respond_to| RegistryCommand::AddConnection {
            connection: Box::new(connection),
            respond_to,
        })
        .await
    }

    pub async fn remove_connection(
        &self,
        node: impl Into<String>,
        path: impl Into<String>,
        from_end: bool,
    ) -> Result<ConnectionInfo, RegistryError> {
        let (node, path) = (node.into(), path.into());
        self.mutate(|respond_to| RegistryCommand::RemoveConnection {
            node,
            path,
            from_end,
            respond_to,
        })
        .await
    }

    pub async fn get_connection(
        &self,
        node: impl Into<String>,
        path: impl Into<String>,
        from_end: bool,
    ) -> Option<ConnectionInfo> {
        let (node, path) = (node.into(), path.into());
        self.request(|respond_to| RegistryCommand::GetConnection {
            node,
            path,
            from_end,
            respond_to,
        })
        .await
        .flatten()
    }

    pub async fn get_connections(&self, filter: ConnectionFilter) -> Vec<ConnectionInfo> {
        self.request(|respond_to| RegistryCommand::GetConnections { filter, respond_to })
            .await
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------------

    pub async fn add_application(&self, application: ApplicationInfo) -> Result<(), RegistryError> {
        self.mutate(|respond_to| RegistryCommand::AddApplication {
            application,
            respond_to,
        })
        .await
    }

    pub async fn clear_applications(
        &self,
        launcher: impl Into<String>,
    ) -> Result<usize, RegistryError> {
        let launcher = launcher.into();
        self.mutate(|respond_to| RegistryCommand::ClearApplications {
            launcher,
            respond_to,
        })
        .await
    }

    pub async fn get_applications(&self, filter: ApplicationFilter) -> Vec<ApplicationInfo> {
        self.request(|respond_to| RegistryCommand::GetApplications { filter, respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn get_counts(&self) -> RegistryCounts {
        self.request(|respond_to| RegistryCommand::GetCounts { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Subscribe to registry events.
    ///
    /// Slow receivers may lag and miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_actor_degrades_gracefully() {
        let (tx, rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(1);
        let handle = RegistryHandle::new(tx, event_tx);
        drop(rx);

        assert_eq!(
            handle.remove_node("a").await,
            Err(RegistryError::ChannelClosed)
        );
        assert!(handle.get_node("a").await.is_none());
        assert!(handle.get_nodes(NodeFilter::All).await.is_empty());
        assert_eq!(handle.get_counts().await, RegistryCounts::default());
    }
}
