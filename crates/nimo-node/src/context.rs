//! A running node: command port, registry session and channels.
//!
//! # Startup
//!
//! 1. Wait for the registry (bounded, cancellable)
//! 2. Bind the node's command port
//! 3. Register with `addNode`, then any launcher applications
//! 4. Serve commands until cancelled or `stopNode`
//!
//! Channels are added afterwards and registered one by one.
//!
//! # Shutdown
//!
//! [`NodeContext::shutdown`] stops every channel, then calls `removeNode`.
//! A registry that has gone away is logged and otherwise ignored.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimo_core::config::DEFAULT_DISCOVERY_TIMEOUT_SECS;
use nimo_core::{Connection, LaunchDetails, ServiceType, TransportModes, TransportType};
use nimo_protocol::CommandServer;

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::client::RegistryClient;
use crate::discovery::{wait_for_registry, RegistryLocator};
use crate::error::NodeError;
use crate::handlers::node_handlers;
use crate::state::{LauncherRole, NodeState};

/// What a node needs to know before it starts.
#[derive(Clone)]
pub struct NodeOptions {
    pub name: String,
    pub service_type: ServiceType,
    /// Address the command port and channels bind to and advertise.
    pub address: Ipv4Addr,
    pub launch: LaunchDetails,
    pub discovery_timeout: Duration,
    pub launcher: Option<LauncherRole>,
}

impl NodeOptions {
    pub fn new(name: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            service_type,
            address: Ipv4Addr::LOCALHOST,
            launch: LaunchDetails::default(),
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            launcher: None,
        }
    }
}

pub struct NodeContext {
    name: String,
    state: Arc<NodeState>,
    registry: RegistryClient,
    command: Connection,
    cancel: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl NodeContext {
    /// Finds the registry, opens the command port and registers the node.
    ///
    /// `cancel` ends the node; `stopNode` fires it too.
    ///
    /// # Errors
    ///
    /// - `NodeError::Discovery` when no registry answers in time
    /// - `NodeError::Client` when registration is refused (e.g. name taken);
    ///   a node whose applications are refused is deregistered again
    pub async fn start(
        options: NodeOptions,
        locator: &dyn RegistryLocator,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        let NodeOptions {
            name,
            service_type,
            address,
            launch,
            discovery_timeout,
            launcher,
        } = options;

        let registry_at = wait_for_registry(locator, discovery_timeout, &cancel).await?;
        let registry = RegistryClient::connect(SocketAddr::V4(registry_at.socket_addr())).await?;

        let applications = launcher
            .as_ref()
            .map(|role| role.catalogue.records(&name))
            .unwrap_or_default();
        let is_launcher = launcher.is_some();
        let state = Arc::new(NodeState::new(name.clone(), address, cancel.clone(), launcher));

        let server = CommandServer::bind(
            name.clone(),
            SocketAddr::V4(SocketAddrV4::new(address, 0)),
            node_handlers(is_launcher),
            Arc::clone(&state),
        )
        .await?;
        let command = match server.local_addr() {
            SocketAddr::V4(addr) => Connection::new(*addr.ip(), addr.port(), TransportType::Tcp),
            other => return Err(NodeError::NotIpv4(other)),
        };

        registry
            .add_node(&name, &launch, service_type, command)
            .await?;
        for application in &applications {
            if let Err(e) = registry.add_application(application).await {
                if let Err(cleanup) = registry.remove_node(&name).await {
                    warn!(node = %name, error = %cleanup, "Failed to deregister node");
                }
                return Err(e.into());
            }
        }
        let server = server.spawn(cancel.child_token());

        info!(
            node = %name,
            service = %service_type,
            command = %command,
            applications = applications.len(),
            "Node registered"
        );

        Ok(Self {
            name,
            state,
            registry,
            command,
            cancel,
            server: Some(server),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_connection(&self) -> Connection {
        self.command
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves when the node is asked to stop.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }

    /// Adds an input channel locally and in the registry.
    pub async fn add_input_channel(
        &self,
        path: &str,
        data_type: &str,
        modes: TransportModes,
    ) -> Result<ChannelReceiver, NodeError> {
        let (info, receiver) = self.state.add_input(path, data_type, modes).await?;
        if let Err(e) = self
            .registry
            .add_channel(&info.node, &info.path, false, &info.data_type, info.modes)
            .await
        {
            let _ = self.state.remove_channel(path).await;
            return Err(e.into());
        }
        debug!(node = %self.name, channel = %path, "Input channel registered");
        Ok(receiver)
    }

    /// Adds an output channel locally and in the registry.
    pub async fn add_output_channel(
        &self,
        path: &str,
        data_type: &str,
        modes: TransportModes,
    ) -> Result<ChannelSender, NodeError> {
        let (info, sender) = self.state.add_output(path, data_type, modes).await?;
        if let Err(e) = self
            .registry
            .add_channel(&info.node, &info.path, true, &info.data_type, info.modes)
            .await
        {
            let _ = self.state.remove_channel(path).await;
            return Err(e.into());
        }
        debug!(node = %self.name, channel = %path, "Output channel registered");
        Ok(sender)
    }

    /// Stops channels, deregisters, and closes the command port.
    pub async fn shutdown(mut self) {
        info!(node = %self.name, "Node shutting down");
        self.cancel.cancel();
        self.state.stop_all().await;

        if let Err(e) = self.registry.remove_node(&self.name).await {
            warn!(node = %self.name, error = %e, "Failed to deregister node");
        }

        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                warn!(node = %self.name, error = %e, "Command server task failed");
            }
        }
        info!(node = %self.name, "Node stopped");
    }
}

impl Drop for NodeContext {
    fn drop(&mut self) {
        // Without `shutdown` the registry keeps the node until someone removes it.
        self.cancel.cancel();
    }
}
