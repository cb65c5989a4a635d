//! The registry's data and its invariant-preserving operations.
//!
//! `RegistryStore` is plain synchronous state owned by the registry actor.
//! Every mutator validates against current state first and only then
//! changes anything, so an `Err` always leaves the store untouched.
//!
//! Invariants kept here:
//! - node names are unique, channel `(node, path)` pairs are unique
//! - every channel belongs to a registered node
//! - every connection references two existing channels, both marked in use
//! - a channel takes part in at most one connection
//! - removing a node removes its channels, its connections and its
//!   application list, and clears `in_use` on surviving peer channels

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use tracing::debug;

use nimo_core::{
    ApplicationInfo, ChannelInfo, Connection, ConnectionInfo, LaunchDetails, MachineInfo, NodeInfo,
    ServiceType, TransportModes,
};

use super::commands::RegistryError;

/// Maximum number of nodes the registry holds.
pub const MAX_NODES: usize = 4096;

type ChannelKey = (String, String);

fn key(node: &str, path: &str) -> ChannelKey {
    (node.to_string(), path.to_string())
}

// ============================================================================
// Operation inputs and outputs
// ============================================================================

/// Everything `addNode` supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistration {
    pub name: String,
    pub launch: LaunchDetails,
    pub service_type: ServiceType,
    pub connection: Connection,
}

/// Everything `addChannel` supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub node: String,
    pub path: String,
    pub is_output: bool,
    pub data_type: String,
    pub modes: TransportModes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFilter {
    All,
    OnMachine(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFilter {
    All,
    OnNode(String),
    OnMachine(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFilter {
    All,
    OnNode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationFilter {
    All,
    OnLauncher(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub machines: usize,
    pub nodes: usize,
    pub channels: usize,
    pub connections: usize,
    pub applications: usize,
}

/// Result of a successful `add_node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddition {
    pub node: NodeInfo,
    /// Set when the node's address had no machine yet.
    pub machine_created: Option<MachineInfo>,
}

/// What `remove_node` took out, in removal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRemoval {
    pub node: NodeInfo,
    pub connections: Vec<ConnectionInfo>,
    pub channels: Vec<ChannelInfo>,
    pub applications: usize,
}

/// What `remove_channel` took out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRemoval {
    pub channel: ChannelInfo,
    pub connection: Option<ConnectionInfo>,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    info: NodeInfo,
    launch: LaunchDetails,
}

// ============================================================================
// Registry Store
// ============================================================================

#[derive(Debug, Default)]
pub struct RegistryStore {
    machines: BTreeMap<String, MachineInfo>,
    nodes: BTreeMap<String, NodeEntry>,
    channels: BTreeMap<ChannelKey, ChannelInfo>,
    /// Keyed by the output endpoint.
    connections: BTreeMap<ChannelKey, ConnectionInfo>,
    /// Keyed by `(launcher, app)`.
    applications: BTreeMap<ChannelKey, ApplicationInfo>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> RegistryCounts {
        RegistryCounts {
            machines: self.machines.len(),
            nodes: self.nodes.len(),
            channels: self.channels.len(),
            connections: self.connections.len(),
            applications: self.applications.len(),
        }
    }

    // ------------------------------------------------------------------------
    // Machines
    // ------------------------------------------------------------------------

    pub fn add_machine(
        &mut self,
        name: &str,
        address: Ipv4Addr,
    ) -> Result<MachineInfo, RegistryError> {
        if self.machines.contains_key(name) {
            return Err(RegistryError::MachineAlreadyExists(name.to_string()));
        }
        if self.machine_for_address(address).is_some() {
            return Err(RegistryError::MachineAddressInUse(address));
        }
        let machine = MachineInfo {
            name: name.to_string(),
            address,
        };
        self.machines.insert(machine.name.clone(), machine.clone());
        Ok(machine)
    }

    pub fn machine(&self, name: &str) -> Option<MachineInfo> {
        self.machines.get(name).cloned()
    }

    pub fn machines(&self) -> Vec<MachineInfo> {
        self.machines.values().cloned().collect()
    }

    fn machine_for_address(&self, address: Ipv4Addr) -> Option<&MachineInfo> {
        self.machines.values().find(|m| m.address == address)
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    pub fn add_node(
        &mut self,
        registration: NodeRegistration,
    ) -> Result<NodeAddition, RegistryError> {
        if self.nodes.contains_key(&registration.name) {
            return Err(RegistryError::NodeAlreadyExists(registration.name));
        }
        if self.nodes.len() >= MAX_NODES {
            return Err(RegistryError::RegistryFull { max: MAX_NODES });
        }

        let address = registration.connection.address;
        let (machine_name, machine_created) = match self.machine_for_address(address) {
            Some(machine) => (machine.name.clone(), None),
            None => {
                let machine = MachineInfo {
                    name: address.to_string(),
                    address,
                };
                if self.machines.contains_key(&machine.name) {
                    // A machine was explicitly named after a different address's dotted form.
                    return Err(RegistryError::MachineAlreadyExists(machine.name));
                }
                (machine.name.clone(), Some(machine))
            }
        };

        if let Some(machine) = &machine_created {
            debug!(machine = %machine.name, "Creating machine for new node");
            self.machines.insert(machine.name.clone(), machine.clone());
        }

        let info = NodeInfo {
            name: registration.name,
            machine: machine_name,
            service_type: registration.service_type,
            connection: registration.connection,
        };
        self.nodes.insert(
            info.name.clone(),
            NodeEntry {
                info: info.clone(),
                launch: registration.launch,
            },
        );
        Ok(NodeAddition {
            node: info,
            machine_created,
        })
    }

    pub fn remove_node(&mut self, name: &str) -> Result<NodeRemoval, RegistryError> {
        let Some(entry) = self.nodes.remove(name) else {
            return Err(RegistryError::NodeNotFound(name.to_string()));
        };

        let doomed: Vec<ChannelKey> = self
            .connections
            .iter()
            .filter(|(_, c)| c.touches_node(name))
            .map(|(k, _)| k.clone())
            .collect();
        let mut connections = Vec::with_capacity(doomed.len());
        for k in doomed {
            if let Some(connection) = self.connections.remove(&k) {
                self.release_endpoints(&connection);
                connections.push(connection);
            }
        }

        let channel_keys: Vec<ChannelKey> = self
            .channels
            .keys()
            .filter(|(node, _)| node == name)
            .cloned()
            .collect();
        let channels = channel_keys
            .iter()
            .filter_map(|k| self.channels.remove(k))
            .collect();

        let before = self.applications.len();
        self.applications.retain(|(launcher, _), _| launcher != name);
        let applications = before - self.applications.len();

        Ok(NodeRemoval {
            node: entry.info,
            connections,
            channels,
            applications,
        })
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.get(name).map(|e| e.info.clone())
    }

    pub fn nodes(&self, filter: &NodeFilter) -> Vec<NodeInfo> {
        self.nodes
            .values()
            .filter(|e| match filter {
                NodeFilter::All => true,
                NodeFilter::OnMachine(machine) => &e.info.machine == machine,
            })
            .map(|e| e.info.clone())
            .collect()
    }

    pub fn launch_details(&self, name: &str) -> Option<LaunchDetails> {
        self.nodes.get(name).map(|e| e.launch.clone())
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    pub fn add_channel(&mut self, spec: ChannelSpec) -> Result<ChannelInfo, RegistryError> {
        if spec.path.is_empty() {
            return Err(RegistryError::EmptyChannelPath);
        }
        if !self.nodes.contains_key(&spec.node) {
            return Err(RegistryError::NodeNotFound(spec.node));
        }
        let k = key(&spec.node, &spec.path);
        if self.channels.contains_key(&k) {
            return Err(RegistryError::ChannelAlreadyExists {
                node: spec.node,
                path: spec.path,
            });
        }
        if spec.modes.is_empty() {
            return Err(RegistryError::NoTransportModes);
        }

        let channel = ChannelInfo {
            node: spec.node,
            path: spec.path,
            is_output: spec.is_output,
            data_type: spec.data_type,
            modes: spec.modes,
            in_use: false,
        };
        self.channels.insert(k, channel.clone());
        Ok(channel)
    }

    pub fn remove_channel(
        &mut self,
        node: &str,
        path: &str,
    ) -> Result<ChannelRemoval, RegistryError> {
        let Some(channel) = self.channels.remove(&key(node, path)) else {
            return Err(RegistryError::ChannelNotFound {
                node: node.to_string(),
                path: path.to_string(),
            });
        };
        let connection = self.take_connection_touching(node, path);
        if let Some(connection) = &connection {
            self.release_endpoints(connection);
        }
        Ok(ChannelRemoval {
            channel,
            connection,
        })
    }

    pub fn remove_channels_for_node(
        &mut self,
        node: &str,
    ) -> Result<Vec<ChannelRemoval>, RegistryError> {
        if !self.nodes.contains_key(node) {
            return Err(RegistryError::NodeNotFound(node.to_string()));
        }
        let paths: Vec<String> = self
            .channels
            .keys()
            .filter(|(n, _)| n == node)
            .map(|(_, p)| p.clone())
            .collect();
        let mut removed = Vec::with_capacity(paths.len());
        for path in paths {
            removed.push(self.remove_channel(node, &path)?);
        }
        Ok(removed)
    }

    pub fn channel(&self, node: &str, path: &str) -> Option<ChannelInfo> {
        self.channels.get(&key(node, path)).cloned()
    }

    pub fn channels(&self, filter: &ChannelFilter) -> Vec<ChannelInfo> {
        self.channels
            .values()
            .filter(|c| match filter {
                ChannelFilter::All => true,
                ChannelFilter::OnNode(node) => &c.node == node,
                ChannelFilter::OnMachine(machine) => self
                    .nodes
                    .get(&c.node)
                    .is_some_and(|e| &e.info.machine == machine),
            })
            .cloned()
            .collect()
    }

    /// Sets the in-use flag. A channel that is part of a connection cannot
    /// be released this way; remove the connection instead.
    pub fn set_channel_in_use(
        &mut self,
        node: &str,
        path: &str,
        in_use: bool,
    ) -> Result<(), RegistryError> {
        if !in_use && self.connection_touching(node, path).is_some() {
            return Err(RegistryError::ChannelConnected {
                node: node.to_string(),
                path: path.to_string(),
            });
        }
        let Some(channel) = self.channels.get_mut(&key(node, path)) else {
            return Err(RegistryError::ChannelNotFound {
                node: node.to_string(),
                path: path.to_string(),
            });
        };
        channel.in_use = in_use;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    pub fn add_connection(&mut self, connection: ConnectionInfo) -> Result<(), RegistryError> {
        let from = self.existing_channel(&connection.from_node, &connection.from_path)?;
        let to = self.existing_channel(&connection.to_node, &connection.to_path)?;

        if !from.is_output {
            return Err(RegistryError::NotAnOutput {
                node: from.node.clone(),
                path: from.path.clone(),
            });
        }
        if to.is_output {
            return Err(RegistryError::NotAnInput {
                node: to.node.clone(),
                path: to.path.clone(),
            });
        }
        for channel in [from, to] {
            if channel.in_use {
                return Err(RegistryError::ChannelInUse {
                    node: channel.node.clone(),
                    path: channel.path.clone(),
                });
            }
        }
        if connection.data_type != from.data_type {
            return Err(RegistryError::DataTypeMismatch {
                requested: connection.data_type.clone(),
                channel: from.data_type.clone(),
            });
        }
        if !to.data_type.is_empty() && connection.data_type != to.data_type {
            return Err(RegistryError::DataTypeMismatch {
                requested: connection.data_type.clone(),
                channel: to.data_type.clone(),
            });
        }
        if !(from.modes.contains(connection.mode) && to.modes.contains(connection.mode)) {
            return Err(RegistryError::ModeNotAllowed {
                mode: connection.mode,
            });
        }

        self.mark_in_use(&connection.from_node, &connection.from_path, true);
        self.mark_in_use(&connection.to_node, &connection.to_path, true);
        self.connections.insert(
            key(&connection.from_node, &connection.from_path),
            connection,
        );
        Ok(())
    }

    pub fn remove_connection(
        &mut self,
        node: &str,
        path: &str,
        from_end: bool,
    ) -> Result<ConnectionInfo, RegistryError> {
        let found = self.connection(node, path, from_end);
        let Some(connection) =
            found.and_then(|c| self.connections.remove(&key(&c.from_node, &c.from_path)))
        else {
            return Err(RegistryError::ConnectionNotFound {
                node: node.to_string(),
                path: path.to_string(),
            });
        };
        self.release_endpoints(&connection);
        Ok(connection)
    }

    pub fn connection(&self, node: &str, path: &str, from_end: bool) -> Option<ConnectionInfo> {
        if from_end {
            self.connections.get(&key(node, path)).cloned()
        } else {
            self.connections
                .values()
                .find(|c| c.to_node == node && c.to_path == path)
                .cloned()
        }
    }

    pub fn connections(&self, filter: &ConnectionFilter) -> Vec<ConnectionInfo> {
        self.connections
            .values()
            .filter(|c| match filter {
                ConnectionFilter::All => true,
                ConnectionFilter::OnNode(node) => c.touches_node(node),
            })
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------------

    pub fn add_application(&mut self, application: ApplicationInfo) -> Result<(), RegistryError> {
        if !self.nodes.contains_key(&application.launcher_node) {
            return Err(RegistryError::NodeNotFound(application.launcher_node));
        }
        let k = key(&application.launcher_node, &application.app_name);
        if self.applications.contains_key(&k) {
            return Err(RegistryError::ApplicationAlreadyExists {
                launcher: application.launcher_node,
                app: application.app_name,
            });
        }
        self.applications.insert(k, application);
        Ok(())
    }

    pub fn clear_applications(&mut self, launcher: &str) -> Result<usize, RegistryError> {
        if !self.nodes.contains_key(launcher) {
            return Err(RegistryError::NodeNotFound(launcher.to_string()));
        }
        let before = self.applications.len();
        self.applications.retain(|(l, _), _| l != launcher);
        Ok(before - self.applications.len())
    }

    pub fn applications(&self, filter: &ApplicationFilter) -> Vec<ApplicationInfo> {
        self.applications
            .values()
            .filter(|a| match filter {
                ApplicationFilter::All => true,
                ApplicationFilter::OnLauncher(launcher) => &a.launcher_node == launcher,
            })
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn existing_channel(&self, node: &str, path: &str) -> Result<&ChannelInfo, RegistryError> {
        self.channels
            .get(&key(node, path))
            .ok_or_else(|| RegistryError::ChannelNotFound {
                node: node.to_string(),
                path: path.to_string(),
            })
    }

    fn connection_touching(&self, node: &str, path: &str) -> Option<&ConnectionInfo> {
        self.connections
            .values()
            .find(|c| c.touches_channel(node, path))
    }

    fn take_connection_touching(&mut self, node: &str, path: &str) -> Option<ConnectionInfo> {
        let k = self
            .connection_touching(node, path)
            .map(|c| key(&c.from_node, &c.from_path))?;
        self.connections.remove(&k)
    }

    fn mark_in_use(&mut self, node: &str, path: &str, in_use: bool) {
        if let Some(channel) = self.channels.get_mut(&key(node, path)) {
            channel.in_use = in_use;
        }
    }

    /// Clears `in_use` on whichever endpoints of `connection` still exist.
    fn release_endpoints(&mut self, connection: &ConnectionInfo) {
        self.mark_in_use(&connection.from_node, &connection.from_path, false);
        self.mark_in_use(&connection.to_node, &connection.to_path, false);
    }
}
