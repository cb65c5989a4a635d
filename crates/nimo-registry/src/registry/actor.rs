//! Registry actor - owns the registry store and processes commands.
//!
//! The RegistryActor is the single owner of registry state. It receives
//! commands via an mpsc channel, applies them to its `RegistryStore` one at a
//! time, and publishes a `RegistryEvent` for every record a successful
//! mutation added or removed.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the caller went away)
//! - Event send failures are ignored (no subscribers)

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use nimo_core::{ChannelInfo, ConnectionInfo, NodeInfo};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::store::{
    ChannelRemoval, ChannelSpec, NodeRegistration, RegistryCounts, RegistryStore,
};

/// The registry actor - owns all registry state.
///
/// Commands are processed sequentially inside one task, which makes every
/// operation linearizable without a lock.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,

    store: RegistryStore,

    /// Event publisher for status notifications and other observers
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            receiver,
            store: RegistryStore::new(),
            event_publisher,
        }
    }

    /// Processes commands until every sender is dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        let counts = self.store.counts();
        info!(
            nodes = counts.nodes,
            channels = counts.channels,
            connections = counts.connections,
            "Registry actor stopped"
        );
    }

    pub fn counts(&self) -> RegistryCounts {
        self.store.counts()
    }

    fn publish(&self, event: RegistryEvent) {
        // No receivers is fine.
        let _ = self.event_publisher.send(event);
    }

    /// Dispatches a command to the store and replies.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::AddMachine {
                name,
                address,
                respond_to,
            } => {
                let result = self.store.add_machine(&name, address);
                if let Ok(machine) = &result {
                    debug!(machine = %machine.name, address = %machine.address, "Machine added");
                    self.publish(RegistryEvent::MachineAdded(machine.clone()));
                }
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetMachine { name, respond_to } => {
                let _ = respond_to.send(self.store.machine(&name));
            }
            RegistryCommand::GetMachines { respond_to } => {
                let _ = respond_to.send(self.store.machines());
            }
            RegistryCommand::AddNode {
                registration,
                respond_to,
            } => {
                let result = self.handle_add_node(*registration);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RemoveNode { name, respond_to } => {
                let result = self.handle_remove_node(&name);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetNode { name, respond_to } => {
                let _ = respond_to.send(self.store.node(&name));
            }
            RegistryCommand::GetNodes { filter, respond_to } => {
                let _ = respond_to.send(self.store.nodes(&filter));
            }
            RegistryCommand::GetLaunchDetails { name, respond_to } => {
                let _ = respond_to.send(self.store.launch_details(&name));
            }
            RegistryCommand::AddChannel { spec, respond_to } => {
                let result = self.handle_add_channel(spec);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RemoveChannel {
                node,
                path,
                respond_to,
            } => {
                let result = self
                    .store
                    .remove_channel(&node, &path)
                    .map(|removal| self.publish_channel_removal(removal));
                let _ = respond_to.send(result);
            }
            RegistryCommand::RemoveChannelsForNode { node, respond_to } => {
                let result = self.store.remove_channels_for_node(&node).map(|removals| {
                    let count = removals.len();
                    for removal in removals {
                        self.publish_channel_removal(removal);
                    }
                    count
                });
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetChannel {
                node,
                path,
                respond_to,
            } => {
                let _ = respond_to.send(self.store.channel(&node, &path));
            }
            RegistryCommand::GetChannels { filter, respond_to } => {
                let _ = respond_to.send(self.store.channels(&filter));
            }
            RegistryCommand::SetChannelInUse {
                node,
                path,
                in_use,
                respond_to,
            } => {
                let _ = respond_to.send(self.store.set_channel_in_use(&node, &path, in_use));
            }
            RegistryCommand::AddConnection {
                connection,
                respond_to,
            } => {
                let result = self.handle_add_connection(*connection);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RemoveConnection {
                node,
                path,
                from_end,
                respond_to,
            } => {
                let result = self.store.remove_connection(&node, &path, from_end);
                if let Ok(connection) = &result {
                    self.publish_connection_removed(connection);
                }
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetConnection {
                node,
                path,
                from_end,
                respond_to,
            } => {
                let _ = respond_to.send(self.store.connection(&node, &path, from_end));
            }
            RegistryCommand::GetConnections { filter, respond_to } => {
                let _ = respond_to.send(self.store.connections(&filter));
            }
            RegistryCommand::AddApplication {
                application,
                respond_to,
            } => {
                let result = self.store.add_application(application.clone());
                if result.is_ok() {
                    debug!(
                        launcher = %application.launcher_node,
                        app = %application.app_name,
                        "Application added"
                    );
                    self.publish(RegistryEvent::ApplicationAdded(application));
                }
                let _ = respond_to.send(result);
            }
            RegistryCommand::ClearApplications {
                launcher,
                respond_to,
            } => {
                let _ = respond_to.send(self.store.clear_applications(&launcher));
            }
            RegistryCommand::GetApplications { filter, respond_to } => {
                let _ = respond_to.send(self.store.applications(&filter));
            }
            RegistryCommand::GetCounts { respond_to } => {
                let _ = respond_to.send(self.store.counts());
            }
        }
    }

    // ========================================================================
    // Mutations with events
    // ========================================================================

    fn handle_add_node(
        &mut self,
        registration: NodeRegistration,
    ) -> Result<NodeInfo, RegistryError> {
        let addition = self.store.add_node(registration)?;
        if let Some(machine) = addition.machine_created {
            self.publish(RegistryEvent::MachineAdded(machine));
        }
        info!(
            node = %addition.node.name,
            machine = %addition.node.machine,
            service = %addition.node.service_type,
            "Node added"
        );
        self.publish(RegistryEvent::NodeAdded(addition.node.clone()));
        Ok(addition.node)
    }

    fn handle_remove_node(&mut self, name: &str) -> Result<(), RegistryError> {
        let removal = self.store.remove_node(name)?;
        for connection in &removal.connections {
            self.publish_connection_removed(connection);
        }
        for channel in removal.channels {
            self.publish(RegistryEvent::ChannelRemoved {
                node: channel.node,
                path: channel.path,
            });
        }
        info!(
            node = %removal.node.name,
            connections = removal.connections.len(),
            applications = removal.applications,
            "Node removed"
        );
        self.publish(RegistryEvent::NodeRemoved {
            name: removal.node.name,
        });
        Ok(())
    }

    fn handle_add_channel(&mut self, spec: ChannelSpec) -> Result<ChannelInfo, RegistryError> {
        let channel = self.store.add_channel(spec)?;
        debug!(
            node = %channel.node,
            path = %channel.path,
            output = channel.is_output,
            "Channel added"
        );
        self.publish(RegistryEvent::ChannelAdded(channel.clone()));
        Ok(channel)
    }

    fn handle_add_connection(&mut self, connection: ConnectionInfo) -> Result<(), RegistryError> {
        self.store.add_connection(connection.clone())?;
        info!(
            from = %format!("{}{}", connection.from_node, connection.from_path),
            to = %format!("{}{}", connection.to_node, connection.to_path),
            mode = %connection.mode,
            "Connection added"
        );
        self.publish(RegistryEvent::ConnectionAdded(connection));
        Ok(())
    }

    fn publish_channel_removal(&self, removal: ChannelRemoval) {
        if let Some(connection) = &removal.connection {
            self.publish_connection_removed(connection);
        }
        self.publish(RegistryEvent::ChannelRemoved {
            node: removal.channel.node,
            path: removal.channel.path,
        });
    }

    fn publish_connection_removed(&self, connection: &ConnectionInfo) {
        debug!(
            from_node = %connection.from_node,
            to_node = %connection.to_node,
            "Connection removed"
        );
        self.publish(RegistryEvent::ConnectionRemoved(connection.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::{ChannelFilter, NodeFilter};
    use nimo_core::{Connection, LaunchDetails, ServiceType, TransportModes, TransportType};
    use std::net::Ipv4Addr;
    use tokio::sync::oneshot;

    fn create_actor() -> (
        mpsc::Sender<RegistryCommand>,
        RegistryActor,
        broadcast::Receiver<RegistryEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(64);
        (cmd_tx, RegistryActor::new(cmd_rx, event_tx), event_rx)
    }

    fn registration(name: &str) -> Box<NodeRegistration> {
        Box::new(NodeRegistration {
            name: name.to_string(),
            launch: LaunchDetails::default(),
            service_type: ServiceType::Filter,
            connection: Connection::new(Ipv4Addr::LOCALHOST, 5000, TransportType::Tcp),
        })
    }

    #[tokio::test]
    async fn test_add_node_publishes_machine_then_node() {
        let (_tx, mut actor, mut events) = create_actor();
        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::AddNode {
            registration: registration("n1"),
            respond_to,
        });
        let node = rx.await.unwrap().unwrap();
        assert_eq!(node.machine, "127.0.0.1");

        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::MachineAdded(_)));
        assert!(matches!(events.recv().await.unwrap(), RegistryEvent::NodeAdded(_)));
        assert_eq!(actor.counts().nodes, 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_publishes_nothing() {
        let (_tx, mut actor, mut events) = create_actor();
        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::RemoveNode {
            name: "ghost".to_string(),
            respond_to,
        });
        assert!(rx.await.unwrap().is_err());
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_remove_node_publishes_cascade() {
        let (_tx, mut actor, mut events) = create_actor();
        let (respond_to, _rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::AddNode {
            registration: registration("n1"),
            respond_to,
        });
        let (respond_to, _rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::AddChannel {
            spec: ChannelSpec {
                node: "n1".to_string(),
                path: "/out".to_string(),
                is_output: true,
                data_type: "t".to_string(),
                modes: TransportModes::TCP,
            },
            respond_to,
        });
        while events.try_recv().is_ok() {}

        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::RemoveNode {
            name: "n1".to_string(),
            respond_to,
        });
        rx.await.unwrap().unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::ChannelRemoved { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::NodeRemoved { .. }
        ));

        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetChannels {
            filter: ChannelFilter::All,
            respond_to,
        });
        assert!(rx.await.unwrap().is_empty());

        let (respond_to, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetNodes {
            filter: NodeFilter::All,
            respond_to,
        });
        assert!(rx.await.unwrap().is_empty());
    }
}
