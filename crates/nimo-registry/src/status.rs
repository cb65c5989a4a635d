//! Status multicast broadcaster.
//!
//! Relays registry events to the status group as fire-and-forget text
//! datagrams. Delivery is best-effort: a failed send is logged and dropped,
//! and a lagging event receiver skips ahead.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimo_protocol::{StatusKind, StatusNotification};

use crate::registry::RegistryEvent;

/// Multicast TTL; status traffic stays on the local segment.
const MULTICAST_TTL: u32 = 1;

/// Maps a registry event to its notification.
pub fn notification_for(event: &RegistryEvent) -> StatusNotification {
    match event {
        RegistryEvent::MachineAdded(machine) => StatusNotification::new(
            StatusKind::MachineAdded,
            [machine.name.clone(), machine.address.to_string()],
        ),
        RegistryEvent::NodeAdded(node) => StatusNotification::new(
            StatusKind::NodeAdded,
            [
                node.name.clone(),
                node.machine.clone(),
                node.service_type.to_string(),
                node.connection.to_string(),
            ],
        ),
        RegistryEvent::NodeRemoved { name } => {
            StatusNotification::new(StatusKind::NodeRemoved, [name.as_str()])
        }
        RegistryEvent::ChannelAdded(channel) => StatusNotification::new(
            StatusKind::ChannelAdded,
            [
                channel.node.clone(),
                channel.path.clone(),
                if channel.is_output { "output" } else { "input" }.to_string(),
                channel.data_type.clone(),
            ],
        ),
        RegistryEvent::ChannelRemoved { node, path } => {
            StatusNotification::new(StatusKind::ChannelRemoved, [node.as_str(), path.as_str()])
        }
        RegistryEvent::ConnectionAdded(connection) => StatusNotification::new(
            StatusKind::ConnectionAdded,
            [
                connection.from_node.clone(),
                connection.from_path.clone(),
                connection.to_node.clone(),
                connection.to_path.clone(),
                connection.mode.to_string(),
            ],
        ),
        RegistryEvent::ConnectionRemoved(connection) => StatusNotification::new(
            StatusKind::ConnectionRemoved,
            [
                connection.from_node.as_str(),
                connection.from_path.as_str(),
                connection.to_node.as_str(),
                connection.to_path.as_str(),
            ],
        ),
        RegistryEvent::ApplicationAdded(app) => StatusNotification::new(
            StatusKind::ApplicationAdded,
            [app.launcher_node.as_str(), app.app_name.as_str()],
        ),
    }
}

/// Sends status notifications to one group address.
pub struct StatusBroadcaster {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl StatusBroadcaster {
    /// Binds an ephemeral sending socket for `target`.
    pub async fn bind(target: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        if target.ip().is_multicast() {
            socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
            socket.set_multicast_loop_v4(true)?;
        }
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddrV4 {
        self.target
    }

    /// Best-effort send; failures are logged only.
    pub async fn send(&self, notification: &StatusNotification) {
        let text = notification.to_wire();
        match self
            .socket
            .send_to(text.as_bytes(), SocketAddr::V4(self.target))
            .await
        {
            Ok(_) => debug!(kind = %notification.kind, "Status sent"),
            Err(e) => warn!(kind = %notification.kind, error = %e, "Failed to send status"),
        }
    }

    /// Announces the registry, relays `events` until `cancel` fires, then
    /// announces shutdown.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<RegistryEvent>,
        cancel: CancellationToken,
    ) {
        info!(group = %self.target, "Status broadcaster starting");
        self.send(&StatusNotification::new(StatusKind::RegistryLaunched, Vec::<String>::new()))
            .await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }

                result = events.recv() => {
                    match result {
                        Ok(event) => self.send(&notification_for(&event)).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Status broadcaster lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Registry event channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.send(&StatusNotification::new(StatusKind::RegistryStopping, Vec::<String>::new()))
            .await;
        info!("Status broadcaster stopped");
    }

    pub fn spawn(
        self,
        events: broadcast::Receiver<RegistryEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimo_core::{MachineInfo, TransportType};
    use nimo_protocol::status::MAX_STATUS_DATAGRAM;

    async fn receive(socket: &UdpSocket) -> StatusNotification {
        let mut buf = vec![0u8; MAX_STATUS_DATAGRAM];
        let n = socket.recv(&mut buf).await.unwrap();
        StatusNotification::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap()
    }

    #[test]
    fn test_connection_added_fields() {
        let event = RegistryEvent::ConnectionAdded(nimo_core::ConnectionInfo {
            from_node: "A".to_string(),
            from_path: "/out1".to_string(),
            to_node: "B".to_string(),
            to_path: "/in1".to_string(),
            data_type: "t".to_string(),
            mode: TransportType::Udp,
        });
        let note = notification_for(&event);
        assert_eq!(note.kind, StatusKind::ConnectionAdded);
        assert_eq!(note.fields, vec!["A", "/out1", "B", "/in1", "udp"]);
    }

    #[test]
    fn test_tab_in_name_keeps_field_count() {
        let event = RegistryEvent::ChannelRemoved {
            node: "odd\tname".to_string(),
            path: "/in".to_string(),
        };
        let wire = notification_for(&event).to_wire();
        let parsed = StatusNotification::parse(&wire).unwrap();
        assert_eq!(parsed.kind, StatusKind::ChannelRemoved);
        assert_eq!(parsed.fields, vec!["odd name", "/in"]);
    }

    #[tokio::test]
    async fn test_broadcaster_relays_events_between_lifecycle_notices() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = match listener.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let broadcaster = StatusBroadcaster::bind(target).await.unwrap();
        let (tx, rx) = broadcast::channel(8);
        let cancel = CancellationToken::new();
        let task = broadcaster.spawn(rx, cancel.clone());

        assert_eq!(receive(&listener).await.kind, StatusKind::RegistryLaunched);

        tx.send(RegistryEvent::MachineAdded(MachineInfo {
            name: "host".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 1),
        }))
        .unwrap();
        let note = receive(&listener).await;
        assert_eq!(note.kind, StatusKind::MachineAdded);
        assert_eq!(note.fields, vec!["host", "10.0.0.1"]);

        cancel.cancel();
        assert_eq!(receive(&listener).await.kind, StatusKind::RegistryStopping);
        task.await.unwrap();
    }
}
