//! Registry service wiring.
//!
//! Ties the registry actor, the command server and the optional status
//! broadcaster together behind one cancellation token.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nimo_protocol::{CommandServer, ServerError};

use crate::handlers::registry_handlers;
use crate::registry::{spawn_registry, RegistryEvent, RegistryHandle};
use crate::status::StatusBroadcaster;

/// Service name used in log lines.
pub const SERVICE_NAME: &str = "registry";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to open status socket for {target}: {error}")]
    Status { target: SocketAddrV4, error: String },
}

/// A bound but not yet running registry.
pub struct RegistryService {
    handle: RegistryHandle,
    server: CommandServer<RegistryHandle>,
    status: Option<StatusBroadcaster>,
    events: Option<broadcast::Receiver<RegistryEvent>>,
}

impl RegistryService {
    /// Spawns the registry actor and binds its command port.
    ///
    /// `status_group` enables the status multicast. The event subscription
    /// is taken here so nothing published before [`run`](Self::run) is lost.
    pub async fn bind(
        addr: SocketAddr,
        status_group: Option<SocketAddrV4>,
    ) -> Result<Self, ServiceError> {
        let handle = spawn_registry();

        let (status, events) = match status_group {
            Some(target) => {
                let broadcaster = StatusBroadcaster::bind(target)
                    .await
                    .map_err(|e| ServiceError::Status {
                        target,
                        error: e.to_string(),
                    })?;
                (Some(broadcaster), Some(handle.subscribe()))
            }
            None => (None, None),
        };

        let server = CommandServer::bind(
            SERVICE_NAME,
            addr,
            registry_handlers(),
            Arc::new(handle.clone()),
        )
        .await?;

        Ok(Self {
            handle,
            server,
            status,
            events,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// In-process access to the registry, bypassing the command port.
    pub fn handle(&self) -> RegistryHandle {
        self.handle.clone()
    }

    /// Serves until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            handle,
            server,
            status,
            events,
        } = self;

        let status_task = match (status, events) {
            (Some(broadcaster), Some(events)) => Some(broadcaster.spawn(events, cancel.clone())),
            _ => None,
        };

        server.run(cancel).await;

        let counts = handle.get_counts().await;
        info!(
            machines = counts.machines,
            nodes = counts.nodes,
            channels = counts.channels,
            connections = counts.connections,
            "Registry service stopped"
        );

        if let Some(task) = status_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Status broadcaster task failed");
            }
        }
    }
}
