//! Wiring an output channel to an input channel across nodes.
//!
//! ```text
//!  operator            input node          output node          registry
//!     │ getChannel x2, getNode x2 ─────────────────────────────────▶│
//!     │ setUpInputChannel ──▶│                                      │
//!     │◀── endpoint ─────────│                                      │
//!     │ setUpOutputChannel(endpoint) ──────────▶│                   │
//!     │◀── source ──────────────────────────────│                   │
//!     │ startChannel(source) ▶│                                     │
//!     │ startChannel ──────────────────────────▶│                   │
//!     │ addConnection ─────────────────────────────────────────────▶│
//! ```
//!
//! Channels the registry reports as in use are refused before either node
//! is contacted. A later failure stops only the channels this call set up,
//! so no half-open link is left running and existing links are untouched.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use nimo_core::{ChannelInfo, Connection, ConnectionInfo, TransportModes, TransportType};

use crate::client::{NodeClient, RegistryClient};
use crate::error::{ClientError, ConnectError};

/// One end of a link: a node and a channel path on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnd {
    pub node: String,
    pub path: String,
}

impl ChannelEnd {
    pub fn new(node: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            path: path.into(),
        }
    }
}

async fn channel(registry: &RegistryClient, end: &ChannelEnd) -> Result<ChannelInfo, ConnectError> {
    registry
        .get_channel(&end.node, &end.path)
        .await?
        .ok_or_else(|| ConnectError::ChannelNotFound {
            node: end.node.clone(),
            path: end.path.clone(),
        })
}

async fn command_port(registry: &RegistryClient, node: &str) -> Result<SocketAddr, ConnectError> {
    let info = registry
        .get_node(node)
        .await?
        .ok_or_else(|| ConnectError::NodeNotFound(node.to_string()))?;
    Ok(SocketAddr::V4(info.connection.socket_addr()))
}

/// Chooses the transport: `requested` if both ends allow it, otherwise the
/// preferred common one.
fn choose_mode(
    from: TransportModes,
    to: TransportModes,
    requested: Option<TransportType>,
) -> Result<TransportType, ConnectError> {
    let common = TransportModes::from_bits(from.bits() & to.bits()).unwrap_or_default();
    let mode = match requested {
        Some(mode) => Some(mode).filter(|m| common.contains(*m)),
        None => common.preferred(),
    };
    mode.ok_or(ConnectError::NoCommonMode { from, to })
}

/// Links `from` (an output) to `to` (an input) and records the connection.
pub async fn connect_channels(
    registry: &RegistryClient,
    from: &ChannelEnd,
    to: &ChannelEnd,
    mode: Option<TransportType>,
) -> Result<ConnectionInfo, ConnectError> {
    let output = channel(registry, from).await?;
    let input = channel(registry, to).await?;
    if !output.is_output {
        return Err(ConnectError::WrongDirection {
            node: from.node.clone(),
            path: from.path.clone(),
            expected: "output",
        });
    }
    if input.is_output {
        return Err(ConnectError::WrongDirection {
            node: to.node.clone(),
            path: to.path.clone(),
            expected: "input",
        });
    }
    for (end, info) in [(from, &output), (to, &input)] {
        if info.in_use {
            return Err(ConnectError::ChannelInUse {
                node: end.node.clone(),
                path: end.path.clone(),
            });
        }
    }
    let mode = choose_mode(output.modes, input.modes, mode)?;

    let mut input_node = NodeClient::connect(command_port(registry, &to.node).await?).await?;
    let mut output_node = NodeClient::connect(command_port(registry, &from.node).await?).await?;

    let target = input_node.set_up_input_channel(&to.path, mode).await?;
    debug!(to = %to.path, target = %target, "Input endpoint ready");

    let connection = ConnectionInfo {
        from_node: from.node.clone(),
        from_path: from.path.clone(),
        to_node: to.node.clone(),
        to_path: to.path.clone(),
        data_type: output.data_type,
        mode,
    };
    let mut output_set_up = false;
    let linked = link(
        &mut input_node,
        &mut output_node,
        registry,
        &connection,
        target,
        &mut output_set_up,
    )
    .await;
    match linked {
        Ok(()) => {
            info!(
                from = %format!("{}{}", from.node, from.path),
                to = %format!("{}{}", to.node, to.path),
                mode = %mode,
                "Channels connected"
            );
            Ok(connection)
        }
        Err(e) => {
            warn!(error = %e, output_set_up, "Connect failed, stopping what was set up");
            if output_set_up {
                stop_quietly(&mut output_node, &from.path).await;
            }
            stop_quietly(&mut input_node, &to.path).await;
            Err(e.into())
        }
    }
}

async fn link(
    input_node: &mut NodeClient,
    output_node: &mut NodeClient,
    registry: &RegistryClient,
    connection: &ConnectionInfo,
    target: Connection,
    output_set_up: &mut bool,
) -> Result<(), ClientError> {
    let source = output_node
        .set_up_output_channel(&connection.from_path, target)
        .await?;
    *output_set_up = true;
    input_node
        .start_channel(&connection.to_path, Some(source))
        .await?;
    output_node
        .start_channel(&connection.from_path, None)
        .await?;
    registry.add_connection(connection).await
}

async fn stop_quietly(node: &mut NodeClient, path: &str) {
    if let Err(e) = node.stop_channel(path).await {
        debug!(channel = %path, error = %e, "Stop after failed connect also failed");
    }
}

/// Stops the link leaving output `from` and removes its registry record.
///
/// A node that is no longer reachable does not prevent the record from
/// being removed.
pub async fn disconnect_channels(
    registry: &RegistryClient,
    from: &ChannelEnd,
) -> Result<ConnectionInfo, ConnectError> {
    let connection = registry
        .get_connection(&from.node, &from.path, true)
        .await?
        .ok_or_else(|| ConnectError::NotConnected {
            node: from.node.clone(),
            path: from.path.clone(),
        })?;

    let ends = [
        (connection.from_node.as_str(), connection.from_path.as_str()),
        (connection.to_node.as_str(), connection.to_path.as_str()),
    ];
    for (node, path) in ends {
        if let Err(e) = stop_remote(registry, node, path).await {
            warn!(node = %node, channel = %path, error = %e, "Could not stop channel");
        }
    }

    registry
        .remove_connection(&from.node, &from.path, true)
        .await?;
    info!(
        from = %format!("{}{}", connection.from_node, connection.from_path),
        to = %format!("{}{}", connection.to_node, connection.to_path),
        "Channels disconnected"
    );
    Ok(connection)
}

async fn stop_remote(
    registry: &RegistryClient,
    node: &str,
    path: &str,
) -> Result<(), ConnectError> {
    let addr = command_port(registry, node).await?;
    let mut client = NodeClient::connect(addr).await?;
    client.stop_channel(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_mode() {
        use TransportModes as M;
        use TransportType as T;

        assert_eq!(choose_mode(M::ANY, M::ANY, None).unwrap(), T::Tcp);
        assert_eq!(choose_mode(M::ANY, M::UDP, None).unwrap(), T::Udp);
        assert_eq!(choose_mode(M::ANY, M::ANY, Some(T::Udp)).unwrap(), T::Udp);
        assert!(matches!(
            choose_mode(M::TCP, M::UDP, None),
            Err(ConnectError::NoCommonMode { .. })
        ));
        assert!(matches!(
            choose_mode(M::ANY, M::TCP, Some(T::Udp)),
            Err(ConnectError::NoCommonMode { .. })
        ));
    }
}
