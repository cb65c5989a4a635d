use std::sync::Arc;

use nimo_core::{ConnectionInfo, TransportType};
use nimo_protocol::commands::registry::{
    ADD_CONNECTION, GET_CONNECTION_INFORMATION, GET_INFORMATION_FOR_ALL_CONNECTIONS,
    GET_INFORMATION_FOR_ALL_CONNECTIONS_ON_NODE, GET_NUMBER_OF_CONNECTIONS, REMOVE_CONNECTION,
};
use nimo_protocol::{Arguments, HandlerResult, HandlerTable};

use super::{completed, count, found, records};
use crate::registry::{ConnectionFilter, RegistryHandle};

pub(super) fn register(table: &mut HandlerTable<RegistryHandle>) {
    table
        .register(ADD_CONNECTION, add_connection)
        .register(REMOVE_CONNECTION, remove_connection)
        .register(GET_CONNECTION_INFORMATION, get_connection_information)
        .register(GET_INFORMATION_FOR_ALL_CONNECTIONS, get_all_connections)
        .register(GET_INFORMATION_FOR_ALL_CONNECTIONS_ON_NODE, get_connections_on_node)
        .register(GET_NUMBER_OF_CONNECTIONS, get_number_of_connections);
}

/// `addConnection(fromNode, fromPath, toNode, toPath, dataType, mode)`
///
/// `mode` is a single transport code, not a mask.
async fn add_connection(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let connection = ConnectionInfo {
        from_node: args.string(0)?,
        from_path: args.string(1)?,
        to_node: args.string(2)?,
        to_path: args.string(3)?,
        data_type: args.string(4)?,
        mode: args.narrow(5, |v| v.as_integer().and_then(TransportType::from_code))?,
    };
    completed(registry.add_connection(connection).await)
}

/// `removeConnection(node, path, fromEnd)`
async fn remove_connection(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    let from_end = args.logical(2)?;
    completed(registry.remove_connection(node, path, from_end).await)
}

async fn get_connection_information(
    registry: Arc<RegistryHandle>,
    args: Arguments,
) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    let from_end = args.logical(2)?;
    found(registry.get_connection(node, path, from_end).await)
}

async fn get_all_connections(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    records(&registry.get_connections(ConnectionFilter::All).await)
}

async fn get_connections_on_node(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    records(&registry.get_connections(ConnectionFilter::OnNode(node)).await)
}

async fn get_number_of_connections(
    registry: Arc<RegistryHandle>,
    _args: Arguments,
) -> HandlerResult {
    count(registry.get_counts().await.connections)
}
