use std::sync::Arc;

use nimo_core::{LaunchDetails, ServiceType, Value};
use nimo_protocol::commands::registry::{
    ADD_NODE, GET_INFORMATION_FOR_ALL_NODES, GET_INFORMATION_FOR_ALL_NODES_ON_MACHINE,
    GET_LAUNCH_DETAILS, GET_NAMES_OF_NODES, GET_NODE_INFORMATION, GET_NUMBER_OF_NODES,
    IS_NODE_PRESENT, REMOVE_NODE,
};
use nimo_protocol::{Arguments, HandlerResult, HandlerTable, Response};

use super::{completed, count, found, present, records};
use crate::registry::{NodeFilter, NodeRegistration, RegistryHandle};

pub(super) fn register(table: &mut HandlerTable<RegistryHandle>) {
    table
        .register(ADD_NODE, add_node)
        .register(REMOVE_NODE, remove_node)
        .register(IS_NODE_PRESENT, is_node_present)
        .register(GET_NODE_INFORMATION, get_node_information)
        .register(GET_INFORMATION_FOR_ALL_NODES, get_all_nodes)
        .register(GET_INFORMATION_FOR_ALL_NODES_ON_MACHINE, get_nodes_on_machine)
        .register(GET_NAMES_OF_NODES, get_names_of_nodes)
        .register(GET_NUMBER_OF_NODES, get_number_of_nodes)
        .register(GET_LAUNCH_DETAILS, get_launch_details);
}

/// `addNode(name, execPath, launchDirectory, commandLine, serviceType, connection)`
async fn add_node(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let registration = NodeRegistration {
        name: args.name(0)?,
        launch: LaunchDetails {
            exec_path: args.string(1)?,
            launch_directory: args.string(2)?,
            command_line: args.string(3)?,
        },
        service_type: args.narrow(4, |v| v.as_integer().and_then(ServiceType::from_code))?,
        connection: args.connection(5)?,
    };
    completed(registry.add_node(registration).await)
}

async fn remove_node(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.string(0)?;
    completed(registry.remove_node(name).await)
}

async fn is_node_present(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.string(0)?;
    present(registry.get_node(name).await.is_some())
}

async fn get_node_information(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.string(0)?;
    found(registry.get_node(name).await)
}

async fn get_all_nodes(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    records(&registry.get_nodes(NodeFilter::All).await)
}

async fn get_nodes_on_machine(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let machine = args.string(0)?;
    records(&registry.get_nodes(NodeFilter::OnMachine(machine)).await)
}

async fn get_names_of_nodes(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    let nodes = registry.get_nodes(NodeFilter::All).await;
    Ok(Response::complex(
        nodes.into_iter().map(|node| Value::String(node.name)),
    ))
}

async fn get_number_of_nodes(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    count(registry.get_counts().await.nodes)
}

async fn get_launch_details(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.string(0)?;
    found(registry.get_launch_details(name).await)
}
