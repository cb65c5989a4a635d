use std::sync::Arc;

use nimo_core::{TransportModes, Value};
use nimo_protocol::commands::registry::{
    ADD_CHANNEL, GET_CHANNEL_INFORMATION, GET_CHANNEL_IN_USE, GET_INFORMATION_FOR_ALL_CHANNELS,
    GET_INFORMATION_FOR_ALL_CHANNELS_ON_MACHINE, GET_INFORMATION_FOR_ALL_CHANNELS_ON_NODE,
    GET_NUMBER_OF_CHANNELS, IS_CHANNEL_PRESENT, REMOVE_CHANNEL, REMOVE_CHANNELS_FOR_NODE,
    SET_CHANNEL_IN_USE,
};
use nimo_protocol::{Arguments, HandlerResult, HandlerTable, Response};

use super::{completed, count, found, present, records};
use crate::registry::{ChannelFilter, ChannelSpec, RegistryHandle};

pub(super) fn register(table: &mut HandlerTable<RegistryHandle>) {
    table
        .register(ADD_CHANNEL, add_channel)
        .register(REMOVE_CHANNEL, remove_channel)
        .register(REMOVE_CHANNELS_FOR_NODE, remove_channels_for_node)
        .register(IS_CHANNEL_PRESENT, is_channel_present)
        .register(GET_CHANNEL_INFORMATION, get_channel_information)
        .register(GET_INFORMATION_FOR_ALL_CHANNELS, get_all_channels)
        .register(GET_INFORMATION_FOR_ALL_CHANNELS_ON_NODE, get_channels_on_node)
        .register(GET_INFORMATION_FOR_ALL_CHANNELS_ON_MACHINE, get_channels_on_machine)
        .register(GET_NUMBER_OF_CHANNELS, get_number_of_channels)
        .register(SET_CHANNEL_IN_USE, set_channel_in_use)
        .register(GET_CHANNEL_IN_USE, get_channel_in_use);
}

/// `addChannel(node, path, isOutput, dataType, modes)`
async fn add_channel(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let spec = ChannelSpec {
        node: args.name(0)?,
        path: args.string(1)?,
        is_output: args.logical(2)?,
        data_type: args.string(3)?,
        modes: args.narrow(4, |v| v.as_integer().and_then(TransportModes::from_bits))?,
    };
    completed(registry.add_channel(spec).await)
}

async fn remove_channel(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    completed(registry.remove_channel(node, path).await)
}

async fn remove_channels_for_node(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    completed(registry.remove_channels_for_node(node).await)
}

async fn is_channel_present(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    present(registry.get_channel(node, path).await.is_some())
}

async fn get_channel_information(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    found(registry.get_channel(node, path).await)
}

async fn get_all_channels(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    records(&registry.get_channels(ChannelFilter::All).await)
}

async fn get_channels_on_node(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    records(&registry.get_channels(ChannelFilter::OnNode(node)).await)
}

async fn get_channels_on_machine(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let machine = args.string(0)?;
    records(&registry.get_channels(ChannelFilter::OnMachine(machine)).await)
}

async fn get_number_of_channels(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    count(registry.get_counts().await.channels)
}

/// `setChannelInUse(node, path, inUse)`
async fn set_channel_in_use(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    let in_use = args.logical(2)?;
    completed(registry.set_channel_in_use(node, path, in_use).await)
}

/// `[true, inUse]` for a known channel, `[false]` otherwise.
async fn get_channel_in_use(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let node = args.string(0)?;
    let path = args.string(1)?;
    Ok(match registry.get_channel(node, path).await {
        Some(channel) => Response::complex([true, channel.in_use]),
        None => Response::complex([Value::Logical(false)]),
    })
}
