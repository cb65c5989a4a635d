//! Node command handlers.
//!
//! Every node answers the channel commands and `stopNode`; launcher nodes
//! also answer `launchApp`. Channel failures become a failed simple
//! response whose reason is the [`ChannelError`](crate::error::ChannelError)
//! display.

use std::sync::Arc;

use tracing::{debug, info, warn};

use nimo_core::{TransportType, Value};
use nimo_protocol::commands::node::{
    LAUNCH_APP, SET_UP_INPUT_CHANNEL, SET_UP_OUTPUT_CHANNEL, START_CHANNEL, STOP_CHANNEL, STOP_NODE,
};
use nimo_protocol::{Arguments, CommandFailure, HandlerResult, HandlerTable, Response};

use crate::state::NodeState;

/// Handler table for a node; `launcher` adds `launchApp`.
pub fn node_handlers(launcher: bool) -> HandlerTable<NodeState> {
    let mut table = HandlerTable::new();
    table
        .register(SET_UP_INPUT_CHANNEL, set_up_input_channel)
        .register(SET_UP_OUTPUT_CHANNEL, set_up_output_channel)
        .register(START_CHANNEL, start_channel)
        .register(STOP_CHANNEL, stop_channel)
        .register(STOP_NODE, stop_node);
    if launcher {
        table.register(LAUNCH_APP, launch_app);
    }
    table
}

fn failed(error: impl ToString) -> CommandFailure {
    CommandFailure::new(error.to_string())
}

/// `setUpInputChannel(path, mode)` → `[connection]`
async fn set_up_input_channel(node: Arc<NodeState>, args: Arguments) -> HandlerResult {
    let path = args.string(0)?;
    let mode = args.narrow(1, |v| v.as_integer().and_then(TransportType::from_code))?;
    let local = node.set_up_input(&path, mode).await.map_err(failed)?;
    Ok(Response::complex([local.to_value()]))
}

/// `setUpOutputChannel(path, peer)` → `[connection]`
async fn set_up_output_channel(node: Arc<NodeState>, args: Arguments) -> HandlerResult {
    let path = args.string(0)?;
    let peer = args.connection(1)?;
    let local = node.set_up_output(&path, peer).await.map_err(failed)?;
    Ok(Response::complex([local.to_value()]))
}

/// `startChannel(path[, filter])`
async fn start_channel(node: Arc<NodeState>, args: Arguments) -> HandlerResult {
    let path = args.string(0)?;
    let filter = args.optional_connection(1)?;
    node.start_channel(&path, filter).await.map_err(failed)?;
    Ok(Response::success())
}

async fn stop_channel(node: Arc<NodeState>, args: Arguments) -> HandlerResult {
    let path = args.string(0)?;
    node.stop_channel(&path).await.map_err(failed)?;
    Ok(Response::success())
}

async fn stop_node(node: Arc<NodeState>, _args: Arguments) -> HandlerResult {
    info!(node = %node.name(), "Stop requested over command port");
    node.stop_token().cancel();
    Ok(Response::success())
}

/// `launchApp(app, nodeName, [arguments...])` → `[firstLine]`, or `[]` when
/// the application printed nothing.
async fn launch_app(node: Arc<NodeState>, args: Arguments) -> HandlerResult {
    let app = args.name(0)?;
    let node_name = args.name(1)?;
    let arguments = args
        .array(2)?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(CommandFailure::invalid_arguments)?;

    let Some(role) = node.launcher() else {
        warn!(node = %node.name(), "launchApp on a node without a catalogue");
        return Err(failed(format!("node '{}' is not a launcher", node.name())));
    };

    let request = role
        .catalogue
        .request(&app, &node_name, &arguments)
        .map_err(failed)?;
    let outcome = role.launcher.launch(request).await.map_err(failed)?;
    debug!(app = %app, pid = ?outcome.pid, "Launch completed");
    Ok(Response::complex(outcome.first_line.map(Value::from)))
}
