//! The closed set of command names and their minimum argument counts.
//!
//! Both the registry and node command ports use this table; clients use the
//! same constants so request names can never drift from handler names.

/// A command name plus the number of arguments its handler requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
}

impl CommandSpec {
    pub const fn new(name: &'static str, min_args: usize) -> Self {
        Self { name, min_args }
    }

    /// Name echoed back in the response array.
    pub fn response_name(&self) -> String {
        response_name(self.name)
    }
}

/// Suffix appended to a command name to form its response name.
pub const RESPONSE_SUFFIX: &str = "Response";

pub fn response_name(command: &str) -> String {
    format!("{command}{RESPONSE_SUFFIX}")
}

// ============================================================================
// Registry commands
// ============================================================================

pub mod registry {
    use super::CommandSpec;

    pub const ADD_MACHINE: CommandSpec = CommandSpec::new("addMachine", 2);
    pub const IS_MACHINE_PRESENT: CommandSpec = CommandSpec::new("isMachinePresent", 1);
    pub const GET_MACHINE_INFORMATION: CommandSpec = CommandSpec::new("getMachineInformation", 1);
    pub const GET_INFORMATION_FOR_ALL_MACHINES: CommandSpec =
        CommandSpec::new("getInformationForAllMachines", 0);
    pub const GET_NUMBER_OF_MACHINES: CommandSpec = CommandSpec::new("getNumberOfMachines", 0);

    pub const ADD_NODE: CommandSpec = CommandSpec::new("addNode", 6);
    pub const REMOVE_NODE: CommandSpec = CommandSpec::new("removeNode", 1);
    pub const IS_NODE_PRESENT: CommandSpec = CommandSpec::new("isNodePresent", 1);
    pub const GET_NODE_INFORMATION: CommandSpec = CommandSpec::new("getNodeInformation", 1);
    pub const GET_INFORMATION_FOR_ALL_NODES: CommandSpec =
        CommandSpec::new("getInformationForAllNodes", 0);
    pub const GET_INFORMATION_FOR_ALL_NODES_ON_MACHINE: CommandSpec =
        CommandSpec::new("getInformationForAllNodesOnMachine", 1);
    pub const GET_NAMES_OF_NODES: CommandSpec = CommandSpec::new("getNamesOfNodes", 0);
    pub const GET_NUMBER_OF_NODES: CommandSpec = CommandSpec::new("getNumberOfNodes", 0);
    pub const GET_LAUNCH_DETAILS: CommandSpec = CommandSpec::new("getLaunchDetails", 1);

    pub const ADD_CHANNEL: CommandSpec = CommandSpec::new("addChannel", 5);
    pub const REMOVE_CHANNEL: CommandSpec = CommandSpec::new("removeChannel", 2);
    pub const REMOVE_CHANNELS_FOR_NODE: CommandSpec = CommandSpec::new("removeChannelsForNode", 1);
    pub const IS_CHANNEL_PRESENT: CommandSpec = CommandSpec::new("isChannelPresent", 2);
    pub const GET_CHANNEL_INFORMATION: CommandSpec = CommandSpec::new("getChannelInformation", 2);
    pub const GET_INFORMATION_FOR_ALL_CHANNELS: CommandSpec =
        CommandSpec::new("getInformationForAllChannels", 0);
    pub const GET_INFORMATION_FOR_ALL_CHANNELS_ON_NODE: CommandSpec =
        CommandSpec::new("getInformationForAllChannelsOnNode", 1);
    pub const GET_INFORMATION_FOR_ALL_CHANNELS_ON_MACHINE: CommandSpec =
        CommandSpec::new("getInformationForAllChannelsOnMachine", 1);
    pub const GET_NUMBER_OF_CHANNELS: CommandSpec = CommandSpec::new("getNumberOfChannels", 0);
    pub const SET_CHANNEL_IN_USE: CommandSpec = CommandSpec::new("setChannelInUse", 3);
    pub const GET_CHANNEL_IN_USE: CommandSpec = CommandSpec::new("getChannelInUse", 2);

    pub const ADD_CONNECTION: CommandSpec = CommandSpec::new("addConnection", 6);
    pub const REMOVE_CONNECTION: CommandSpec = CommandSpec::new("removeConnection", 3);
    pub const GET_CONNECTION_INFORMATION: CommandSpec =
        CommandSpec::new("getConnectionInformation", 3);
    pub const GET_INFORMATION_FOR_ALL_CONNECTIONS: CommandSpec =
        CommandSpec::new("getInformationForAllConnections", 0);
    pub const GET_INFORMATION_FOR_ALL_CONNECTIONS_ON_NODE: CommandSpec =
        CommandSpec::new("getInformationForAllConnectionsOnNode", 1);
    pub const GET_NUMBER_OF_CONNECTIONS: CommandSpec =
        CommandSpec::new("getNumberOfConnections", 0);

    pub const ADD_APP_TO_LIST: CommandSpec = CommandSpec::new("addAppToList", 3);
    pub const CLEAR_APP_LIST_FOR_LAUNCHER: CommandSpec =
        CommandSpec::new("clearAppListForLauncher", 1);
    pub const GET_INFORMATION_FOR_ALL_APPLICATIONS: CommandSpec =
        CommandSpec::new("getInformationForAllApplications", 0);
    pub const GET_INFORMATION_FOR_ALL_APPLICATIONS_ON_NODE: CommandSpec =
        CommandSpec::new("getInformationForAllApplicationsOnNode", 1);

    /// Every command the registry answers.
    pub const ALL: &[CommandSpec] = &[
        ADD_MACHINE,
        IS_MACHINE_PRESENT,
        GET_MACHINE_INFORMATION,
        GET_INFORMATION_FOR_ALL_MACHINES,
        GET_NUMBER_OF_MACHINES,
        ADD_NODE,
        REMOVE_NODE,
        IS_NODE_PRESENT,
        GET_NODE_INFORMATION,
        GET_INFORMATION_FOR_ALL_NODES,
        GET_INFORMATION_FOR_ALL_NODES_ON_MACHINE,
        GET_NAMES_OF_NODES,
        GET_NUMBER_OF_NODES,
        GET_LAUNCH_DETAILS,
        ADD_CHANNEL,
        REMOVE_CHANNEL,
        REMOVE_CHANNELS_FOR_NODE,
        IS_CHANNEL_PRESENT,
        GET_CHANNEL_INFORMATION,
        GET_INFORMATION_FOR_ALL_CHANNELS,
        GET_INFORMATION_FOR_ALL_CHANNELS_ON_NODE,
        GET_INFORMATION_FOR_ALL_CHANNELS_ON_MACHINE,
        GET_NUMBER_OF_CHANNELS,
        SET_CHANNEL_IN_USE,
        GET_CHANNEL_IN_USE,
        ADD_CONNECTION,
        REMOVE_CONNECTION,
        GET_CONNECTION_INFORMATION,
        GET_INFORMATION_FOR_ALL_CONNECTIONS,
        GET_INFORMATION_FOR_ALL_CONNECTIONS_ON_NODE,
        GET_NUMBER_OF_CONNECTIONS,
        ADD_APP_TO_LIST,
        CLEAR_APP_LIST_FOR_LAUNCHER,
        GET_INFORMATION_FOR_ALL_APPLICATIONS,
        GET_INFORMATION_FOR_ALL_APPLICATIONS_ON_NODE,
    ];
}

// ============================================================================
// Node commands
// ============================================================================

pub mod node {
    use super::CommandSpec;

    pub const SET_UP_INPUT_CHANNEL: CommandSpec = CommandSpec::new("setUpInputChannel", 2);
    pub const SET_UP_OUTPUT_CHANNEL: CommandSpec = CommandSpec::new("setUpOutputChannel", 2);
    pub const START_CHANNEL: CommandSpec = CommandSpec::new("startChannel", 1);
    pub const STOP_CHANNEL: CommandSpec = CommandSpec::new("stopChannel", 1);
    pub const STOP_NODE: CommandSpec = CommandSpec::new("stopNode", 0);

    /// Launcher nodes only.
    pub const LAUNCH_APP: CommandSpec = CommandSpec::new("launchApp", 3);

    pub const ALL: &[CommandSpec] = &[
        SET_UP_INPUT_CHANNEL,
        SET_UP_OUTPUT_CHANNEL,
        START_CHANNEL,
        STOP_CHANNEL,
        STOP_NODE,
        LAUNCH_APP,
    ];
}
