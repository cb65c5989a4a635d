//! Command port clients.
//!
//! - [`CommandClient`] - one persistent session to any command port
//! - [`RegistryClient`] - typed wrappers for every registry command
//! - [`NodeClient`] - typed wrappers for the node command set
//!
//! Response parsing never panics. A single lookup whose payload does not
//! have the promised shape is reported as "not found" with a warning; list
//! queries drop entries that fail to narrow.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use nimo_core::{
    ApplicationInfo, ChannelInfo, Connection, ConnectionInfo, LaunchDetails, MachineInfo,
    NodeInfo, Record, ServiceType, TransportModes, TransportType, Value,
};
use nimo_protocol::commands::{node as node_cmd, registry as reg};
use nimo_protocol::framing::write_value_timeout;
use nimo_protocol::{read_value, CommandSpec, Request, Response};

use crate::error::ClientError;

/// Upper bound for establishing a session.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a reply once a request is written.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Command Client
// ============================================================================

/// A persistent session to one command port.
///
/// Requests on one session are strictly sequential; share a client behind a
/// lock (as [`RegistryClient`] does) or open one per task.
pub struct CommandClient {
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl CommandClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| ClientError::Connect {
                addr,
                error: e.to_string(),
            })?;
        // Requests are small; latency matters more than batching.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "Could not disable Nagle on command session");
        }
        let (read_half, write_half) = stream.into_split();
        debug!(peer = %addr, "Command session opened");
        Ok(Self {
            peer: addr,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends one request and waits for its response.
    pub async fn call(
        &mut self,
        spec: CommandSpec,
        arguments: Vec<Value>,
    ) -> Result<Response, ClientError> {
        let request = Request::new(spec.name, arguments);
        write_value_timeout(&mut self.writer, &request.to_value()).await?;

        let reply = timeout(RESPONSE_TIMEOUT, read_value(&mut self.reader))
            .await
            .map_err(|_| ClientError::Timeout(RESPONSE_TIMEOUT))??;
        Ok(Response::from_value(spec.name, reply)?)
    }

    /// A command answered with a simple response; failure becomes an error.
    pub async fn call_simple(
        &mut self,
        spec: CommandSpec,
        arguments: Vec<Value>,
    ) -> Result<(), ClientError> {
        let response = self.call(spec, arguments).await?;
        match response {
            Response::Simple { success: true, .. } => Ok(()),
            Response::Simple { reason, .. } => Err(ClientError::Failed {
                command: spec.name.to_string(),
                reason: reason.unwrap_or_default(),
            }),
            Response::Complex(_) => Err(unexpected(spec)),
        }
    }

    /// A command answered with a complex response; returns its items.
    pub async fn call_complex(
        &mut self,
        spec: CommandSpec,
        arguments: Vec<Value>,
    ) -> Result<Vec<Value>, ClientError> {
        let response = self.call(spec, arguments).await?;
        match response {
            Response::Complex(payload) => payload.into_array().ok_or_else(|| unexpected(spec)),
            Response::Simple { success: false, reason } => Err(ClientError::Failed {
                command: spec.name.to_string(),
                reason: reason.unwrap_or_default(),
            }),
            Response::Simple { .. } => Err(unexpected(spec)),
        }
    }
}

fn unexpected(spec: CommandSpec) -> ClientError {
    ClientError::UnexpectedPayload {
        command: spec.name.to_string(),
    }
}

// ============================================================================
// Payload narrowing
// ============================================================================

/// `[found, record]` / `[false]`.
fn parse_found<R: Record>(spec: CommandSpec, items: &[Value]) -> Option<R> {
    match items.first().and_then(Value::as_logical) {
        Some(true) => {
            let record = items.get(1).and_then(R::from_value);
            if record.is_none() {
                warn!(command = spec.name, "Malformed record in response, treating as not found");
            }
            record
        }
        Some(false) => None,
        None => {
            warn!(command = spec.name, "Response lacks found flag, treating as not found");
            None
        }
    }
}

fn parse_records<R: Record>(spec: CommandSpec, items: &[Value]) -> Vec<R> {
    let records: Vec<R> = items.iter().filter_map(R::from_value).collect();
    if records.len() != items.len() {
        warn!(
            command = spec.name,
            dropped = items.len() - records.len(),
            "Dropped malformed records"
        );
    }
    records
}

fn parse_count(spec: CommandSpec, items: &[Value]) -> Result<usize, ClientError> {
    items
        .first()
        .and_then(Value::as_integer)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| unexpected(spec))
}

fn parse_flag(spec: CommandSpec, items: &[Value]) -> Result<bool, ClientError> {
    items
        .first()
        .and_then(Value::as_logical)
        .ok_or_else(|| unexpected(spec))
}

// ============================================================================
// Registry Client
// ============================================================================

/// Typed access to the registry's command port over one shared session.
pub struct RegistryClient {
    client: Mutex<CommandClient>,
}

impl RegistryClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Ok(Self::new(CommandClient::connect(addr).await?))
    }

    pub fn new(client: CommandClient) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    async fn simple(&self, spec: CommandSpec, arguments: Vec<Value>) -> Result<(), ClientError> {
        self.client.lock().await.call_simple(spec, arguments).await
    }

    async fn complex(
        &self,
        spec: CommandSpec,
        arguments: Vec<Value>,
    ) -> Result<Vec<Value>, ClientError> {
        self.client.lock().await.call_complex(spec, arguments).await
    }

    async fn lookup<R: Record>(
        &self,
        spec: CommandSpec,
        arguments: Vec<Value>,
    ) -> Result<Option<R>, ClientError> {
        let items = self.complex(spec, arguments).await?;
        Ok(parse_found(spec, &items))
    }

    async fn list<R: Record>(
        &self,
        spec: CommandSpec,
        arguments: Vec<Value>,
    ) -> Result<Vec<R>, ClientError> {
        let items = self.complex(spec, arguments).await?;
        Ok(parse_records(spec, &items))
    }

    async fn count(&self, spec: CommandSpec) -> Result<usize, ClientError> {
        let items = self.complex(spec, Vec::new()).await?;
        parse_count(spec, &items)
    }

    async fn flag(&self, spec: CommandSpec, arguments: Vec<Value>) -> Result<bool, ClientError> {
        let items = self.complex(spec, arguments).await?;
        parse_flag(spec, &items)
    }

    // ------------------------------------------------------------------------
    // Machines
    // ------------------------------------------------------------------------

    pub async fn add_machine(
        &self,
        name: &str,
        address: std::net::Ipv4Addr,
    ) -> Result<(), ClientError> {
        self.simple(reg::ADD_MACHINE, vec![name.into(), address.into()])
            .await
    }

    pub async fn is_machine_present(&self, name: &str) -> Result<bool, ClientError> {
        self.flag(reg::IS_MACHINE_PRESENT, vec![name.into()]).await
    }

    pub async fn get_machine(&self, name: &str) -> Result<Option<MachineInfo>, ClientError> {
        self.lookup(reg::GET_MACHINE_INFORMATION, vec![name.into()])
            .await
    }

    pub async fn get_machines(&self) -> Result<Vec<MachineInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_MACHINES, Vec::new())
            .await
    }

    pub async fn machine_count(&self) -> Result<usize, ClientError> {
        self.count(reg::GET_NUMBER_OF_MACHINES).await
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    pub async fn add_node(
        &self,
        name: &str,
        launch: &LaunchDetails,
        service_type: ServiceType,
        connection: Connection,
    ) -> Result<(), ClientError> {
        self.simple(
            reg::ADD_NODE,
            vec![
                name.into(),
                Value::from(&launch.exec_path),
                Value::from(&launch.launch_directory),
                Value::from(&launch.command_line),
                Value::Integer(service_type.code()),
                connection.to_value(),
            ],
        )
        .await
    }

    pub async fn remove_node(&self, name: &str) -> Result<(), ClientError> {
        self.simple(reg::REMOVE_NODE, vec![name.into()]).await
    }

    pub async fn is_node_present(&self, name: &str) -> Result<bool, ClientError> {
        self.flag(reg::IS_NODE_PRESENT, vec![name.into()]).await
    }

    pub async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>, ClientError> {
        self.lookup(reg::GET_NODE_INFORMATION, vec![name.into()])
            .await
    }

    pub async fn get_nodes(&self) -> Result<Vec<NodeInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_NODES, Vec::new())
            .await
    }

    pub async fn get_nodes_on_machine(&self, machine: &str) -> Result<Vec<NodeInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_NODES_ON_MACHINE, vec![machine.into()])
            .await
    }

    pub async fn get_node_names(&self) -> Result<Vec<String>, ClientError> {
        let items = self.complex(reg::GET_NAMES_OF_NODES, Vec::new()).await?;
        Ok(items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    pub async fn node_count(&self) -> Result<usize, ClientError> {
        self.count(reg::GET_NUMBER_OF_NODES).await
    }

    pub async fn get_launch_details(
        &self,
        name: &str,
    ) -> Result<Option<LaunchDetails>, ClientError> {
        self.lookup(reg::GET_LAUNCH_DETAILS, vec![name.into()]).await
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    pub async fn add_channel(
        &self,
        node: &str,
        path: &str,
        is_output: bool,
        data_type: &str,
        modes: TransportModes,
    ) -> Result<(), ClientError> {
        self.simple(
            reg::ADD_CHANNEL,
            vec![
                node.into(),
                path.into(),
                is_output.into(),
                data_type.into(),
                Value::Integer(modes.bits()),
            ],
        )
        .await
    }

    pub async fn remove_channel(&self, node: &str, path: &str) -> Result<(), ClientError> {
        self.simple(reg::REMOVE_CHANNEL, vec![node.into(), path.into()])
            .await
    }

    pub async fn remove_channels_for_node(&self, node: &str) -> Result<(), ClientError> {
        self.simple(reg::REMOVE_CHANNELS_FOR_NODE, vec![node.into()])
            .await
    }

    pub async fn is_channel_present(&self, node: &str, path: &str) -> Result<bool, ClientError> {
        self.flag(reg::IS_CHANNEL_PRESENT, vec![node.into(), path.into()])
            .await
    }

    pub async fn get_channel(
        &self,
        node: &str,
        path: &str,
    ) -> Result<Option<ChannelInfo>, ClientError> {
        self.lookup(reg::GET_CHANNEL_INFORMATION, vec![node.into(), path.into()])
            .await
    }

    pub async fn get_channels(&self) -> Result<Vec<ChannelInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_CHANNELS, Vec::new())
            .await
    }

    pub async fn get_channels_on_node(&self, node: &str) -> Result<Vec<ChannelInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_CHANNELS_ON_NODE, vec![node.into()])
            .await
    }

    pub async fn get_channels_on_machine(
        &self,
        machine: &str,
    ) -> Result<Vec<ChannelInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_CHANNELS_ON_MACHINE, vec![machine.into()])
            .await
    }

    pub async fn channel_count(&self) -> Result<usize, ClientError> {
        self.count(reg::GET_NUMBER_OF_CHANNELS).await
    }

    pub async fn set_channel_in_use(
        &self,
        node: &str,
        path: &str,
        in_use: bool,
    ) -> Result<(), ClientError> {
        self.simple(
            reg::SET_CHANNEL_IN_USE,
            vec![node.into(), path.into(), in_use.into()],
        )
        .await
    }

    /// `None` when the channel is unknown.
    pub async fn get_channel_in_use(
        &self,
        node: &str,
        path: &str,
    ) -> Result<Option<bool>, ClientError> {
        let items = self
            .complex(reg::GET_CHANNEL_IN_USE, vec![node.into(), path.into()])
            .await?;
        match items.first().and_then(Value::as_logical) {
            Some(true) => Ok(items.get(1).and_then(Value::as_logical)),
            Some(false) => Ok(None),
            None => Err(unexpected(reg::GET_CHANNEL_IN_USE)),
        }
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    pub async fn add_connection(&self, connection: &ConnectionInfo) -> Result<(), ClientError> {
        self.simple(
            reg::ADD_CONNECTION,
            vec![
                Value::from(&connection.from_node),
                Value::from(&connection.from_path),
                Value::from(&connection.to_node),
                Value::from(&connection.to_path),
                Value::from(&connection.data_type),
                Value::Integer(connection.mode.code()),
            ],
        )
        .await
    }

    pub async fn remove_connection(
        &self,
        node: &str,
        path: &str,
        from_end: bool,
    ) -> Result<(), ClientError> {
        self.simple(
            reg::REMOVE_CONNECTION,
            vec![node.into(), path.into(), from_end.into()],
        )
        .await
    }

    pub async fn get_connection(
        &self,
        node: &str,
        path: &str,
        from_end: bool,
    ) -> Result<Option<ConnectionInfo>, ClientError> {
        self.lookup(
            reg::GET_CONNECTION_INFORMATION,
            vec![node.into(), path.into(), from_end.into()],
        )
        .await
    }

    pub async fn get_connections(&self) -> Result<Vec<ConnectionInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_CONNECTIONS, Vec::new())
            .await
    }

    pub async fn get_connections_on_node(
        &self,
        node: &str,
    ) -> Result<Vec<ConnectionInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_CONNECTIONS_ON_NODE, vec![node.into()])
            .await
    }

    pub async fn connection_count(&self) -> Result<usize, ClientError> {
        self.count(reg::GET_NUMBER_OF_CONNECTIONS).await
    }

    // ------------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------------

    pub async fn add_application(&self, application: &ApplicationInfo) -> Result<(), ClientError> {
        self.simple(
            reg::ADD_APP_TO_LIST,
            vec![
                Value::from(&application.launcher_node),
                Value::from(&application.app_name),
                Value::from(&application.app_description),
            ],
        )
        .await
    }

    pub async fn clear_applications(&self, launcher: &str) -> Result<(), ClientError> {
        self.simple(reg::CLEAR_APP_LIST_FOR_LAUNCHER, vec![launcher.into()])
            .await
    }

    pub async fn get_applications(&self) -> Result<Vec<ApplicationInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_APPLICATIONS, Vec::new())
            .await
    }

    pub async fn get_applications_on_node(
        &self,
        launcher: &str,
    ) -> Result<Vec<ApplicationInfo>, ClientError> {
        self.list(reg::GET_INFORMATION_FOR_ALL_APPLICATIONS_ON_NODE, vec![launcher.into()])
            .await
    }
}

// ============================================================================
// Node Client
// ============================================================================

/// Typed access to one node's command port.
pub struct NodeClient {
    client: CommandClient,
}

impl NodeClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Ok(Self {
            client: CommandClient::connect(addr).await?,
        })
    }

    fn single_connection(spec: CommandSpec, items: &[Value]) -> Result<Connection, ClientError> {
        items
            .first()
            .and_then(Connection::from_value)
            .ok_or_else(|| unexpected(spec))
    }

    /// Binds the input endpoint and returns where the output should send.
    pub async fn set_up_input_channel(
        &mut self,
        path: &str,
        mode: TransportType,
    ) -> Result<Connection, ClientError> {
        let spec = node_cmd::SET_UP_INPUT_CHANNEL;
        let items = self
            .client
            .call_complex(spec, vec![path.into(), Value::Integer(mode.code())])
            .await?;
        Self::single_connection(spec, &items)
    }

    /// Points the output at `peer`; returns the output's own endpoint.
    pub async fn set_up_output_channel(
        &mut self,
        path: &str,
        peer: Connection,
    ) -> Result<Connection, ClientError> {
        let spec = node_cmd::SET_UP_OUTPUT_CHANNEL;
        let items = self
            .client
            .call_complex(spec, vec![path.into(), peer.to_value()])
            .await?;
        Self::single_connection(spec, &items)
    }

    pub async fn start_channel(
        &mut self,
        path: &str,
        filter: Option<Connection>,
    ) -> Result<(), ClientError> {
        let mut arguments = vec![Value::from(path)];
        if let Some(filter) = filter {
            arguments.push(filter.to_value());
        }
        self.client
            .call_simple(node_cmd::START_CHANNEL, arguments)
            .await
    }

    pub async fn stop_channel(&mut self, path: &str) -> Result<(), ClientError> {
        self.client
            .call_simple(node_cmd::STOP_CHANNEL, vec![path.into()])
            .await
    }

    pub async fn stop_node(&mut self) -> Result<(), ClientError> {
        self.client.call_simple(node_cmd::STOP_NODE, Vec::new()).await
    }

    /// Asks a launcher node to start `app`; returns its first line of output.
    pub async fn launch_app(
        &mut self,
        app: &str,
        node_name: &str,
        arguments: &[String],
    ) -> Result<Option<String>, ClientError> {
        let items = self
            .client
            .call_complex(
                node_cmd::LAUNCH_APP,
                vec![
                    app.into(),
                    node_name.into(),
                    Value::array(arguments.iter()),
                ],
            )
            .await?;
        Ok(items.first().and_then(Value::as_str).map(str::to_string))
    }
}
