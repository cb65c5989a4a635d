//! nImO operator tool.
//!
//! Queries the registry, wires channels together, watches status
//! notifications, and runs demonstration and launcher nodes.
//!
//! # Usage
//!
//! ```text
//! nimo list nodes                       # everything the registry knows
//! nimo info sensor                      # one node, its channels and links
//! nimo connect sensor /out logger /in   # link an output to an input
//! nimo disconnect sensor /out
//! nimo monitor                          # print status notifications
//! nimo node sensor --output /out        # demo node sending a counter
//! nimo launcher apps --app filter=/usr/local/bin/filter
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use nimo_core::{
    ApplicationInfo, ChannelInfo, ConnectionInfo, LaunchDetails, MachineInfo, NimoConfig, NodeInfo,
    Record, ServiceType, TransportModes, TransportType, Value,
};
use nimo_node::{
    connect_channels, disconnect_channels, AppCatalogue, ChannelEnd, ChannelReceiver,
    LaunchableApp, LauncherRole, NodeContext, NodeOptions, RegistryClient, StaticLocator,
    TokioLauncher,
};
use nimo_protocol::status::MAX_STATUS_DATAGRAM;
use nimo_protocol::StatusNotification;

// ============================================================================
// CLI Arguments
// ============================================================================

/// nImO operator tool
#[derive(Parser, Debug)]
#[command(name = "nimo", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Registry command port as host:port (overrides configuration)
    #[arg(long, global = true)]
    registry: Option<SocketAddrV4>,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registry records
    List {
        #[arg(value_enum)]
        what: ListKind,
    },
    /// Show one node with its channels and connections
    Info { node: String },
    /// Connect an output channel to an input channel
    Connect {
        from_node: String,
        from_path: String,
        to_node: String,
        to_path: String,
        /// Transport to use; defaults to the preferred common one
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },
    /// Disconnect the link leaving an output channel
    Disconnect { node: String, path: String },
    /// Print status notifications as they arrive
    Monitor,
    /// Run a demonstration node
    Node {
        name: String,
        /// Input channel path (repeatable); received values are printed
        #[arg(long = "input")]
        inputs: Vec<String>,
        /// Output channel path (repeatable); a counter is sent every second
        #[arg(long = "output")]
        outputs: Vec<String>,
        /// Data type recorded for every channel
        #[arg(long, default_value = "integer")]
        data_type: String,
    },
    /// Run a launcher node
    Launcher {
        name: String,
        /// Application as NAME=EXECUTABLE (repeatable)
        #[arg(long = "app", value_parser = parse_app)]
        apps: Vec<LaunchableApp>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ListKind {
    Machines,
    Nodes,
    Channels,
    Connections,
    Apps,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Tcp,
    Udp,
}

impl From<Mode> for TransportType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Tcp => TransportType::Tcp,
            Mode::Udp => TransportType::Udp,
        }
    }
}

fn parse_app(raw: &str) -> Result<LaunchableApp, String> {
    let (name, exec_path) = raw
        .split_once('=')
        .filter(|(name, exec)| !name.is_empty() && !exec.is_empty())
        .ok_or_else(|| format!("expected NAME=EXECUTABLE, got '{raw}'"))?;
    Ok(LaunchableApp {
        name: name.to_string(),
        description: format!("runs {exec_path}"),
        exec_path: exec_path.to_string(),
        directory: String::new(),
    })
}

// ============================================================================
// Output
// ============================================================================

fn print_records<R: Record>(records: &[R], json: bool, line: impl Fn(&R) -> String) -> Result<()> {
    if json {
        let values = Value::array(records.iter().map(Record::to_value));
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for record in records {
            println!("{}", line(record));
        }
    }
    Ok(())
}

fn machine_line(m: &MachineInfo) -> String {
    format!("{:<20} {}", m.name, m.address)
}

fn node_line(n: &NodeInfo) -> String {
    format!(
        "{:<20} {:<16} {:<10} {}",
        n.name, n.machine, n.service_type, n.connection
    )
}

fn channel_line(c: &ChannelInfo) -> String {
    format!(
        "{:<20} {:<16} {:<6} {:<12} {:<8} {}",
        c.node,
        c.path,
        if c.is_output { "output" } else { "input" },
        c.data_type,
        c.modes,
        if c.in_use { "in use" } else { "free" }
    )
}

fn connection_line(c: &ConnectionInfo) -> String {
    format!(
        "{}{} -> {}{}  {} {}",
        c.from_node, c.from_path, c.to_node, c.to_path, c.data_type, c.mode
    )
}

fn app_line(a: &ApplicationInfo) -> String {
    format!("{:<20} {:<16} {}", a.launcher_node, a.app_name, a.app_description)
}

// ============================================================================
// Commands
// ============================================================================

async fn registry_client(addr: SocketAddrV4) -> Result<RegistryClient> {
    RegistryClient::connect(SocketAddr::V4(addr))
        .await
        .with_context(|| format!("Registry not reachable at {addr}"))
}

async fn list(registry: &RegistryClient, what: ListKind, json: bool) -> Result<()> {
    match what {
        ListKind::Machines => print_records(&registry.get_machines().await?, json, machine_line),
        ListKind::Nodes => print_records(&registry.get_nodes().await?, json, node_line),
        ListKind::Channels => print_records(&registry.get_channels().await?, json, channel_line),
        ListKind::Connections => {
            print_records(&registry.get_connections().await?, json, connection_line)
        }
        ListKind::Apps => print_records(&registry.get_applications().await?, json, app_line),
    }
}

async fn info_node(registry: &RegistryClient, name: &str, json: bool) -> Result<()> {
    let Some(node) = registry.get_node(name).await? else {
        bail!("Node '{name}' not found");
    };
    let launch = registry.get_launch_details(name).await?.unwrap_or_default();
    let channels = registry.get_channels_on_node(name).await?;
    let connections = registry.get_connections_on_node(name).await?;

    if json {
        let mut map = Value::map();
        if let Some(entries) = map.as_map_mut() {
            entries.insert("node".into(), node.to_value());
            entries.insert("launch".into(), launch.to_value());
            entries.insert("channels".into(), Value::array(channels.iter().map(Record::to_value)));
            entries.insert(
                "connections".into(),
                Value::array(connections.iter().map(Record::to_value)),
            );
        }
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    println!("{}", node_line(&node));
    if !launch.exec_path.is_empty() {
        println!("  exec: {} (in {})", launch.exec_path, launch.launch_directory);
        println!("  command line: {}", launch.command_line);
    }
    println!("Channels:");
    for channel in &channels {
        println!("  {}", channel_line(channel));
    }
    println!("Connections:");
    for connection in &connections {
        println!("  {}", connection_line(connection));
    }
    Ok(())
}

async fn monitor(group: SocketAddrV4, cancel: CancellationToken) -> Result<()> {
    let socket = if group.ip().is_multicast() {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()))
            .await
            .with_context(|| format!("Failed to bind status port {}", group.port()))?;
        socket
            .join_multicast_v4(*group.ip(), Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("Failed to join {}", group.ip()))?;
        socket
    } else {
        UdpSocket::bind(group)
            .await
            .with_context(|| format!("Failed to bind {group}"))?
    };
    info!(group = %group, "Listening for status notifications");

    let mut buf = vec![0u8; MAX_STATUS_DATAGRAM];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => result.context("Status receive failed")?,
        };
        let text = String::from_utf8_lossy(buf.get(..len).unwrap_or_default());
        match StatusNotification::parse(&text) {
            Some(notification) => println!("{from}: {notification}"),
            None => debug!(from = %from, "Ignoring unrecognised status datagram"),
        }
    }
    Ok(())
}

fn node_options(name: &str, service_type: ServiceType, config: &NimoConfig) -> NodeOptions {
    let mut options = NodeOptions::new(name, service_type);
    options.address = config.node.address;
    options.discovery_timeout = config.discovery_timeout();
    options.launch = LaunchDetails {
        exec_path: std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        launch_directory: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
    };
    options
}

async fn print_deliveries(path: String, mut receiver: ChannelReceiver) {
    while let Some(delivery) = receiver.recv().await {
        println!("{path} <- {} (from {})", delivery.value, delivery.from);
    }
}

async fn run_node(
    options: NodeOptions,
    registry: SocketAddrV4,
    inputs: Vec<String>,
    outputs: Vec<String>,
    data_type: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let node = NodeContext::start(options, &StaticLocator::new(registry), cancel).await?;

    for path in inputs {
        let receiver = node
            .add_input_channel(&path, data_type, TransportModes::ANY)
            .await?;
        tokio::spawn(print_deliveries(path, receiver));
    }
    let mut senders = Vec::with_capacity(outputs.len());
    for path in &outputs {
        senders.push(
            node.add_output_channel(path, data_type, TransportModes::ANY)
                .await?,
        );
    }
    println!("Node '{}' listening on {}", node.name(), node.command_connection());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut counter = 0i64;
    loop {
        tokio::select! {
            _ = node.stopped() => break,
            _ = ticker.tick() => {
                for sender in &senders {
                    if let Err(e) = sender.send(Value::Integer(counter)).await {
                        debug!(channel = %sender.path(), error = %e, "Not sent");
                    }
                }
                counter = counter.wrapping_add(1);
            }
        }
    }

    node.shutdown().await;
    Ok(())
}

async fn run_launcher(
    mut options: NodeOptions,
    registry: SocketAddrV4,
    apps: Vec<LaunchableApp>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut catalogue = AppCatalogue::new();
    for app in apps {
        catalogue.insert(app);
    }
    options.launcher = Some(LauncherRole {
        catalogue,
        launcher: Arc::new(TokioLauncher::new()),
    });

    let node = NodeContext::start(options, &StaticLocator::new(registry), cancel).await?;
    println!("Launcher '{}' listening on {}", node.name(), node.command_connection());
    node.stopped().await;
    node.shutdown().await;
    Ok(())
}

fn spawn_signal_task(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Error waiting for Ctrl+C");
        }
        info!("Interrupted");
        cancel.cancel();
    });
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("nimo=info".parse()?)
                .add_directive("nimo_node=info".parse()?)
                .add_directive("nimo_protocol=info".parse()?)
                .add_directive("nimo_core=info".parse()?),
        )
        .init();

    let config = NimoConfig::load().context("Failed to load configuration")?;
    let registry_addr = args.registry.unwrap_or_else(|| config.registry_addr());

    let cancel = CancellationToken::new();

    match args.command {
        Command::List { what } => {
            let registry = registry_client(registry_addr).await?;
            list(&registry, what, args.json).await
        }
        Command::Info { node } => {
            let registry = registry_client(registry_addr).await?;
            info_node(&registry, &node, args.json).await
        }
        Command::Connect {
            from_node,
            from_path,
            to_node,
            to_path,
            mode,
        } => {
            let registry = registry_client(registry_addr).await?;
            let connection = connect_channels(
                &registry,
                &ChannelEnd::new(from_node, from_path),
                &ChannelEnd::new(to_node, to_path),
                mode.map(TransportType::from),
            )
            .await?;
            println!("Connected {}", connection_line(&connection));
            Ok(())
        }
        Command::Disconnect { node, path } => {
            let registry = registry_client(registry_addr).await?;
            let connection = disconnect_channels(&registry, &ChannelEnd::new(node, path)).await?;
            println!("Disconnected {}", connection_line(&connection));
            Ok(())
        }
        Command::Monitor => {
            spawn_signal_task(cancel.clone());
            monitor(config.status_group(), cancel).await
        }
        Command::Node {
            name,
            inputs,
            outputs,
            data_type,
        } => {
            spawn_signal_task(cancel.clone());
            let options = node_options(&name, ServiceType::Generic, &config);
            run_node(options, registry_addr, inputs, outputs, &data_type, cancel).await
        }
        Command::Launcher { name, apps } => {
            spawn_signal_task(cancel.clone());
            let options = node_options(&name, ServiceType::Launcher, &config);
            run_launcher(options, registry_addr, apps, cancel).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app() {
        let app = parse_app("filter=/usr/bin/filter").unwrap();
        assert_eq!(app.name, "filter");
        assert_eq!(app.exec_path, "/usr/bin/filter");
        assert!(parse_app("filter").is_err());
        assert!(parse_app("=x").is_err());
    }

    #[test]
    fn test_cli_parses_connect() {
        let args = Args::try_parse_from([
            "nimo", "connect", "a", "/out", "b", "/in", "--mode", "udp",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Connect {
                mode: Some(Mode::Udp),
                ..
            }
        ));
    }
}
