//! Nodes against an in-process registry on a real TCP port.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimo_core::{ServiceType, TransportModes, TransportType, Value};
use nimo_node::{
    connect_channels, disconnect_channels, AppCatalogue, ChannelEnd, ChannelError, ConnectError,
    DiscoveryError, LaunchError, LaunchOutcome, LaunchRequest, LaunchableApp, LauncherRole,
    NodeClient, NodeContext, NodeError, NodeOptions, ProcessLauncher, RegistryClient,
    StaticLocator,
};
use nimo_registry::RegistryService;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

struct TestRegistry {
    addr: SocketAddrV4,
    cancel: CancellationToken,
}

impl TestRegistry {
    async fn spawn() -> Self {
        let service = RegistryService::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let addr = match service.local_addr() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => panic!("registry bound to IPv6"),
        };
        let cancel = CancellationToken::new();
        tokio::spawn(service.run(cancel.clone()));
        Self { addr, cancel }
    }

    fn locator(&self) -> StaticLocator {
        StaticLocator::new(self.addr)
    }

    async fn client(&self) -> RegistryClient {
        RegistryClient::connect(SocketAddr::V4(self.addr))
            .await
            .unwrap()
    }

    async fn start_node(&self, options: NodeOptions) -> NodeContext {
        NodeContext::start(options, &self.locator(), CancellationToken::new())
            .await
            .unwrap()
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn options(name: &str) -> NodeOptions {
    NodeOptions::new(name, ServiceType::Generic)
}

struct EchoLauncher;

#[async_trait]
impl ProcessLauncher for EchoLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, LaunchError> {
        Ok(LaunchOutcome {
            pid: None,
            first_line: Some(format!("{} {}", request.program, request.arguments.join(" "))),
        })
    }
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_node_registers_and_deregisters() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;

    let node = registry.start_node(options("sensor")).await;
    let _sender = node
        .add_output_channel("/out", "sample", TransportModes::ANY)
        .await
        .unwrap();

    let info = operator.get_node("sensor").await.unwrap().unwrap();
    assert_eq!(info.connection, node.command_connection());
    assert_eq!(info.machine, "127.0.0.1");
    let channel = operator.get_channel("sensor", "/out").await.unwrap().unwrap();
    assert!(channel.is_output);
    assert_eq!(channel.data_type, "sample");

    node.shutdown().await;
    assert!(!operator.is_node_present("sensor").await.unwrap());
    assert_eq!(operator.channel_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_node_name_is_refused() {
    let registry = TestRegistry::spawn().await;
    let _first = registry.start_node(options("dup")).await;

    let err = NodeContext::start(options("dup"), &registry.locator(), CancellationToken::new())
        .await
        .err()
        .unwrap();
    match err {
        NodeError::Client(e) => assert_eq!(e.reason(), Some("Node 'dup' already registered")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_duplicate_channel_path_is_refused() {
    let registry = TestRegistry::spawn().await;
    let node = registry.start_node(options("n")).await;
    node.add_input_channel("/x", "t", TransportModes::ANY)
        .await
        .unwrap();
    let err = node
        .add_output_channel("/x", "t", TransportModes::ANY)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        NodeError::Channel(ChannelError::AlreadyExists { .. })
    ));
}

#[tokio::test]
async fn test_discovery_gives_up() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => panic!("bound to IPv6"),
    };
    drop(listener);

    let mut options = options("lonely");
    options.discovery_timeout = Duration::from_millis(300);
    let err = NodeContext::start(options, &StaticLocator::new(addr), CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        NodeError::Discovery(DiscoveryError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_stop_node_command_ends_node() {
    let registry = TestRegistry::spawn().await;
    let node = registry.start_node(options("stoppable")).await;

    let port = SocketAddr::V4(node.command_connection().socket_addr());
    let mut client = NodeClient::connect(port).await.unwrap();
    client.stop_node().await.unwrap();

    timeout(WAIT, node.stopped()).await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn test_refused_application_deregisters_node() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;

    let mut catalogue = AppCatalogue::new();
    catalogue.insert(LaunchableApp {
        name: String::new(),
        description: "nameless".to_string(),
        exec_path: "/bin/true".to_string(),
        directory: String::new(),
    });
    let mut options = NodeOptions::new("half", ServiceType::Launcher);
    options.launcher = Some(LauncherRole {
        catalogue,
        launcher: Arc::new(EchoLauncher),
    });

    let err = NodeContext::start(options, &registry.locator(), CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, NodeError::Client(_)));
    assert!(!operator.is_node_present("half").await.unwrap());
    assert!(operator.get_applications().await.unwrap().is_empty());
}

// ============================================================================
// Connect / disconnect
// ============================================================================

async fn connect_round_trip(mode: Option<TransportType>) {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;

    let source = registry.start_node(options("src")).await;
    let sink = registry.start_node(options("dst")).await;
    let sender = source
        .add_output_channel("/out", "sample", TransportModes::ANY)
        .await
        .unwrap();
    let mut receiver = sink
        .add_input_channel("/in", "sample", TransportModes::ANY)
        .await
        .unwrap();

    let from = ChannelEnd::new("src", "/out");
    let to = ChannelEnd::new("dst", "/in");
    let connection = connect_channels(&operator, &from, &to, mode).await.unwrap();
    assert_eq!(connection.data_type, "sample");
    if let Some(mode) = mode {
        assert_eq!(connection.mode, mode);
    }

    assert_eq!(operator.connection_count().await.unwrap(), 1);
    assert_eq!(
        operator.get_channel_in_use("dst", "/in").await.unwrap(),
        Some(true)
    );

    for i in 0..3i64 {
        sender.send(Value::Integer(i)).await.unwrap();
        let delivery = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
        assert_eq!(delivery.value, Value::Integer(i));
    }

    let removed = disconnect_channels(&operator, &from).await.unwrap();
    assert_eq!(removed, connection);
    assert_eq!(operator.connection_count().await.unwrap(), 0);
    assert_eq!(
        operator.get_channel_in_use("src", "/out").await.unwrap(),
        Some(false)
    );
    assert!(matches!(
        sender.send(Value::Integer(9)).await,
        Err(ChannelError::NotSending { .. })
    ));
}

#[tokio::test]
async fn test_connect_and_disconnect_tcp() {
    connect_round_trip(Some(TransportType::Tcp)).await;
}

#[tokio::test]
async fn test_connect_and_disconnect_udp() {
    connect_round_trip(Some(TransportType::Udp)).await;
}

#[tokio::test]
async fn test_connect_picks_common_mode() {
    connect_round_trip(None).await;
}

#[tokio::test]
async fn test_connect_rejects_wrong_direction() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;
    let node = registry.start_node(options("n")).await;
    node.add_input_channel("/a", "t", TransportModes::ANY)
        .await
        .unwrap();
    node.add_input_channel("/b", "t", TransportModes::ANY)
        .await
        .unwrap();

    let err = connect_channels(
        &operator,
        &ChannelEnd::new("n", "/a"),
        &ChannelEnd::new("n", "/b"),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::WrongDirection {
            expected: "output",
            ..
        }
    ));
    assert_eq!(operator.connection_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_connect_refused_by_registry_stops_channels() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;
    let source = registry.start_node(options("src")).await;
    let sink = registry.start_node(options("dst")).await;
    let sender = source
        .add_output_channel("/out", "a", TransportModes::ANY)
        .await
        .unwrap();
    sink.add_input_channel("/in", "b", TransportModes::ANY)
        .await
        .unwrap();

    // Data types differ, so addConnection fails after both ends are live.
    let err = connect_channels(
        &operator,
        &ChannelEnd::new("src", "/out"),
        &ChannelEnd::new("dst", "/in"),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ConnectError::Client(_)));
    assert!(matches!(
        sender.send(Value::Integer(1)).await,
        Err(ChannelError::NotSending { .. })
    ));
}

#[tokio::test]
async fn test_connect_leaves_existing_link_alone() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;
    let source = registry.start_node(options("a")).await;
    let first = registry.start_node(options("b")).await;
    let second = registry.start_node(options("c")).await;
    let sender = source
        .add_output_channel("/out", "sample", TransportModes::ANY)
        .await
        .unwrap();
    let mut receiver = first
        .add_input_channel("/in", "sample", TransportModes::ANY)
        .await
        .unwrap();
    second
        .add_input_channel("/in", "sample", TransportModes::ANY)
        .await
        .unwrap();

    let out = ChannelEnd::new("a", "/out");
    connect_channels(&operator, &out, &ChannelEnd::new("b", "/in"), None)
        .await
        .unwrap();
    sender.send(Value::Integer(1)).await.unwrap();
    let delivery = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
    assert_eq!(delivery.value, Value::Integer(1));

    let err = connect_channels(&operator, &out, &ChannelEnd::new("c", "/in"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::ChannelInUse { ref node, .. } if node == "a"
    ));

    // The first link still carries traffic and is still recorded.
    sender.send(Value::Integer(2)).await.unwrap();
    let delivery = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
    assert_eq!(delivery.value, Value::Integer(2));
    assert_eq!(operator.connection_count().await.unwrap(), 1);
    assert_eq!(
        operator.get_channel_in_use("c", "/in").await.unwrap(),
        Some(false)
    );
}

#[tokio::test]
async fn test_connect_refuses_connected_input() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;
    let first = registry.start_node(options("a")).await;
    let second = registry.start_node(options("b")).await;
    let sink = registry.start_node(options("c")).await;
    let sender = first
        .add_output_channel("/out", "sample", TransportModes::ANY)
        .await
        .unwrap();
    let other = second
        .add_output_channel("/out", "sample", TransportModes::ANY)
        .await
        .unwrap();
    let mut receiver = sink
        .add_input_channel("/in", "sample", TransportModes::ANY)
        .await
        .unwrap();

    let input = ChannelEnd::new("c", "/in");
    connect_channels(&operator, &ChannelEnd::new("a", "/out"), &input, None)
        .await
        .unwrap();
    let err = connect_channels(&operator, &ChannelEnd::new("b", "/out"), &input, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::ChannelInUse { ref node, .. } if node == "c"
    ));
    assert!(matches!(
        other.send(Value::Integer(0)).await,
        Err(ChannelError::NotSending { .. })
    ));

    sender.send(Value::Integer(7)).await.unwrap();
    let delivery = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
    assert_eq!(delivery.value, Value::Integer(7));
}

#[tokio::test]
async fn test_disconnect_without_connection() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;
    let err = disconnect_channels(&operator, &ChannelEnd::new("x", "/y"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::NotConnected { .. }));
}

// ============================================================================
// Launcher
// ============================================================================

#[tokio::test]
async fn test_launcher_registers_and_launches_apps() {
    let registry = TestRegistry::spawn().await;
    let operator = registry.client().await;

    let mut catalogue = AppCatalogue::new();
    catalogue.insert(LaunchableApp {
        name: "filter".to_string(),
        description: "passes samples through".to_string(),
        exec_path: "/opt/nimo/filter".to_string(),
        directory: String::new(),
    });
    let mut options = NodeOptions::new("launcher", ServiceType::Launcher);
    options.launcher = Some(LauncherRole {
        catalogue,
        launcher: Arc::new(EchoLauncher),
    });
    let node = registry.start_node(options).await;

    let apps = operator.get_applications_on_node("launcher").await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].app_name, "filter");
    assert_eq!(apps[0].app_description, "passes samples through");

    let port = SocketAddr::V4(node.command_connection().socket_addr());
    let mut client = NodeClient::connect(port).await.unwrap();
    let line = client
        .launch_app("filter", "f1", &["--rate".to_string(), "10".to_string()])
        .await
        .unwrap();
    assert_eq!(line.as_deref(), Some("/opt/nimo/filter f1 --rate 10"));

    node.shutdown().await;
    assert!(operator.get_applications().await.unwrap().is_empty());
}
