//! Integration tests for the registry actor.
//!
//! These drive `spawn_registry()` through its `RegistryHandle`, the same way
//! command handlers do.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free policy applies
//! to production code.

use std::net::Ipv4Addr;
use std::sync::Arc;

use nimo_core::{
    ApplicationInfo, Connection, ConnectionInfo, LaunchDetails, ServiceType, TransportModes,
    TransportType,
};
use nimo_registry::registry::MAX_NODES;
use nimo_registry::{
    spawn_registry, ApplicationFilter, ChannelFilter, ChannelSpec, ConnectionFilter, NodeFilter,
    NodeRegistration, RegistryError, RegistryEvent, RegistryHandle,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn registration(name: &str, host: u8) -> NodeRegistration {
    NodeRegistration {
        name: name.to_string(),
        launch: LaunchDetails {
            exec_path: format!("/usr/bin/{name}"),
            launch_directory: "/tmp".to_string(),
            command_line: String::new(),
        },
        service_type: ServiceType::Filter,
        connection: Connection::new(Ipv4Addr::new(10, 0, 0, host), 4000, TransportType::Tcp),
    }
}

fn channel(node: &str, path: &str, is_output: bool) -> ChannelSpec {
    ChannelSpec {
        node: node.to_string(),
        path: path.to_string(),
        is_output,
        data_type: "frame".to_string(),
        modes: TransportModes::ANY,
    }
}

fn link(from: (&str, &str), to: (&str, &str), mode: TransportType) -> ConnectionInfo {
    ConnectionInfo {
        from_node: from.0.to_string(),
        from_path: from.1.to_string(),
        to_node: to.0.to_string(),
        to_path: to.1.to_string(),
        data_type: "frame".to_string(),
        mode,
    }
}

/// A and B, with A/out1 -> B/in1 connected.
async fn connected_pair() -> RegistryHandle {
    let handle = spawn_registry();
    handle.add_node(registration("A", 1)).await.unwrap();
    handle.add_node(registration("B", 2)).await.unwrap();
    handle.add_channel(channel("A", "/out1", true)).await.unwrap();
    handle.add_channel(channel("B", "/in1", false)).await.unwrap();
    handle
        .add_connection(link(("A", "/out1"), ("B", "/in1"), TransportType::Tcp))
        .await
        .unwrap();
    handle
}

// ============================================================================
// Nodes
// ============================================================================

#[tokio::test]
async fn test_add_node_creates_machine() {
    let handle = spawn_registry();
    let node = handle.add_node(registration("camera", 7)).await.unwrap();

    assert_eq!(node.machine, "10.0.0.7");
    let machine = handle.get_machine("10.0.0.7").await.expect("machine created");
    assert_eq!(machine.address, Ipv4Addr::new(10, 0, 0, 7));
    assert_eq!(
        handle.get_launch_details("camera").await.unwrap().exec_path,
        "/usr/bin/camera"
    );
}

#[tokio::test]
async fn test_node_attaches_to_named_machine() {
    let handle = spawn_registry();
    handle
        .add_machine("lab-host", Ipv4Addr::new(10, 0, 0, 3))
        .await
        .unwrap();
    let node = handle.add_node(registration("n", 3)).await.unwrap();
    assert_eq!(node.machine, "lab-host");
    assert_eq!(handle.get_machines().await.len(), 1);
    assert_eq!(
        handle
            .get_nodes(NodeFilter::OnMachine("lab-host".to_string()))
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn test_duplicate_node_leaves_count_unchanged() {
    let handle = spawn_registry();
    handle.add_node(registration("A", 1)).await.unwrap();

    let err = handle.add_node(registration("A", 2)).await.unwrap_err();
    assert_eq!(err, RegistryError::NodeAlreadyExists("A".to_string()));
    assert_eq!(handle.get_counts().await.nodes, 1);
    // The rejected registration must not leave a machine behind.
    assert_eq!(handle.get_counts().await.machines, 1);
}

#[tokio::test]
async fn test_remove_unknown_node() {
    let handle = spawn_registry();
    assert_eq!(
        handle.remove_node("ghost").await,
        Err(RegistryError::NodeNotFound("ghost".to_string()))
    );
}

// ============================================================================
// Cascades
// ============================================================================

#[tokio::test]
async fn test_remove_node_cascades_and_frees_peer() {
    let handle = connected_pair().await;
    handle.remove_node("A").await.unwrap();

    assert!(handle.get_channel("A", "/out1").await.is_none());
    assert!(handle
        .get_connections(ConnectionFilter::OnNode("B".to_string()))
        .await
        .is_empty());

    let input = handle.get_channel("B", "/in1").await.expect("B/in1 survives");
    assert!(!input.in_use);

    // Machines outlive their nodes.
    assert!(handle.get_machine("10.0.0.1").await.is_some());
}

#[tokio::test]
async fn test_remove_channel_cascades_connection() {
    let handle = connected_pair().await;
    handle.remove_channel("B", "/in1").await.unwrap();

    assert_eq!(handle.get_counts().await.connections, 0);
    assert!(!handle.get_channel("A", "/out1").await.unwrap().in_use);
}

#[tokio::test]
async fn test_remove_connection_from_either_end() {
    let handle = connected_pair().await;
    let removed = handle.remove_connection("B", "/in1", false).await.unwrap();
    assert_eq!(removed.from_node, "A");
    assert!(!handle.get_channel("A", "/out1").await.unwrap().in_use);
    assert!(!handle.get_channel("B", "/in1").await.unwrap().in_use);

    handle
        .add_connection(link(("A", "/out1"), ("B", "/in1"), TransportType::Udp))
        .await
        .unwrap();
    assert!(handle.get_connection("A", "/out1", true).await.is_some());
    handle.remove_connection("A", "/out1", true).await.unwrap();
    assert!(handle.get_connection("A", "/out1", true).await.is_none());
}

#[tokio::test]
async fn test_remove_channels_for_node() {
    let handle = connected_pair().await;
    handle.add_channel(channel("A", "/out2", true)).await.unwrap();

    assert_eq!(handle.remove_channels_for_node("A").await, Ok(2));
    assert!(handle
        .get_channels(ChannelFilter::OnNode("A".to_string()))
        .await
        .is_empty());
    assert!(handle.get_node("A").await.is_some());
}

// ============================================================================
// Connection rules
// ============================================================================

#[tokio::test]
async fn test_connection_rejects_busy_endpoint() {
    let handle = connected_pair().await;
    handle.add_channel(channel("B", "/in2", false)).await.unwrap();

    let err = handle
        .add_connection(link(("A", "/out1"), ("B", "/in2"), TransportType::Tcp))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ChannelInUse { .. }));
    assert!(!handle.get_channel("B", "/in2").await.unwrap().in_use);
}

#[tokio::test]
async fn test_connection_requires_allowed_mode() {
    let handle = spawn_registry();
    handle.add_node(registration("A", 1)).await.unwrap();
    let mut out = channel("A", "/out", true);
    out.modes = TransportModes::TCP;
    handle.add_channel(out).await.unwrap();
    handle.add_channel(channel("A", "/in", false)).await.unwrap();

    let err = handle
        .add_connection(link(("A", "/out"), ("A", "/in"), TransportType::Udp))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::ModeNotAllowed {
            mode: TransportType::Udp
        }
    );
    assert_eq!(handle.get_counts().await.connections, 0);
}

#[tokio::test]
async fn test_set_channel_in_use_refuses_release_while_connected() {
    let handle = connected_pair().await;
    let err = handle.set_channel_in_use("A", "/out1", false).await.unwrap_err();
    assert!(matches!(err, RegistryError::ChannelConnected { .. }));

    handle.add_channel(channel("A", "/spare", true)).await.unwrap();
    handle.set_channel_in_use("A", "/spare", true).await.unwrap();
    assert!(handle.get_channel("A", "/spare").await.unwrap().in_use);
}

// ============================================================================
// Applications
// ============================================================================

#[tokio::test]
async fn test_application_list_lifecycle() {
    let handle = spawn_registry();
    handle.add_node(registration("launcher", 1)).await.unwrap();

    let app = ApplicationInfo {
        launcher_node: "launcher".to_string(),
        app_name: "viewer".to_string(),
        app_description: "Shows frames".to_string(),
    };
    handle.add_application(app.clone()).await.unwrap();
    assert!(matches!(
        handle.add_application(app.clone()).await,
        Err(RegistryError::ApplicationAlreadyExists { .. })
    ));
    assert_eq!(
        handle
            .get_applications(ApplicationFilter::OnLauncher("launcher".to_string()))
            .await,
        vec![app]
    );

    assert_eq!(handle.clear_applications("launcher").await, Ok(1));
    assert!(handle.get_applications(ApplicationFilter::All).await.is_empty());
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_events_follow_cascade_order() {
    let handle = connected_pair().await;
    let mut events = handle.subscribe();

    handle.remove_node("A").await.unwrap();

    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::ConnectionRemoved(c) if c.to_node == "B"
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::ChannelRemoved { node, path } if node == "A" && path == "/out1"
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::NodeRemoved { name } if name == "A"
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_names_all_succeed() {
    let handle = spawn_registry();
    let n = 64;

    let tasks: Vec<_> = (0..n)
        .map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.add_node(registration(&format!("node{i}"), 1)).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(handle.get_counts().await.nodes, n);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_name_exactly_one_wins() {
    let handle = Arc::new(spawn_registry());
    let n = 32;

    let tasks: Vec<_> = (0..n)
        .map(|_| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.add_node(registration("contested", 1)).await })
        })
        .collect();

    let mut successes = 0;
    let mut failures = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(RegistryError::NodeAlreadyExists(_)) => failures += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(failures, n - 1);
    assert_eq!(handle.get_counts().await.nodes, 1);
}

#[tokio::test]
async fn test_registry_capacity() {
    let handle = spawn_registry();
    for i in 0..MAX_NODES {
        handle
            .add_node(registration(&format!("n{i}"), 1))
            .await
            .unwrap();
    }
    assert_eq!(
        handle.add_node(registration("overflow", 1)).await,
        Err(RegistryError::RegistryFull { max: MAX_NODES })
    );
}
