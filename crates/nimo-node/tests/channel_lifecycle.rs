//! Channel state machine driven through the public API.

use std::net::Ipv4Addr;
use std::time::Duration;

use nimo_core::{TransportModes, TransportType, Value};
use nimo_node::{Channel, ChannelError, ChannelReceiver, ChannelSender, ChannelState};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn linked_pair(mode: TransportType) -> (Channel, ChannelReceiver, Channel, ChannelSender) {
    let (mut input, receiver) = Channel::input("dst", "/in", "sample", TransportModes::ANY);
    let mut output = Channel::output("src", "/out", "sample", TransportModes::ANY);

    let target = input.set_up_input(mode, Ipv4Addr::LOCALHOST).await.unwrap();
    let source = output
        .set_up_output(target, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    input.start(Some(source)).unwrap();
    output.start(None).unwrap();

    let sender = output.sender().unwrap();
    (input, receiver, output, sender)
}

async fn expect(receiver: &mut ChannelReceiver, value: Value) {
    let delivery = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
    assert_eq!(delivery.value, value);
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (mut input, _receiver) = Channel::input("n", "/in", "t", TransportModes::ANY);
    assert_eq!(input.state(), ChannelState::Created);
    assert!(input.local().is_none());

    let local = input
        .set_up_input(TransportType::Tcp, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    assert_eq!(input.state(), ChannelState::SetUp);
    assert_eq!(input.local(), Some(local));

    input.start(None).unwrap();
    assert_eq!(input.state(), ChannelState::Started);

    input.stop();
    assert_eq!(input.state(), ChannelState::Stopped);
    assert!(input.local().is_none());
}

#[tokio::test]
async fn test_set_up_twice_is_rejected() {
    let (mut input, _receiver) = Channel::input("n", "/in", "t", TransportModes::ANY);
    input
        .set_up_input(TransportType::Udp, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    let err = input
        .set_up_input(TransportType::Udp, Ipv4Addr::LOCALHOST)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ChannelError::InvalidState {
            path: "/in".to_string(),
            operation: "set up",
            state: ChannelState::SetUp,
        }
    );
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let (_input, _receiver, mut output, _sender) = linked_pair(TransportType::Udp).await;
    assert!(matches!(
        output.start(None),
        Err(ChannelError::InvalidState {
            state: ChannelState::Started,
            ..
        })
    ));
}

#[tokio::test]
async fn test_tcp_traffic_preserves_structure() {
    let (_input, mut receiver, _output, sender) = linked_pair(TransportType::Tcp).await;

    let mut map = Value::map();
    if let Some(entries) = map.as_map_mut() {
        entries.insert(Value::from("x"), Value::Double(1.5));
    }
    let sample = Value::array([Value::from("reading"), Value::Integer(-7), map]);

    sender.send(sample.clone()).await.unwrap();
    expect(&mut receiver, sample).await;
}

#[tokio::test]
async fn test_udp_traffic_after_restart() {
    let (mut input, mut receiver, mut output, sender) = linked_pair(TransportType::Udp).await;
    sender.send(Value::Integer(1)).await.unwrap();
    expect(&mut receiver, Value::Integer(1)).await;

    input.stop();
    output.stop();

    // Same channels, fresh endpoints; the old receiver and sender carry on.
    let target = input
        .set_up_input(TransportType::Udp, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    let source = output
        .set_up_output(target, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    input.start(Some(source)).unwrap();
    output.start(None).unwrap();

    sender.send(Value::Integer(2)).await.unwrap();
    expect(&mut receiver, Value::Integer(2)).await;
}

#[tokio::test]
async fn test_drop_stops_sending() {
    let (_input, _receiver, output, sender) = linked_pair(TransportType::Tcp).await;
    drop(output);
    assert_eq!(
        sender.send(Value::Logical(true)).await,
        Err(ChannelError::NotSending {
            path: "/out".to_string()
        })
    );
}

#[tokio::test]
async fn test_tcp_output_needs_listening_input() {
    let (mut input, _receiver) = Channel::input("dst", "/in", "t", TransportModes::TCP);
    let target = input
        .set_up_input(TransportType::Tcp, Ipv4Addr::LOCALHOST)
        .await
        .unwrap();
    drop(input);

    let mut output = Channel::output("src", "/out", "t", TransportModes::TCP);
    let err = output
        .set_up_output(target, Ipv4Addr::LOCALHOST)
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Connect { .. }));
    assert_eq!(output.state(), ChannelState::Created);
}
