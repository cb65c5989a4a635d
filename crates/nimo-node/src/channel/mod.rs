//! Channels: named, directional, typed data endpoints owned by a node.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──set_up──▶ SetUp ──start──▶ Started ──stop──▶ Stopped
//!    │                  │                                  │
//!    └──────stop────────┴──────────────▶ Stopped ◀──stop───┘
//!                                           │
//!                                           └──set_up──▶ SetUp
//! ```
//!
//! `stop` is idempotent and valid in every state; `Drop` calls it, so a
//! channel never leaks its sockets or pump task.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

mod transport;

pub use transport::{Delivery, MAX_DATAGRAM};

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nimo_core::{ChannelInfo, Connection, TransportModes, TransportType, Value};

use crate::error::ChannelError;
use transport::Endpoint;

/// Buffer between a pump task and the channel's user.
const CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    Input,
    Output,
}

impl ChannelDirection {
    pub fn is_output(self) -> bool {
        self == Self::Output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    SetUp,
    Started,
    Stopped,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::SetUp => "set up",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

type Outlet = Arc<Mutex<Option<mpsc::Sender<Value>>>>;

/// Cloneable sending side of an output channel.
///
/// Sends fail with `NotSending` unless the channel is started.
#[derive(Clone, Debug)]
pub struct ChannelSender {
    path: String,
    outlet: Outlet,
}

impl ChannelSender {
    pub async fn send(&self, value: Value) -> Result<(), ChannelError> {
        let sender = self
            .outlet
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let not_sending = || ChannelError::NotSending {
            path: self.path.clone(),
        };
        sender
            .ok_or_else(not_sending)?
            .send(value)
            .await
            .map_err(|_| not_sending())
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Receiving side of an input channel; survives stop and restart.
pub type ChannelReceiver = mpsc::Receiver<Delivery>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A socket opened for a channel but not yet installed in it.
///
/// Opening can block on a TCP connect, so it happens before the channel
/// is borrowed.
#[derive(Debug)]
pub struct PreparedEndpoint {
    endpoint: Endpoint,
    local: Connection,
    peer: Option<Connection>,
}

impl PreparedEndpoint {
    /// Binds an input endpoint on an ephemeral port of `ip`.
    pub async fn input(mode: TransportType, ip: Ipv4Addr) -> Result<Self, ChannelError> {
        let (endpoint, local) = transport::bind_input(mode, ip).await?;
        Ok(Self {
            endpoint,
            local,
            peer: None,
        })
    }

    /// Opens an output endpoint from `ip` toward `peer`.
    pub async fn output(peer: Connection, ip: Ipv4Addr) -> Result<Self, ChannelError> {
        let (endpoint, local) = transport::connect_output(peer, ip).await?;
        Ok(Self {
            endpoint,
            local,
            peer: Some(peer),
        })
    }

    pub fn local(&self) -> Connection {
        self.local
    }
}

/// One channel and its transport state.
pub struct Channel {
    node: String,
    path: String,
    direction: ChannelDirection,
    data_type: String,
    modes: TransportModes,
    state: ChannelState,

    /// Our own endpoint, once set up.
    local: Option<Connection>,

    /// The other end, for outputs.
    peer: Option<Connection>,

    pending: Option<Endpoint>,

    /// Inputs only.
    deliveries: Option<mpsc::Sender<Delivery>>,

    /// Outputs only.
    outlet: Outlet,

    running: Option<Running>,
}

impl Channel {
    fn new(
        node: &str,
        path: &str,
        direction: ChannelDirection,
        data_type: &str,
        modes: TransportModes,
    ) -> Self {
        Self {
            node: node.to_string(),
            path: path.to_string(),
            direction,
            data_type: data_type.to_string(),
            modes,
            state: ChannelState::Created,
            local: None,
            peer: None,
            pending: None,
            deliveries: None,
            outlet: Arc::new(Mutex::new(None)),
            running: None,
        }
    }

    /// An input channel plus the receiver its traffic arrives on.
    pub fn input(
        node: &str,
        path: &str,
        data_type: &str,
        modes: TransportModes,
    ) -> (Self, ChannelReceiver) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let mut channel = Self::new(node, path, ChannelDirection::Input, data_type, modes);
        channel.deliveries = Some(tx);
        (channel, rx)
    }

    pub fn output(node: &str, path: &str, data_type: &str, modes: TransportModes) -> Self {
        Self::new(node, path, ChannelDirection::Output, data_type, modes)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn modes(&self) -> TransportModes {
        self.modes
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn local(&self) -> Option<Connection> {
        self.local
    }

    pub fn peer(&self) -> Option<Connection> {
        self.peer
    }

    /// The record the registry keeps for this channel.
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            node: self.node.clone(),
            path: self.path.clone(),
            is_output: self.direction.is_output(),
            data_type: self.data_type.clone(),
            modes: self.modes,
            in_use: false,
        }
    }

    /// A sender handle for an output channel.
    pub fn sender(&self) -> Result<ChannelSender, ChannelError> {
        self.expect_direction(ChannelDirection::Output)?;
        Ok(ChannelSender {
            path: self.path.clone(),
            outlet: Arc::clone(&self.outlet),
        })
    }

    fn expect_direction(&self, expected: ChannelDirection) -> Result<(), ChannelError> {
        if self.direction == expected {
            return Ok(());
        }
        Err(ChannelError::WrongDirection {
            path: self.path.clone(),
            expected: match expected {
                ChannelDirection::Input => "input",
                ChannelDirection::Output => "output",
            },
        })
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[ChannelState],
    ) -> Result<(), ChannelError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(ChannelError::InvalidState {
            path: self.path.clone(),
            operation,
            state: self.state,
        })
    }

    fn check_mode(&self, mode: TransportType) -> Result<(), ChannelError> {
        if self.modes.contains(mode) {
            return Ok(());
        }
        Err(ChannelError::ModeNotAllowed {
            path: self.path.clone(),
            mode,
        })
    }

    // ------------------------------------------------------------------------
    // Set-up
    // ------------------------------------------------------------------------

    /// Checks that an input set-up in `mode` may proceed.
    pub fn check_input_set_up(&self, mode: TransportType) -> Result<(), ChannelError> {
        self.expect_direction(ChannelDirection::Input)?;
        self.expect_state("set up", &[ChannelState::Created, ChannelState::Stopped])?;
        self.check_mode(mode)
    }

    /// Checks that an output set-up toward `peer` may proceed.
    pub fn check_output_set_up(&self, peer: Connection) -> Result<(), ChannelError> {
        self.expect_direction(ChannelDirection::Output)?;
        self.expect_state("set up", &[ChannelState::Created, ChannelState::Stopped])?;
        self.check_mode(peer.transport)
    }

    /// Takes over an endpoint opened by [`PreparedEndpoint`].
    ///
    /// The checks are repeated, since the channel may have moved on while
    /// the endpoint was being opened; a refused endpoint is closed.
    pub fn install(&mut self, prepared: PreparedEndpoint) -> Result<Connection, ChannelError> {
        let local = prepared.local;
        match prepared.peer {
            Some(peer) => self.check_output_set_up(peer)?,
            None => self.check_input_set_up(local.transport)?,
        }
        self.pending = Some(prepared.endpoint);
        self.local = Some(local);
        self.peer = prepared.peer;
        self.state = ChannelState::SetUp;
        debug!(
            channel = %self.path,
            local = %local,
            peer = ?prepared.peer,
            "Channel set up"
        );
        Ok(local)
    }

    /// Binds an input endpoint on `ip` and returns it for the output side.
    ///
    /// On failure the channel keeps its prior state.
    pub async fn set_up_input(
        &mut self,
        mode: TransportType,
        ip: Ipv4Addr,
    ) -> Result<Connection, ChannelError> {
        self.check_input_set_up(mode)?;
        let prepared = PreparedEndpoint::input(mode, ip).await?;
        self.install(prepared)
    }

    /// Opens an output endpoint from `ip` toward `peer`.
    ///
    /// For TCP this connects now, so the input must already be set up.
    pub async fn set_up_output(
        &mut self,
        peer: Connection,
        ip: Ipv4Addr,
    ) -> Result<Connection, ChannelError> {
        self.check_output_set_up(peer)?;
        let prepared = PreparedEndpoint::output(peer, ip).await?;
        self.install(prepared)
    }

    // ------------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------------

    /// Starts the pump task. `filter` restricts an input to one sender.
    pub fn start(&mut self, filter: Option<Connection>) -> Result<(), ChannelError> {
        self.expect_state("start", &[ChannelState::SetUp])?;
        let Some(endpoint) = self.pending.take() else {
            return Err(ChannelError::InvalidState {
                path: self.path.clone(),
                operation: "start",
                state: self.state,
            });
        };

        let cancel = CancellationToken::new();
        let path = self.path.clone();
        let task = match endpoint {
            Endpoint::UdpInput(socket) => {
                let deliveries = self.input_sender()?;
                tokio::spawn(transport::run_udp_input(
                    path,
                    socket,
                    filter,
                    deliveries,
                    cancel.clone(),
                ))
            }
            Endpoint::TcpInput(listener) => {
                let deliveries = self.input_sender()?;
                tokio::spawn(transport::run_tcp_input(
                    path,
                    listener,
                    filter,
                    deliveries,
                    cancel.clone(),
                ))
            }
            Endpoint::UdpOutput(socket) => {
                let outgoing = self.open_outlet();
                tokio::spawn(transport::run_udp_output(
                    path,
                    socket,
                    outgoing,
                    cancel.clone(),
                ))
            }
            Endpoint::TcpOutput(stream) => {
                let outgoing = self.open_outlet();
                tokio::spawn(transport::run_tcp_output(
                    path,
                    stream,
                    outgoing,
                    cancel.clone(),
                ))
            }
        };

        self.running = Some(Running { cancel, task });
        self.state = ChannelState::Started;
        info!(
            node = %self.node,
            channel = %self.path,
            filtered = filter.is_some(),
            "Channel started"
        );
        Ok(())
    }

    fn input_sender(&self) -> Result<mpsc::Sender<Delivery>, ChannelError> {
        self.deliveries.clone().ok_or_else(|| ChannelError::WrongDirection {
            path: self.path.clone(),
            expected: "input",
        })
    }

    fn open_outlet(&self) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        *self.outlet.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Stops traffic and releases sockets. Safe in every state.
    pub fn stop(&mut self) {
        if self.state == ChannelState::Stopped {
            return;
        }
        self.outlet
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.task.abort();
        }
        self.pending = None;
        self.local = None;
        self.peer = None;
        let was = self.state;
        self.state = ChannelState::Stopped;
        debug!(channel = %self.path, from = %was, "Channel stopped");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("node", &self.node)
            .field("path", &self.path)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("local", &self.local)
            .finish()
    }
}
