//! Error types for the node runtime.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` in this crate's production code.

use std::net::SocketAddr;
use std::time::Duration;

use nimo_core::{TransportModes, TransportType};
use nimo_protocol::{FrameError, ProtocolError, ServerError};
use thiserror::Error;

use crate::channel::ChannelState;

// ============================================================================
// Client Errors
// ============================================================================

/// Failures talking to a command port.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {error}")]
    Connect { addr: SocketAddr, error: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer answered with a failed simple response.
    #[error("{command} failed: {reason}")]
    Failed { command: String, reason: String },

    /// The peer answered, but not with the payload shape the command promises.
    #[error("unexpected payload in {command} response")]
    UnexpectedPayload { command: String },
}

impl ClientError {
    /// The peer's reason for a failed command, if that is what this is.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

// ============================================================================
// Channel Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel '{path}' not found")]
    NotFound { path: String },

    #[error("channel '{path}' already exists")]
    AlreadyExists { path: String },

    #[error("cannot {operation} channel '{path}' while {state}")]
    InvalidState {
        path: String,
        operation: &'static str,
        state: ChannelState,
    },

    #[error("channel '{path}' is not an {expected}")]
    WrongDirection { path: String, expected: &'static str },

    #[error("channel '{path}' does not allow {mode}")]
    ModeNotAllowed { path: String, mode: TransportType },

    #[error("failed to bind {mode} endpoint: {error}")]
    Bind { mode: TransportType, error: String },

    #[error("failed to reach {peer}: {error}")]
    Connect { peer: String, error: String },

    #[error("channel '{path}' is not sending")]
    NotSending { path: String },
}

// ============================================================================
// Discovery Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The registry did not answer within the discovery timeout.
    #[error("Registry not found (waited {waited:?})")]
    NotFound { waited: Duration },

    #[error("registry at {addr} unreachable: {error}")]
    Unreachable { addr: SocketAddr, error: String },

    #[error("registry discovery cancelled")]
    Cancelled,
}

// ============================================================================
// Launch Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("unknown application '{0}'")]
    UnknownApplication(String),

    #[error("failed to start '{program}': {error}")]
    Spawn { program: String, error: String },

    #[error("failed to read output of '{program}': {error}")]
    Output { program: String, error: String },
}

// ============================================================================
// Connect Errors
// ============================================================================

/// Failures wiring or unwiring two channels.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("channel '{node}{path}' not found")]
    ChannelNotFound { node: String, path: String },

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("channel '{node}{path}' is not an {expected}")]
    WrongDirection {
        node: String,
        path: String,
        expected: &'static str,
    },

    #[error("channel '{node}{path}' is already connected")]
    ChannelInUse { node: String, path: String },

    #[error("no transport allowed by both channels (from {from}, to {to})")]
    NoCommonMode { from: TransportModes, to: TransportModes },

    #[error("channel '{node}{path}' is not connected")]
    NotConnected { node: String, path: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

// ============================================================================
// Node Errors
// ============================================================================

/// Failures of the node runtime as a whole.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("node command port is not an IPv4 address: {0}")]
    NotIpv4(SocketAddr),
}
