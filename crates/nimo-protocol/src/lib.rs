//! nImO Protocol - Command session wire protocol
//!
//! Every command port (the registry's and each node's) speaks the same
//! protocol: a TCP session carries length-prefixed frames, each holding one
//! encoded Message. A request is `[command, args...]`; the reply is either
//! `[command+"Response", success, reason?]` or `[command+"Response", payload]`.
//!
//! - `commands` - the closed command set with minimum arities
//! - `dispatch` - the name-keyed handler table and argument narrowing
//! - `server` - TCP accept loop and per-connection sessions
//! - `framing` - 4-byte big-endian length framing
//! - `status` - tab-separated status notification text

pub mod commands;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use commands::CommandSpec;
pub use dispatch::{Arguments, HandlerResult, HandlerTable};
pub use error::{FrameError, ProtocolError, ServerError};
pub use framing::{read_value, write_value, MAX_FRAME_SIZE};
pub use request::Request;
pub use response::{CommandFailure, Response, INVALID_ARGUMENTS, MISSING_ARGUMENTS};
pub use server::{CommandServer, CommandSession, SessionEnd, SessionState};
pub use status::{StatusKind, StatusNotification, STATUS_SEPARATOR};
