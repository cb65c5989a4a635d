//! Error types for the command protocol.

use std::net::SocketAddr;

use nimo_core::CodecError;
use thiserror::Error;

/// A request or response that does not have the agreed shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request is not an array")]
    RequestNotArray,

    #[error("request is empty")]
    EmptyRequest,

    #[error("request command name is not a string")]
    CommandNotString,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("response is not a non-empty array")]
    MalformedResponse,

    #[error("expected '{expected}', got '{actual}'")]
    ResponseMismatch { expected: String, actual: String },
}

/// Errors while moving length-prefixed frames over a stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,

    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("frame does not contain a valid message")]
    Malformed,

    #[error("encode error: {0}")]
    Encode(#[from] CodecError),

    #[error("write timeout")]
    WriteTimeout,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Closed
        } else {
            Self::Io(e.to_string())
        }
    }
}

/// Errors that stop a command server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("failed to read local address: {0}")]
    LocalAddr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_closed() {
        let err: FrameError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, FrameError::Closed));

        let err: FrameError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let err = FrameError::TooLarge {
            size: 2_000_000,
            max: 1_048_576,
        };
        assert!(err.to_string().contains("2000000"));

        let err = ProtocolError::ResponseMismatch {
            expected: "addNodeResponse".to_string(),
            actual: "removeNodeResponse".to_string(),
        };
        assert!(err.to_string().contains("removeNodeResponse"));
    }
}
