//! Error types for codec and configuration handling.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a [`Message`](crate::Message).
///
/// Decoding never errors; malformed input yields `None` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("message is not open for writing")]
    NotOpenForWriting,

    #[error("message already holds a value")]
    ValueAlreadySet,

    #[error("value nesting exceeds {max} levels")]
    NestingTooDeep { max: usize },

    #[error("{what} too large to encode ({len} elements)")]
    TooLarge { what: &'static str, len: usize },
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {var}: '{value}'")]
    InvalidOverride { var: String, value: String },
}
