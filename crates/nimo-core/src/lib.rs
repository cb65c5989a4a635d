//! nImO Core - Shared data types
//!
//! This crate provides the types every other nImO crate speaks:
//! - `value` - the polymorphic wire value model
//! - `message` - the chunked binary codec for values
//! - `connection` - endpoint descriptors, transports and service types
//! - `model` - registry records (machines, nodes, channels, ...)
//! - `config` - layered runtime configuration
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod model;
pub mod value;

// Re-exports for convenience
pub use config::NimoConfig;
pub use connection::{Connection, ServiceType, TransportModes, TransportType};
pub use error::{CodecError, ConfigError};
pub use message::{Message, MessageState};
pub use model::{
    ApplicationInfo, ChannelInfo, ConnectionInfo, LaunchDetails, MachineInfo, NodeInfo, Record,
};
pub use value::{DateTime, DateTimeKind, Value, ValueMap};
