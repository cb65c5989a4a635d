//! Registry records and their wire forms.
//!
//! Each record converts to a flat `Value::Array` in field order and back.
//! Decoding is lenient only in the sense that it never panics: any missing
//! or mistyped field yields `None`.

use std::net::Ipv4Addr;

use crate::connection::{Connection, ServiceType, TransportModes, TransportType};
use crate::value::Value;

/// A value that travels as a positional array.
pub trait Record: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
}

fn string_at(items: &[Value], index: usize) -> Option<String> {
    items.get(index)?.as_str().map(str::to_string)
}

fn logical_at(items: &[Value], index: usize) -> Option<bool> {
    items.get(index)?.as_logical()
}

fn integer_at(items: &[Value], index: usize) -> Option<i64> {
    items.get(index)?.as_integer()
}

/// A host participating in the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    pub name: String,
    pub address: Ipv4Addr,
}

impl Record for MachineInfo {
    fn to_value(&self) -> Value {
        Value::Array(vec![Value::from(&self.name), Value::Address(self.address)])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            name: string_at(items, 0)?,
            address: items.get(1)?.as_address()?,
        })
    }
}

/// A registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub machine: String,
    pub service_type: ServiceType,
    pub connection: Connection,
}

impl Record for NodeInfo {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(&self.name),
            Value::from(&self.machine),
            Value::Integer(self.service_type.code()),
            self.connection.to_value(),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            name: string_at(items, 0)?,
            machine: string_at(items, 1)?,
            service_type: ServiceType::from_code(integer_at(items, 2)?)?,
            connection: Connection::from_value(items.get(3)?)?,
        })
    }
}

/// How a node process was started, so a launcher can restart it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchDetails {
    pub exec_path: String,
    pub launch_directory: String,
    pub command_line: String,
}

impl Record for LaunchDetails {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(&self.exec_path),
            Value::from(&self.launch_directory),
            Value::from(&self.command_line),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            exec_path: string_at(items, 0)?,
            launch_directory: string_at(items, 1)?,
            command_line: string_at(items, 2)?,
        })
    }
}

/// A directional, typed endpoint owned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub node: String,
    pub path: String,
    pub is_output: bool,
    pub data_type: String,
    pub modes: TransportModes,
    pub in_use: bool,
}

impl Record for ChannelInfo {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(&self.node),
            Value::from(&self.path),
            Value::Logical(self.is_output),
            Value::from(&self.data_type),
            Value::Integer(self.modes.bits()),
            Value::Logical(self.in_use),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            node: string_at(items, 0)?,
            path: string_at(items, 1)?,
            is_output: logical_at(items, 2)?,
            data_type: string_at(items, 3)?,
            modes: TransportModes::from_bits(integer_at(items, 4)?)?,
            in_use: logical_at(items, 5)?,
        })
    }
}

/// A producer → consumer link between an output and an input channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub from_node: String,
    pub from_path: String,
    pub to_node: String,
    pub to_path: String,
    pub data_type: String,
    pub mode: TransportType,
}

impl ConnectionInfo {
    /// Whether either endpoint belongs to `node`.
    pub fn touches_node(&self, node: &str) -> bool {
        self.from_node == node || self.to_node == node
    }

    /// Whether either endpoint is the channel `(node, path)`.
    pub fn touches_channel(&self, node: &str, path: &str) -> bool {
        (self.from_node == node && self.from_path == path)
            || (self.to_node == node && self.to_path == path)
    }
}

impl Record for ConnectionInfo {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(&self.from_node),
            Value::from(&self.from_path),
            Value::from(&self.to_node),
            Value::from(&self.to_path),
            Value::from(&self.data_type),
            Value::Integer(self.mode.code()),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            from_node: string_at(items, 0)?,
            from_path: string_at(items, 1)?,
            to_node: string_at(items, 2)?,
            to_path: string_at(items, 3)?,
            data_type: string_at(items, 4)?,
            mode: TransportType::from_code(integer_at(items, 5)?)?,
        })
    }
}

/// An application a launcher node can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub launcher_node: String,
    pub app_name: String,
    pub app_description: String,
}

impl Record for ApplicationInfo {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(&self.launcher_node),
            Value::from(&self.app_name),
            Value::from(&self.app_description),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            launcher_node: string_at(items, 0)?,
            app_name: string_at(items, 1)?,
            app_description: string_at(items, 2)?,
        })
    }
}
