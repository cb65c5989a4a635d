//! Network endpoint descriptors and service classification.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::value::Value;

/// Transport used by a command port or channel link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Tcp,
    Udp,
}

impl TransportType {
    /// Wire code; doubles as the transport's bit in [`TransportModes`].
    pub const fn code(self) -> i64 {
        match self {
            Self::Tcp => 1,
            Self::Udp => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Tcp),
            2 => Some(Self::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for TransportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unknown transport '{other}' (expected tcp or udp)")),
        }
    }
}

/// Set of transports a channel is willing to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransportModes(u8);

impl TransportModes {
    pub const NONE: Self = Self(0);
    pub const TCP: Self = Self(1);
    pub const UDP: Self = Self(2);
    pub const ANY: Self = Self(3);

    /// Parses a wire mask; unknown bits are rejected.
    pub fn from_bits(bits: i64) -> Option<Self> {
        u8::try_from(bits)
            .ok()
            .filter(|b| b & !Self::ANY.0 == 0)
            .map(Self)
    }

    pub const fn bits(self) -> i64 {
        self.0 as i64
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, transport: TransportType) -> bool {
        i64::from(self.0) & transport.code() != 0
    }

    /// Preferred single transport in this set (TCP first).
    pub fn preferred(self) -> Option<TransportType> {
        if self.contains(TransportType::Tcp) {
            Some(TransportType::Tcp)
        } else if self.contains(TransportType::Udp) {
            Some(TransportType::Udp)
        } else {
            None
        }
    }
}

impl From<TransportType> for TransportModes {
    fn from(transport: TransportType) -> Self {
        match transport {
            TransportType::Tcp => Self::TCP,
            TransportType::Udp => Self::UDP,
        }
    }
}

impl fmt::Display for TransportModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::TCP => write!(f, "tcp"),
            Self::UDP => write!(f, "udp"),
            Self::ANY => write!(f, "tcp|udp"),
            _ => write!(f, "none"),
        }
    }
}

// ============================================================================
// Connection descriptor
// ============================================================================

/// An (address, port, transport) triple identifying a network endpoint.
///
/// Wire form: `[address, port, 0, transport]`; the third slot is reserved
/// and always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub address: Ipv4Addr,
    pub port: u16,
    pub transport: TransportType,
}

impl Connection {
    pub const fn new(address: Ipv4Addr, port: u16, transport: TransportType) -> Self {
        Self {
            address,
            port,
            transport,
        }
    }

    /// Builds a descriptor from a bound socket address. IPv6 is not supported.
    pub fn from_socket_addr(addr: SocketAddr, transport: TransportType) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self::new(*v4.ip(), v4.port(), transport)),
            SocketAddr::V6(_) => None,
        }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Address(self.address),
            Value::from(self.port),
            Value::Integer(0),
            Value::Integer(self.transport.code()),
        ])
    }

    /// Narrows a wire descriptor; `None` when any field is missing or mistyped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let address = items.first()?.as_address()?;
        let port = u16::try_from(items.get(1)?.as_integer()?).ok()?;
        items.get(2)?.as_integer()?;
        let transport = TransportType::from_code(items.get(3)?.as_integer()?)?;
        Some(Self::new(address, port, transport))
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.address, self.port)
    }
}

// ============================================================================
// Service type
// ============================================================================

/// What kind of process a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Generic,
    Registry,
    Launcher,
    Filter,
    Input,
    Output,
    Utility,
}

impl ServiceType {
    pub const fn code(self) -> i64 {
        match self {
            Self::Generic => 0,
            Self::Registry => 1,
            Self::Launcher => 2,
            Self::Filter => 3,
            Self::Input => 4,
            Self::Output => 5,
            Self::Utility => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Generic),
            1 => Some(Self::Registry),
            2 => Some(Self::Launcher),
            3 => Some(Self::Filter),
            4 => Some(Self::Input),
            5 => Some(Self::Output),
            6 => Some(Self::Utility),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Generic => "generic",
            Self::Registry => "registry",
            Self::Launcher => "launcher",
            Self::Filter => "filter",
            Self::Input => "input",
            Self::Output => "output",
            Self::Utility => "utility",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_wire_form() {
        let conn = Connection::new(Ipv4Addr::new(10, 1, 2, 3), 4242, TransportType::Udp);
        let value = conn.to_value();
        assert_eq!(value.as_array().map(<[Value]>::len), Some(4));
        assert_eq!(Connection::from_value(&value), Some(conn));
    }

    #[test]
    fn test_connection_accepts_integer_address() {
        let value = Value::array([
            Value::Integer(0x7F00_0001),
            Value::Integer(80),
            Value::Integer(0),
            Value::Integer(1),
        ]);
        let conn = Connection::from_value(&value).unwrap();
        assert_eq!(conn.address, Ipv4Addr::LOCALHOST);
        assert_eq!(conn.transport, TransportType::Tcp);
        assert_eq!(conn.to_string(), "tcp://127.0.0.1:80");
    }

    #[test]
    fn test_connection_rejects_bad_fields() {
        let bad_port = Value::array([
            Value::Address(Ipv4Addr::LOCALHOST),
            Value::Integer(70_000),
            Value::Integer(0),
            Value::Integer(1),
        ]);
        assert!(Connection::from_value(&bad_port).is_none());

        let short = Value::array([Value::Address(Ipv4Addr::LOCALHOST), Value::Integer(1)]);
        assert!(Connection::from_value(&short).is_none());
        assert!(Connection::from_value(&Value::from("nope")).is_none());
    }

    #[test]
    fn test_transport_modes() {
        assert!(TransportModes::ANY.contains(TransportType::Tcp));
        assert!(TransportModes::ANY.contains(TransportType::Udp));
        assert!(!TransportModes::UDP.contains(TransportType::Tcp));
        assert_eq!(TransportModes::from_bits(4), None);
        assert_eq!(TransportModes::from_bits(-1), None);
        assert_eq!(TransportModes::from_bits(2), Some(TransportModes::UDP));
        assert_eq!(TransportModes::UDP.preferred(), Some(TransportType::Udp));
        assert!(TransportModes::NONE.is_empty());
    }

    #[test]
    fn test_service_type_codes() {
        for code in 0..=6 {
            let service = ServiceType::from_code(code).unwrap();
            assert_eq!(service.code(), code);
        }
        assert_eq!(ServiceType::from_code(7), None);
        assert_eq!(ServiceType::Launcher.to_string(), "launcher");
    }
}
