//! Response shapes.
//!
//! A simple response is `[name+"Response", success, reason?]`; a complex
//! response is `[name+"Response", payload]`. Complex payloads are always
//! arrays, so the second element's variant tells the two apart.

use nimo_core::Value;

use crate::commands::response_name;
use crate::error::ProtocolError;

/// Fixed reason for too few arguments.
pub const MISSING_ARGUMENTS: &str = "Missing argument(s)";

/// Fixed reason for an argument of the wrong variant.
pub const INVALID_ARGUMENTS: &str = "One or more invalid arguments";

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Simple {
        success: bool,
        reason: Option<String>,
    },
    Complex(Value),
}

impl Response {
    pub fn success() -> Self {
        Self::Simple {
            success: true,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Simple {
            success: false,
            reason: Some(reason.into()),
        }
    }

    /// Complex response whose payload is the array of `items`.
    pub fn complex<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Complex(Value::array(items))
    }

    /// False only for a failed simple response.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Simple { success, .. } => *success,
            Self::Complex(_) => true,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Simple { reason, .. } => reason.as_deref(),
            Self::Complex(_) => None,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Complex(payload) => Some(payload),
            Self::Simple { .. } => None,
        }
    }

    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Complex(payload) => Some(payload),
            Self::Simple { .. } => None,
        }
    }

    /// Wire form for a reply to `command`.
    pub fn to_value(&self, command: &str) -> Value {
        let mut items = vec![Value::from(response_name(command))];
        match self {
            Self::Simple { success, reason } => {
                items.push(Value::Logical(*success));
                if let Some(reason) = reason {
                    items.push(Value::from(reason));
                }
            }
            Self::Complex(payload) => items.push(payload.clone()),
        }
        Value::Array(items)
    }

    /// Parses the reply to `command`, checking the echoed response name.
    pub fn from_value(command: &str, value: Value) -> Result<Self, ProtocolError> {
        let Value::Array(items) = value else {
            return Err(ProtocolError::MalformedResponse);
        };
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            _ => return Err(ProtocolError::MalformedResponse),
        };
        let expected = response_name(command);
        if name != expected {
            return Err(ProtocolError::ResponseMismatch {
                expected,
                actual: name,
            });
        }
        match items.next() {
            Some(Value::Logical(success)) => {
                let reason = match items.next() {
                    Some(Value::String(reason)) => Some(reason),
                    _ => None,
                };
                Ok(Self::Simple { success, reason })
            }
            Some(payload) => Ok(Self::Complex(payload)),
            None => Err(ProtocolError::MalformedResponse),
        }
    }
}

/// A handler's refusal; always rendered as a failed simple response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub reason: String,
}

impl CommandFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn missing_arguments() -> Self {
        Self::new(MISSING_ARGUMENTS)
    }

    pub fn invalid_arguments() -> Self {
        Self::new(INVALID_ARGUMENTS)
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl From<CommandFailure> for Response {
    fn from(failure: CommandFailure) -> Self {
        Self::failure(failure.reason)
    }
}
