//! Request shape: `[commandName, arg1, arg2, ...]`.

use nimo_core::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: String,
    pub arguments: Vec<Value>,
}

impl Request {
    pub fn new(command: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(self.arguments.len() + 1);
        items.push(Value::from(&self.command));
        items.extend(self.arguments.iter().cloned());
        Value::Array(items)
    }

    /// Splits a received value into command name and arguments.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Array(items) = value else {
            return Err(ProtocolError::RequestNotArray);
        };
        let mut items = items.into_iter();
        let command = match items.next() {
            Some(Value::String(name)) => name,
            Some(_) => return Err(ProtocolError::CommandNotString),
            None => return Err(ProtocolError::EmptyRequest),
        };
        Ok(Self {
            command,
            arguments: items.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_value() {
        let value = Value::array([Value::from("isNodePresent"), Value::from("n1")]);
        let request = Request::from_value(value.clone()).unwrap();
        assert_eq!(request.command, "isNodePresent");
        assert_eq!(request.arguments, vec![Value::from("n1")]);
        assert_eq!(request.to_value(), value);
    }

    #[test]
    fn test_request_shape_violations() {
        assert_eq!(
            Request::from_value(Value::from("addNode")),
            Err(ProtocolError::RequestNotArray)
        );
        assert_eq!(
            Request::from_value(Value::array(Vec::<Value>::new())),
            Err(ProtocolError::EmptyRequest)
        );
        assert_eq!(
            Request::from_value(Value::array([Value::Integer(1)])),
            Err(ProtocolError::CommandNotString)
        );
    }
}
