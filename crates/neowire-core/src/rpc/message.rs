//! MessagePack-RPC message shapes.
//!
//! Every message on the wire is an array whose first element is a type tag:
//!
//! ```text
//! [0, id, method, args]          request
//! [1, id, error|nil, result|nil] response
//! [2, method_name, args]         notification
//! ```

use crate::error::{Result, WireError};
use rmpv::Value;

pub const REQUEST_TAG: u64 = 0;
pub const RESPONSE_TAG: u64 = 1;
pub const NOTIFICATION_TAG: u64 = 2;

const REQUEST_ARITY: usize = 4;
const RESPONSE_ARITY: usize = 4;
const NOTIFICATION_ARITY: usize = 3;

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u64,
        method: u64,
        args: Vec<Value>,
    },
    Response {
        id: u64,
        /// `None` when the error slot was nil.
        error: Option<Value>,
        result: Value,
    },
    Notification {
        method: String,
        args: Value,
    },
}

impl Message {
    /// Build the outgoing request frame for a call.
    pub fn request(id: u64, method: u64, args: Vec<Value>) -> Self {
        Message::Request { id, method, args }
    }

    /// Short name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { .. } => "request",
            Message::Response { .. } => "response",
            Message::Notification { .. } => "notification",
        }
    }

    /// Convert to the array form used on the wire.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Request { id, method, args } => Value::Array(vec![
                Value::from(REQUEST_TAG),
                Value::from(*id),
                Value::from(*method),
                Value::Array(args.clone()),
            ]),
            Message::Response { id, error, result } => Value::Array(vec![
                Value::from(RESPONSE_TAG),
                Value::from(*id),
                error.clone().unwrap_or(Value::Nil),
                result.clone(),
            ]),
            Message::Notification { method, args } => Value::Array(vec![
                Value::from(NOTIFICATION_TAG),
                Value::from(method.as_str()),
                args.clone(),
            ]),
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &self.to_value()).map_err(|e| WireError::Encode {
            message: e.to_string(),
        })?;
        Ok(buf)
    }

    /// Validate a decoded value and turn it into a message.
    ///
    /// On failure the error carries the original value.
    pub fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => return Err(WireError::malformed("message is not an array", other)),
        };

        let tag = match items.first().and_then(Value::as_u64) {
            Some(tag) => tag,
            None => {
                return Err(WireError::malformed(
                    "first element is not an unsigned type tag",
                    Value::Array(items),
                ))
            }
        };

        let expected = match tag {
            REQUEST_TAG => REQUEST_ARITY,
            RESPONSE_TAG => RESPONSE_ARITY,
            NOTIFICATION_TAG => NOTIFICATION_ARITY,
            _ => {
                return Err(WireError::malformed(
                    format!("unknown message type {}", tag),
                    Value::Array(items),
                ))
            }
        };

        if items.len() != expected {
            return Err(WireError::malformed(
                format!(
                    "message type {} needs {} elements, got {}",
                    tag,
                    expected,
                    items.len()
                ),
                Value::Array(items),
            ));
        }

        match tag {
            REQUEST_TAG => decode_request(items),
            RESPONSE_TAG => decode_response(items),
            _ => decode_notification(items),
        }
    }
}

fn decode_request(items: Vec<Value>) -> Result<Message> {
    let id = items[1].as_u64();
    let method = items[2].as_u64();
    match (id, method, &items[3]) {
        (Some(id), Some(method), Value::Array(args)) => Ok(Message::Request {
            id,
            method,
            args: args.clone(),
        }),
        _ => Err(WireError::malformed(
            "request needs an unsigned id, an unsigned method and an argument array",
            Value::Array(items),
        )),
    }
}

fn decode_response(items: Vec<Value>) -> Result<Message> {
    let id = match items[1].as_u64() {
        Some(id) => id,
        None => {
            return Err(WireError::malformed(
                "response id is not an unsigned integer",
                Value::Array(items),
            ))
        }
    };

    let mut it = items.into_iter().skip(2);
    let error = it.next().filter(|v| !v.is_nil());
    let result = it.next().unwrap_or(Value::Nil);
    Ok(Message::Response { id, error, result })
}

fn decode_notification(items: Vec<Value>) -> Result<Message> {
    // Older peers send the method name as raw bytes rather than str.
    let method = match &items[1] {
        Value::String(s) => s.as_str().map(str::to_owned),
        Value::Binary(bytes) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    };

    match method {
        Some(method) => {
            let args = items.into_iter().nth(2).unwrap_or(Value::Nil);
            Ok(Message::Notification { method, args })
        }
        None => Err(WireError::malformed(
            "notification method name is not a string",
            Value::Array(items),
        )),
    }
}
