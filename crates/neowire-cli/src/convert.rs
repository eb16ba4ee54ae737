//! JSON <-> MessagePack value conversion for the command line.
//!
//! Arguments are typed as JSON on the command line and replies are printed as
//! JSON, so both directions go through `serde_json::Value`.

use rmpv::Value;
use serde_json::{json, Number};

/// Convert a JSON value into a wire value.
pub fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                n.as_f64().map(Value::F64).unwrap_or(Value::Nil)
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(obj) => Value::Map(
            obj.into_iter()
                .map(|(k, v)| (Value::from(k), json_to_value(v)))
                .collect(),
        ),
    }
}

/// Convert a wire value into JSON for display.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => {
            if let Some(n) = i.as_u64() {
                serde_json::Value::Number(n.into())
            } else if let Some(n) = i.as_i64() {
                serde_json::Value::Number(n.into())
            } else {
                serde_json::Value::Null
            }
        }
        Value::F32(f) => float(f64::from(*f)),
        Value::F64(f) => float(*f),
        Value::String(s) => match s.as_str() {
            Some(s) => serde_json::Value::String(s.to_string()),
            None => bytes(s.as_bytes()),
        },
        // Older peers send strings as raw bytes.
        Value::Binary(b) => match std::str::from_utf8(b) {
            Ok(s) => serde_json::Value::String(s.to_string()),
            Err(_) => bytes(b),
        },
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let obj: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::String(s) => s.as_str().map(str::to_owned).unwrap_or_else(|| k.to_string()),
                        other => other.to_string(),
                    };
                    (key, value_to_json(v))
                })
                .collect();
            serde_json::Value::Object(obj)
        }
        // Buffer, Window and Tabpage handles travel as extension types.
        Value::Ext(ty, data) => json!({ "ext": ty, "data": data }),
    }
}

/// Parse the argument list given on the command line.
///
/// Each argument is read as JSON; anything that is not valid JSON is taken
/// as a plain string, so `vim_command 'echo 1'` works without extra quoting.
pub fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| match serde_json::from_str::<serde_json::Value>(arg) {
            Ok(parsed) => json_to_value(parsed),
            Err(_) => Value::from(arg.as_str()),
        })
        .collect()
}

fn float(f: f64) -> serde_json::Value {
    Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn bytes(b: &[u8]) -> serde_json::Value {
    serde_json::Value::Array(b.iter().map(|byte| json!(byte)).collect())
}
