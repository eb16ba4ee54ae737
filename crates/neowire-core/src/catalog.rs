//! The table of remotely callable methods.
//!
//! Neovim describes its API in the reply to method 0. The reply payload is a
//! MessagePack blob that has to be decoded a second time; inside is a map with
//! `"classes"` and `"functions"` entries. Depending on the peer, the blob is
//! either the whole result or the second element of `[channel_id, blob]`.

use crate::error::{Result, WireError};
use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One parameter of a remote method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodParam {
    #[serde(rename = "type")]
    pub ty: String,
    pub name: String,
}

/// A remote method as advertised by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub id: u64,
    #[serde(rename = "parameters")]
    pub params: Vec<MethodParam>,
    #[serde(rename = "return_type")]
    pub result_type: String,
    pub can_fail: bool,
}

/// Name-to-id mapping discovered during the handshake.
#[derive(Debug, Clone, Default)]
pub struct MethodCatalog {
    channel_id: Option<u64>,
    classes: Vec<String>,
    methods: Vec<MethodDescriptor>,
    by_name: HashMap<String, usize>,
}

impl MethodCatalog {
    /// Build a catalog from the result of the method-0 call.
    pub fn from_bootstrap_result(result: &Value) -> Result<Self> {
        let (channel_id, blob) = split_bootstrap_result(result)?;

        let mut reader = blob;
        let api = rmpv::decode::read_value(&mut reader).map_err(|e| {
            WireError::bootstrap(format!("API description is not valid MessagePack: {}", e))
        })?;

        let mut catalog = Self::from_api_value(&api)?;
        catalog.channel_id = channel_id;
        Ok(catalog)
    }

    /// Build a catalog from an already decoded API description map.
    pub fn from_api_value(api: &Value) -> Result<Self> {
        if !matches!(api, Value::Map(_)) {
            return Err(WireError::bootstrap(format!(
                "API description must be a map, got {}",
                api
            )));
        }

        let classes = match map_get(api, "classes") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_owned).ok_or_else(|| {
                        WireError::bootstrap(format!("class name is not a string: {}", item))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(WireError::bootstrap(format!(
                    "\"classes\" must be an array, got {}",
                    other
                )))
            }
            None => Vec::new(),
        };

        let functions = match map_get(api, "functions") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(WireError::bootstrap(format!(
                    "\"functions\" must be an array, got {}",
                    other
                )))
            }
            None => return Err(WireError::bootstrap("API description has no \"functions\"")),
        };

        let methods = functions
            .iter()
            .map(|record| {
                rmpv::ext::from_value::<MethodDescriptor>(record.clone()).map_err(|e| {
                    WireError::bootstrap(format!("bad function record {}: {}", record, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_parts(classes, methods))
    }

    /// Build a catalog directly from descriptors.
    pub fn from_parts(classes: Vec<String>, methods: Vec<MethodDescriptor>) -> Self {
        let mut by_name = HashMap::with_capacity(methods.len());
        for (index, method) in methods.iter().enumerate() {
            // First definition wins if the peer repeats a name.
            by_name.entry(method.name.clone()).or_insert(index);
        }

        Self {
            channel_id: None,
            classes,
            methods,
            by_name,
        }
    }

    /// Look up the id for a method name.
    ///
    /// `None` means there is no such method. The handshake id 0 is never
    /// returned, even if a peer lists a method under it.
    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.get(name).map(|m| m.id).filter(|id| *id != 0)
    }

    pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
        self.by_name.get(name).map(|index| &self.methods[*index])
    }

    /// Channel id reported alongside the API blob, if the peer sent one.
    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn split_bootstrap_result(result: &Value) -> Result<(Option<u64>, &[u8])> {
    match result {
        Value::Binary(bytes) => Ok((None, bytes.as_slice())),
        Value::String(s) => Ok((None, s.as_bytes())),
        Value::Array(items) if items.len() == 2 => {
            let channel_id = items[0].as_u64();
            match &items[1] {
                Value::Binary(bytes) => Ok((channel_id, bytes.as_slice())),
                Value::String(s) => Ok((channel_id, s.as_bytes())),
                other => Err(WireError::bootstrap(format!(
                    "expected API blob in second position, got {}",
                    other
                ))),
            }
        }
        other => Err(WireError::bootstrap(format!(
            "expected API blob, got {}",
            other
        ))),
    }
}

fn map_get<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    match map {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v),
        _ => None,
    }
}
