//! Error types for neowire.
//!
//! Every failure the runtime can surface to a caller is a `WireError`. Protocol
//! anomalies seen by the listener (malformed frames, unmatched ids) are logged
//! and never reach callers; they only show up here when a caller decodes
//! something itself.

use rmpv::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the neowire runtime.
#[derive(Debug, Error)]
pub enum WireError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to connect to {path:?}: {message}")]
    Connect { path: PathBuf, message: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    // Waiting errors
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    // Method resolution errors
    #[error("Method not found: {name}")]
    MethodNotFound { name: String },

    #[error("Method catalog has not been loaded")]
    CatalogUnavailable,

    // Codec errors
    #[error("Decode error: {message}")]
    Decode {
        message: String,
        /// The offending value, when one could be read off the wire.
        raw: Option<Value>,
    },

    #[error("Encode error: {message}")]
    Encode { message: String },

    // Handshake errors
    #[error("Bootstrap failed: {message}")]
    Bootstrap { message: String },

    /// The peer answered a request with a non-nil error field.
    #[error("Remote call failed: {0}")]
    Remote(Value),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for neowire operations.
pub type Result<T> = std::result::Result<T, WireError>;

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        WireError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl WireError {
    /// Build a decode error that keeps the malformed value for diagnostics.
    pub fn malformed(message: impl Into<String>, raw: Value) -> Self {
        WireError::Decode {
            message: message.into(),
            raw: Some(raw),
        }
    }

    /// Build a bootstrap error.
    pub fn bootstrap(message: impl Into<String>) -> Self {
        WireError::Bootstrap {
            message: message.into(),
        }
    }

    /// Check if this error means the connection to the peer is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            WireError::ConnectionClosed | WireError::Io { .. } | WireError::Connect { .. }
        )
    }

    /// The raw value attached to a decode error, if any.
    pub fn raw_value(&self) -> Option<&Value> {
        match self {
            WireError::Decode { raw, .. } => raw.as_ref(),
            _ => None,
        }
    }
}
