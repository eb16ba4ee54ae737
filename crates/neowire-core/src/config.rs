//! Connection configuration.
//!
//! Defaults live as associated constants on [`ConnectionConfig`]; the socket
//! path can be overridden through the environment the same way Neovim itself
//! advertises its listen address.

use crate::error::{Result, WireError};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one connection to a Neovim peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Path of the local stream socket the peer listens on.
    pub socket_path: PathBuf,
    /// Upper bound on establishing the socket connection.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for the method-0 handshake reply.
    pub bootstrap_timeout: Duration,
    /// Deadline applied by `Client::call`. `None` waits until the connection closes.
    pub call_timeout: Option<Duration>,
    /// Size of each read the listener issues on the socket.
    pub read_chunk_size: usize,
    /// Largest incomplete frame the codec will buffer before giving up.
    pub max_frame_size: usize,
}

impl ConnectionConfig {
    pub const SOCKET_ENV_VAR: &'static str = "NVIM_LISTEN_ADDRESS";
    pub const DEFAULT_SOCKET_PATH: &'static str = "/tmp/neovim";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
    // nvim can push large redraw bursts in a single write
    pub const READ_CHUNK_SIZE: usize = 64 * 1024;
    pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024; // 64MB

    /// Build a configuration with the socket path taken from the environment.
    pub fn from_env() -> Self {
        Self::with_socket_path(resolve_socket_path(std::env::var_os(Self::SOCKET_ENV_VAR)))
    }

    /// Build a configuration for an explicit socket path.
    pub fn with_socket_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            connect_timeout: Self::CONNECT_TIMEOUT,
            bootstrap_timeout: Self::BOOTSTRAP_TIMEOUT,
            call_timeout: Some(Self::CALL_TIMEOUT),
            read_chunk_size: Self::READ_CHUNK_SIZE,
            max_frame_size: Self::MAX_FRAME_SIZE,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Reject settings that would make the connection unusable.
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(WireError::Config {
                message: "socket path is empty".to_string(),
            });
        }
        if self.bootstrap_timeout.is_zero() {
            return Err(WireError::Config {
                message: "bootstrap timeout must be greater than zero".to_string(),
            });
        }
        if self.max_frame_size == 0 {
            return Err(WireError::Config {
                message: "max frame size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::with_socket_path(Self::DEFAULT_SOCKET_PATH)
    }
}

/// Pick the socket path from an optional environment override.
///
/// An unset or empty override falls back to [`ConnectionConfig::DEFAULT_SOCKET_PATH`].
pub fn resolve_socket_path(env_override: Option<OsString>) -> PathBuf {
    match env_override {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(ConnectionConfig::DEFAULT_SOCKET_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_socket_path_prefers_override() {
        let path = resolve_socket_path(Some(OsString::from("/run/user/1000/nvim.sock")));
        assert_eq!(path, PathBuf::from("/run/user/1000/nvim.sock"));
    }

    #[test]
    fn test_resolve_socket_path_falls_back() {
        assert_eq!(resolve_socket_path(None), PathBuf::from("/tmp/neovim"));
        assert_eq!(
            resolve_socket_path(Some(OsString::new())),
            PathBuf::from("/tmp/neovim")
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = ConnectionConfig::default()
            .call_timeout(None)
            .read_chunk_size(0)
            .bootstrap_timeout(Duration::from_millis(250));

        assert_eq!(config.call_timeout, None);
        assert_eq!(config.read_chunk_size, 1);
        assert_eq!(config.bootstrap_timeout, Duration::from_millis(250));
        assert_eq!(config.socket_path, PathBuf::from(ConnectionConfig::DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::default().validate().is_ok());

        let empty = ConnectionConfig::with_socket_path("");
        assert!(matches!(empty.validate(), Err(WireError::Config { .. })));

        let no_frames = ConnectionConfig::default().max_frame_size(0);
        assert!(matches!(no_frames.validate(), Err(WireError::Config { .. })));

        let instant = ConnectionConfig::default().bootstrap_timeout(Duration::ZERO);
        assert!(matches!(instant.validate(), Err(WireError::Config { .. })));
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(ConnectionConfig::BOOTSTRAP_TIMEOUT > Duration::ZERO);
        assert!(ConnectionConfig::MAX_FRAME_SIZE > ConnectionConfig::READ_CHUNK_SIZE);
    }
}
