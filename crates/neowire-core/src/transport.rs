//! Byte-stream plumbing.
//!
//! The runtime only needs an ordered, reliable duplex stream. In production
//! that is Neovim's Unix-domain socket; tests use in-memory pipes. Streams are
//! split into boxed halves so the listener and the dispatcher can own one each.

use crate::error::{Result, WireError};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Read half of a connection, owned by the listener.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection, owned by the dispatcher.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Split any duplex stream into independently owned halves.
pub fn split_stream<S>(stream: S) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), Box::new(writer))
}

/// Connect to a Unix-domain stream socket.
///
/// Fails with `Timeout` if the connection is not established in time and
/// with `Connect` for any other failure.
#[cfg(unix)]
pub async fn connect_local(path: &Path, timeout: Duration) -> Result<tokio::net::UnixStream> {
    let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path))
        .await
        .map_err(|_| WireError::Timeout(timeout))?
        .map_err(|e| WireError::Connect {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    debug!("Connected to {}", path.display());
    Ok(stream)
}

#[cfg(not(unix))]
pub async fn connect_local(path: &Path, _timeout: Duration) -> Result<tokio::io::DuplexStream> {
    Err(WireError::Connect {
        path: path.to_path_buf(),
        message: "local stream sockets are only supported on Unix".to_string(),
    })
}
