//! Incremental frame decoding.
//!
//! MessagePack values are self-delimiting, so there is no length prefix: the
//! codec buffers whatever the socket hands it and peels complete values off
//! the front, leaving a partial trailing value in place for the next read.

use super::message::Message;
use crate::config::ConnectionConfig;
use crate::error::{Result, WireError};
use bytes::{Buf, BytesMut};
use std::io::{Cursor, ErrorKind};

/// Streaming decoder for incoming messages.
#[derive(Debug)]
pub struct FrameCodec {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(ConnectionConfig::MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append bytes received from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting to be decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode one message from the front of the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a message. A
    /// message with the wrong shape is consumed and reported as an error, so
    /// the next call starts cleanly at the following message.
    pub fn next_frame(&mut self) -> Result<Option<Message>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buf[..]);
        let value = match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => value,
            Err(rmpv::decode::Error::InvalidMarkerRead(e))
            | Err(rmpv::decode::Error::InvalidDataRead(e))
                if e.kind() == ErrorKind::UnexpectedEof =>
            {
                return self.incomplete();
            }
            Err(e) => {
                // Nothing after a corrupt marker can be trusted.
                let dropped = self.buf.len();
                self.buf.clear();
                return Err(WireError::Decode {
                    message: format!("corrupt stream, dropped {} bytes: {}", dropped, e),
                    raw: None,
                });
            }
        };

        let consumed = cursor.position() as usize;
        self.buf.advance(consumed);

        Message::from_value(value).map(Some)
    }

    fn incomplete(&mut self) -> Result<Option<Message>> {
        if self.buf.len() > self.max_frame_size {
            let dropped = self.buf.len();
            self.buf.clear();
            return Err(WireError::Decode {
                message: format!(
                    "incomplete frame of {} bytes exceeds maximum {}",
                    dropped, self.max_frame_size
                ),
                raw: None,
            });
        }
        Ok(None)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
