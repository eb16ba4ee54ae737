//! Background reader.
//!
//! One listener task owns the read half of the connection. It decodes frames
//! and routes them: responses to the dispatcher's reply table, notifications
//! to its queue. Bad frames are logged and skipped. When the stream ends the
//! dispatcher is closed so parked claims fail instead of hanging.

use super::codec::FrameCodec;
use super::dispatcher::{DepositOutcome, Dispatcher};
use super::message::Message;
use crate::config::ConnectionConfig;
use crate::transport::BoxedReader;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why the listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The peer closed the stream.
    EndOfStream,
    /// Reading failed.
    ReadError(String),
}

/// Reads frames from the transport and feeds the dispatcher.
pub struct Listener {
    reader: BoxedReader,
    codec: FrameCodec,
    dispatcher: Arc<Dispatcher>,
    chunk_size: usize,
}

impl Listener {
    pub fn new(reader: BoxedReader, dispatcher: Arc<Dispatcher>, config: &ConnectionConfig) -> Self {
        Self {
            reader,
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
            dispatcher,
            chunk_size: config.read_chunk_size.max(1),
        }
    }

    /// Run the listener on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<ListenerExit> {
        tokio::spawn(self.run())
    }

    /// Read until the stream ends, then close the dispatcher.
    pub async fn run(mut self) -> ListenerExit {
        let mut chunk = vec![0u8; self.chunk_size];

        let exit = loop {
            let n = match self.reader.read(&mut chunk).await {
                Ok(0) => break ListenerExit::EndOfStream,
                Ok(n) => n,
                Err(e) => {
                    error!("Read from peer failed: {}", e);
                    break ListenerExit::ReadError(e.to_string());
                }
            };

            self.codec.feed(&chunk[..n]);
            self.drain_frames();
        };

        if self.codec.buffered() > 0 {
            warn!(
                "Connection ended with {} undecoded bytes",
                self.codec.buffered()
            );
        }

        self.dispatcher.close();
        info!("Listener stopped: {:?}", exit);
        exit
    }

    fn drain_frames(&mut self) {
        loop {
            match self.codec.next_frame() {
                Ok(Some(message)) => self.route(message),
                Ok(None) => break,
                Err(e) => match e.raw_value() {
                    Some(raw) => warn!("Discarding malformed frame ({}): {}", e, raw),
                    None => warn!("Discarding undecodable input: {}", e),
                },
            }
        }
    }

    fn route(&self, message: Message) {
        match message {
            Message::Response { id, error, result } => {
                match self.dispatcher.deposit_response(id, error, result) {
                    DepositOutcome::Delivered | DepositOutcome::Stored => {
                        debug!("Received response {}", id)
                    }
                    DepositOutcome::Unmatched => {
                        warn!("Dropping response {} with no matching request", id)
                    }
                }
            }
            Message::Notification { method, args } => {
                debug!("Received notification {}", method);
                self.dispatcher.deposit_notification(method, args);
            }
            // This client serves no methods.
            Message::Request { id, method, .. } => {
                warn!("Ignoring request {} (method {}) from peer", id, method);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Reply;
    use crate::transport::split_stream;
    use rmpv::Value;
    use tokio::io::AsyncWriteExt;

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    #[tokio::test]
    async fn test_routes_responses_and_notifications() {
        let (ours, mut peer) = tokio::io::duplex(4096);
        let (reader, writer) = split_stream(ours);
        let dispatcher = Arc::new(Dispatcher::new(writer));
        let id = dispatcher.issue(3u64, vec![]).await.unwrap();

        let handle = Listener::new(reader, dispatcher.clone(), &ConnectionConfig::default()).spawn();

        let mut bytes = Message::Notification {
            method: "redraw".into(),
            args: Value::Array(vec![]),
        }
        .encode()
        .unwrap();
        bytes.extend(
            Message::Response {
                id,
                error: None,
                result: Value::from("ok"),
            }
            .encode()
            .unwrap(),
        );
        peer.write_all(&bytes).await.unwrap();

        assert_eq!(dispatcher.claim(id).await.unwrap(), Reply::Success(Value::from("ok")));
        let names: Vec<String> = dispatcher
            .drain_notifications()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["redraw"]);

        drop(peer);
        assert_eq!(handle.await.unwrap(), ListenerExit::EndOfStream);
        assert!(dispatcher.is_closed());
    }

    #[tokio::test]
    async fn test_survives_peer_requests_and_garbage() {
        let (ours, mut peer) = tokio::io::duplex(4096);
        let (reader, writer) = split_stream(ours);
        let dispatcher = Arc::new(Dispatcher::new(writer));
        let config = ConnectionConfig::default().read_chunk_size(3);
        let handle = Listener::new(reader, dispatcher.clone(), &config).spawn();

        let mut bytes = Message::request(0, 1, vec![]).encode().unwrap();
        bytes.extend(encode(&Value::from("not a message")));
        bytes.extend(
            Message::Response {
                id: 42,
                error: None,
                result: Value::Nil,
            }
            .encode()
            .unwrap(),
        );
        bytes.extend(
            Message::Notification {
                method: "bufenter".into(),
                args: Value::Nil,
            }
            .encode()
            .unwrap(),
        );
        peer.write_all(&bytes).await.unwrap();

        let batch = dispatcher.next_notifications().await.unwrap();
        assert_eq!(batch[0].name, "bufenter");
        assert!(dispatcher.snapshot_pending().is_empty());

        drop(peer);
        assert_eq!(handle.await.unwrap(), ListenerExit::EndOfStream);
    }
}
