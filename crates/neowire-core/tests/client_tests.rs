//! Integration tests for the Client runtime.
//!
//! A scripted fake peer sits on the far end of an in-memory pipe (or a real
//! Unix socket) and plays Neovim's side of the protocol.

use neowire_core::{
    Client, ConnectionConfig, FrameCodec, Message, Reply, WireError,
};
use rmpv::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

/// Neovim's side of the connection.
struct FakePeer<S> {
    stream: S,
    codec: FrameCodec,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FakePeer<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::new(),
        }
    }

    /// Read the next request the client sent.
    async fn next_request(&mut self) -> (u64, u64, Vec<Value>) {
        let mut buf = [0u8; 4096];
        loop {
            match self.codec.next_frame().expect("client sent a malformed frame") {
                Some(Message::Request { id, method, args }) => return (id, method, args),
                Some(other) => panic!("Expected request, got: {:?}", other),
                None => {}
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed the stream");
            self.codec.feed(&buf[..n]);
        }
    }

    async fn send(&mut self, message: Message) {
        let bytes = message.encode().unwrap();
        self.send_raw(&bytes).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    async fn reply(&mut self, id: u64, result: Value) {
        self.send(Message::Response {
            id,
            error: None,
            result,
        })
        .await;
    }

    /// Answer the method-0 handshake with a small API description.
    async fn serve_bootstrap(&mut self) {
        let (id, method, args) = self.next_request().await;
        assert_eq!(id, 0);
        assert_eq!(method, 0);
        assert!(args.is_empty());
        self.reply(id, Value::Binary(api_blob())).await;
    }
}

fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).unwrap();
    buf
}

fn function(name: &str, id: u64) -> Value {
    Value::Map(vec![
        (Value::from("name"), Value::from(name)),
        (Value::from("id"), Value::from(id)),
        (Value::from("can_fail"), Value::from(true)),
        (Value::from("return_type"), Value::from("Integer")),
        (Value::from("parameters"), Value::Array(vec![])),
    ])
}

fn api_blob() -> Vec<u8> {
    encode_value(&Value::Map(vec![
        (
            Value::from("classes"),
            Value::Array(vec![Value::from("Buffer")]),
        ),
        (
            Value::from("functions"),
            Value::Array(vec![
                function("buffer_get_length", 5),
                function("vim_eval", 9),
            ]),
        ),
    ]))
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig::default()
        .bootstrap_timeout(Duration::from_secs(5))
        .call_timeout(Some(Duration::from_secs(5)))
}

/// Connect a client over an in-memory pipe and complete the handshake.
async fn connected_pair() -> (Client, FakePeer<DuplexStream>) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let mut peer = FakePeer::new(theirs);
    let config = test_config();

    let (client, _) = tokio::join!(Client::from_stream(ours, &config), peer.serve_bootstrap());
    (client.expect("handshake should succeed"), peer)
}

#[tokio::test]
async fn test_bootstrap_populates_catalog() {
    let (client, _peer) = connected_pair().await;

    let catalog = client.catalog().unwrap();
    assert_eq!(catalog.resolve("buffer_get_length"), Some(5));
    assert_eq!(catalog.resolve("vim_eval"), Some(9));
    assert_eq!(catalog.resolve("vim_nope"), None);
    assert_eq!(catalog.classes(), &["Buffer".to_string()]);
}

#[tokio::test]
async fn test_call_by_name_sends_resolved_id() {
    let (client, mut peer) = connected_pair().await;

    let call = client.call("vim_eval", vec![Value::from("1 + 1")]);
    let serve = async {
        let (id, method, args) = peer.next_request().await;
        assert_eq!(id, 1);
        assert_eq!(method, 9);
        assert_eq!(args, vec![Value::from("1 + 1")]);
        peer.reply(id, Value::from(2u64)).await;
    };

    let (result, _) = tokio::join!(call, serve);
    assert_eq!(result.unwrap(), Value::from(2u64));
}

#[tokio::test]
async fn test_remote_error_is_surfaced() {
    let (client, mut peer) = connected_pair().await;
    let error = Value::Array(vec![Value::from(0u64), Value::from("E121: Undefined variable")]);

    let call = client.call("vim_eval", vec![Value::from("nope")]);
    let serve = async {
        let (id, _, _) = peer.next_request().await;
        peer.send(Message::Response {
            id,
            error: Some(error.clone()),
            result: Value::Nil,
        })
        .await;
    };

    let (result, _) = tokio::join!(call, serve);
    match result {
        Err(WireError::Remote(value)) => assert_eq!(value, error),
        other => panic!("Expected Remote error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_method_fails_locally() {
    let (client, _peer) = connected_pair().await;

    let err = client.issue("vim_frobnicate", vec![]).await.unwrap_err();
    assert!(matches!(err, WireError::MethodNotFound { .. }));
    // Nothing was sent, so the next id is still 1.
    assert_eq!(client.issue(5u64, vec![]).await.unwrap(), 1);
}

#[tokio::test]
async fn test_replies_in_reverse_order_reach_the_right_caller() {
    let (client, mut peer) = connected_pair().await;
    let client = Arc::new(client);

    let caller = |client: Arc<Client>| async move {
        let id = client.issue(5u64, vec![]).await.unwrap();
        let reply = client.claim(id).await.unwrap();
        (id, reply)
    };
    let a = tokio::spawn(caller(client.clone()));
    let b = tokio::spawn(caller(client.clone()));

    let (first, _, _) = peer.next_request().await;
    let (second, _, _) = peer.next_request().await;
    let mut ids = vec![first, second];
    ids.sort_unstable_by(|x, y| y.cmp(x));
    assert_eq!(ids, vec![2, 1]);

    for id in ids {
        peer.reply(id, Value::from(format!("reply-{}", id))).await;
    }

    for handle in [a, b] {
        let (id, reply) = handle.await.unwrap();
        assert_eq!(reply, Reply::Success(Value::from(format!("reply-{}", id))));
    }
}

#[tokio::test]
async fn test_try_claim_before_and_after_arrival() {
    let (client, mut peer) = connected_pair().await;

    let id = client.issue(5u64, vec![]).await.unwrap();
    assert!(client.try_claim(id).is_none());

    let (got, _, _) = peer.next_request().await;
    peer.reply(got, Value::from(10u64)).await;

    let reply = client.claim(id).await.unwrap();
    assert_eq!(reply, Reply::Success(Value::from(10u64)));
    assert!(client.try_claim(id).is_none());
}

#[tokio::test]
async fn test_malformed_frame_then_notification() {
    let (client, mut peer) = connected_pair().await;

    let malformed = Value::Array(vec![Value::from(1u64), Value::from(3u64)]);
    peer.send_raw(&encode_value(&malformed)).await;
    peer.send(Message::Notification {
        method: "redraw".into(),
        args: Value::Map(vec![]),
    })
    .await;

    let batch = tokio::time::timeout(Duration::from_secs(5), client.next_notifications())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].name, "redraw");
    assert_eq!(batch[0].args, Value::Map(vec![]));
    assert!(client.drain_notifications().is_empty());
}

#[tokio::test]
async fn test_notifications_keep_arrival_order() {
    let (client, mut peer) = connected_pair().await;

    for n in 0..20u64 {
        peer.send(Message::Notification {
            method: format!("event_{}", n),
            args: Value::from(n),
        })
        .await;
    }

    let mut seen = Vec::new();
    while seen.len() < 20 {
        let batch = tokio::time::timeout(Duration::from_secs(5), client.next_notifications())
            .await
            .unwrap()
            .unwrap();
        seen.extend(batch.into_iter().map(|n| n.name));
    }
    let expected: Vec<String> = (0..20).map(|n| format!("event_{}", n)).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_end_of_stream_releases_blocked_claim() {
    let (client, peer) = connected_pair().await;
    let client = Arc::new(client);

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.claim(7).await })
    };
    tokio::task::yield_now().await;

    drop(peer);

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("claim should be released")
        .unwrap();
    assert!(matches!(result, Err(WireError::ConnectionClosed)));
    assert!(client.is_closed());
    assert!(matches!(
        client.issue(5u64, vec![]).await,
        Err(WireError::ConnectionClosed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issue_allocates_distinct_ids() {
    let (client, mut peer) = connected_pair().await;
    let client = Arc::new(client);

    let drain = tokio::spawn(async move {
        let mut ids = Vec::new();
        for _ in 0..64 {
            let (id, _, _) = peer.next_request().await;
            ids.push(id);
        }
        ids
    });

    let issuers: Vec<_> = (0..64)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.issue(5u64, vec![]).await.unwrap() })
        })
        .collect();
    let mut issued: Vec<u64> = futures::future::join_all(issuers)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    issued.sort_unstable();

    let expected: Vec<u64> = (1..=64).collect();
    assert_eq!(issued, expected);

    let mut received = drain.await.unwrap();
    received.sort_unstable();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_bootstrap_error_reply_is_fatal() {
    let (ours, theirs) = tokio::io::duplex(4096);
    let mut peer = FakePeer::new(theirs);

    let serve = async {
        let (id, _, _) = peer.next_request().await;
        peer.send(Message::Response {
            id,
            error: Some(Value::from("no api for you")),
            result: Value::Nil,
        })
        .await;
    };

    let config = test_config();
    let (client, _) = tokio::join!(Client::from_stream(ours, &config), serve);
    assert!(matches!(client, Err(WireError::Bootstrap { .. })));
}

#[tokio::test]
async fn test_bootstrap_fails_when_peer_hangs_up() {
    let (ours, theirs) = tokio::io::duplex(4096);
    drop(theirs);

    let config = test_config();
    let result = Client::from_stream(ours, &config).await;
    assert!(matches!(result, Err(WireError::Bootstrap { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn test_connect_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nvim.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = FakePeer::new(stream);
        peer.serve_bootstrap().await;

        let (id, method, _) = peer.next_request().await;
        assert_eq!(method, 5);
        peer.reply(id, Value::from(120u64)).await;
    });

    let config = ConnectionConfig::with_socket_path(&path)
        .call_timeout(Some(Duration::from_secs(5)));
    let client = Client::connect(&config).await.unwrap();

    let length = client
        .call("buffer_get_length", vec![Value::from(1u64)])
        .await
        .unwrap();
    assert_eq!(length, Value::from(120u64));

    server.await.unwrap();
}
