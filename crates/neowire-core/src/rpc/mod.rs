//! MessagePack-RPC correlation engine.
//!
//! # Architecture
//!
//! - **Message / Codec**: wire shapes and incremental decoding of the byte stream
//! - **Dispatcher**: id allocation, request writes, reply table, notification queue
//! - **Listener**: the single background task that reads the stream and feeds the dispatcher

pub mod codec;
pub mod dispatcher;
pub mod listener;
pub mod message;

pub use codec::FrameCodec;
pub use dispatcher::{
    DepositOutcome, Dispatcher, MethodRef, Notification, Reply, BOOTSTRAP_METHOD_ID,
};
pub use listener::{Listener, ListenerExit};
pub use message::Message;
