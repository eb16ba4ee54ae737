//! Neowire Core - MessagePack-RPC client runtime for Neovim.
//!
//! This crate talks to a running Neovim over its local socket. It assigns
//! request ids, writes calls, and runs one background listener that decodes
//! the incoming stream. Each response is routed to whichever task is waiting
//! on its id, and unsolicited notifications are queued until drained.
//!
//! Key translation, screen rendering, and parsing user input are left to the
//! caller. The runtime takes a method name (or id) plus already decoded
//! argument values.
//!
//! # Example
//!
//! ```rust,ignore
//! use neowire_core::{Client, ConnectionConfig};
//! use rmpv::Value;
//!
//! #[tokio::main]
//! async fn main() -> neowire_core::Result<()> {
//!     let client = Client::connect(&ConnectionConfig::from_env()).await?;
//!
//!     // Fire two requests, then collect the replies in any order
//!     let a = client.issue("vim_get_current_line", vec![]).await?;
//!     let b = client.issue("vim_eval", vec![Value::from("1 + 1")]).await?;
//!     let two = client.claim(b).await?.into_result();
//!     let line = client.claim(a).await?.into_result();
//!
//!     for note in client.drain_notifications() {
//!         println!("{}: {}", note.name, note.args);
//!     }
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod cancel;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod rpc;
pub mod transport;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use catalog::{MethodCatalog, MethodDescriptor, MethodParam};
pub use client::Client;
pub use config::ConnectionConfig;
pub use error::{Result, WireError};
pub use rpc::{
    DepositOutcome, Dispatcher, FrameCodec, Listener, ListenerExit, Message, MethodRef,
    Notification, Reply,
};

/// Re-exported so callers can build argument values without a separate dependency.
pub use rmpv::Value;
