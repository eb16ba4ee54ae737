//! Connection facade.
//!
//! A [`Client`] owns one connection: the dispatcher, the listener task, and
//! the catalog loaded by the handshake. It is the handle collaborators (a UI,
//! a shell, the CLI) pass around instead of any process-wide state.
//!
//! # Thread Safety
//!
//! `Client` is `Send + Sync`; share it behind an `Arc` to issue and claim from
//! several tasks at once.

use crate::bootstrap;
use crate::catalog::MethodCatalog;
use crate::config::ConnectionConfig;
use crate::error::{Result, WireError};
use crate::rpc::{Dispatcher, Listener, ListenerExit, MethodRef, Notification, Reply};
use crate::transport::{connect_local, split_stream};
use rmpv::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A bootstrapped connection to a Neovim peer.
#[derive(Debug)]
pub struct Client {
    dispatcher: Arc<Dispatcher>,
    listener: Option<JoinHandle<ListenerExit>>,
    config: ConnectionConfig,
}

impl Client {
    /// Connect to the socket named in `config` and run the handshake.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let stream = connect_local(&config.socket_path, config.connect_timeout).await?;
        info!("Connected to {}", config.socket_path.display());
        Self::from_stream(stream, config).await
    }

    /// Connect using the socket path from the environment.
    pub async fn connect_default() -> Result<Self> {
        Self::connect(&ConnectionConfig::from_env()).await
    }

    /// Start the runtime over an already connected stream and run the handshake.
    pub async fn from_stream<S>(stream: S, config: &ConnectionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (reader, writer) = split_stream(stream);
        let dispatcher = Arc::new(Dispatcher::new(writer));
        let listener = Listener::new(reader, dispatcher.clone(), config).spawn();

        let client = Self {
            dispatcher,
            listener: Some(listener),
            config: config.clone(),
        };

        // Dropping `client` on error tears the listener down again.
        bootstrap::run_handshake(&client.dispatcher, config.bootstrap_timeout).await?;
        debug!("Handshake complete");
        Ok(client)
    }

    /// The shared correlation engine, for issuing and claiming directly.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn catalog(&self) -> Result<&MethodCatalog> {
        self.dispatcher.catalog().ok_or(WireError::CatalogUnavailable)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Call a method and wait for its result.
    ///
    /// Applies the configured call timeout. An error reply from the peer is
    /// returned as `WireError::Remote`.
    pub async fn call<'a>(&self, method: impl Into<MethodRef<'a>>, args: Vec<Value>) -> Result<Value> {
        let id = self.dispatcher.issue(method, args).await?;
        let reply = match self.config.call_timeout {
            Some(timeout) => self.dispatcher.claim_timeout(id, timeout).await?,
            None => self.dispatcher.claim(id).await?,
        };
        reply.into_result().map_err(WireError::Remote)
    }

    /// Send a request without waiting. Collect the reply with [`Client::claim`].
    pub async fn issue<'a>(&self, method: impl Into<MethodRef<'a>>, args: Vec<Value>) -> Result<u64> {
        self.dispatcher.issue(method, args).await
    }

    /// Wait for the reply to a request sent with [`Client::issue`].
    pub async fn claim(&self, id: u64) -> Result<Reply> {
        self.dispatcher.claim(id).await
    }

    pub fn try_claim(&self, id: u64) -> Option<Reply> {
        self.dispatcher.try_claim(id)
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.dispatcher.drain_notifications()
    }

    pub async fn next_notifications(&self) -> Result<Vec<Notification>> {
        self.dispatcher.next_notifications().await
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    /// Stop the listener and fail every pending claim.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
        self.dispatcher.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}
