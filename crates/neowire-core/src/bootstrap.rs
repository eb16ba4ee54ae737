//! The method-0 handshake.
//!
//! Before any call can be made by name, the client asks the peer for its API
//! description and installs the resulting catalog on the dispatcher. Any
//! failure here is fatal to the connection.

use crate::catalog::MethodCatalog;
use crate::error::{Result, WireError};
use crate::rpc::{Dispatcher, BOOTSTRAP_METHOD_ID};
use std::time::Duration;
use tracing::{debug, info};

/// Request id the handshake must be sent under.
pub const BOOTSTRAP_REQUEST_ID: u64 = 0;

/// Ask the peer for its API description and decode it.
///
/// The listener must already be running, since the reply is collected
/// through the dispatcher like any other.
pub async fn fetch_catalog(dispatcher: &Dispatcher, timeout: Duration) -> Result<MethodCatalog> {
    let id = dispatcher
        .issue(BOOTSTRAP_METHOD_ID, Vec::new())
        .await
        .map_err(|e| WireError::bootstrap(format!("could not send API request: {}", e)))?;

    if id != BOOTSTRAP_REQUEST_ID {
        return Err(WireError::bootstrap(format!(
            "API request must be the first request on the connection, got id {}",
            id
        )));
    }

    debug!("Waiting for API description");
    let reply = dispatcher
        .claim_timeout(id, timeout)
        .await
        .map_err(|e| WireError::bootstrap(format!("no reply to API request: {}", e)))?;

    let result = reply
        .into_result()
        .map_err(|error| WireError::bootstrap(format!("peer rejected API request: {}", error)))?;

    MethodCatalog::from_bootstrap_result(&result)
}

/// Run the handshake and install the catalog on the dispatcher.
pub async fn run_handshake(dispatcher: &Dispatcher, timeout: Duration) -> Result<()> {
    let catalog = fetch_catalog(dispatcher, timeout).await?;
    info!(
        "Loaded API description: {} methods, {} classes",
        catalog.len(),
        catalog.classes().len()
    );

    if !dispatcher.install_catalog(catalog) {
        return Err(WireError::bootstrap("method catalog was already loaded"));
    }
    Ok(())
}
