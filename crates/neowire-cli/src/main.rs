//! Neowire CLI - inspect and drive a running Neovim over its RPC socket.
//!
//! Connects to the socket named by `--socket` (or `NVIM_LISTEN_ADDRESS`),
//! runs the handshake, and then lists the API, calls one method, or prints
//! notifications as they arrive.

mod convert;
mod format;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neowire_core::{Client, ConnectionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "neowire")]
#[command(about = "MessagePack-RPC client for a running Neovim")]
struct Args {
    /// Socket to connect to (defaults to $NVIM_LISTEN_ADDRESS, then /tmp/neovim)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Seconds to wait for a call's reply (0 = wait forever)
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the methods the peer exposes
    Methods {
        /// Only show methods whose name contains this text
        filter: Option<String>,
    },
    /// Call a method and print its result as JSON
    Call {
        /// Method name or numeric id
        method: String,
        /// Arguments, each parsed as JSON (plain text is sent as a string)
        args: Vec<String>,
    },
    /// Print notifications until interrupted
    Listen {
        /// Stop after this many notifications
        #[arg(short, long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays clean for results
    FmtSubscriber::builder()
        .with_env_filter(log_filter(args.debug))
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = build_config(&args);
    debug!("Socket path: {}", config.socket_path.display());

    let client = Client::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.socket_path.display()))?;

    match args.command {
        Command::Methods { filter } => {
            let catalog = client.catalog()?;
            print!("{}", format::catalog_listing(catalog, filter.as_deref()));
        }
        Command::Call { method, args } => {
            let params = convert::parse_args(&args);
            let result = match method.parse::<u64>() {
                Ok(id) => client.call(id, params).await,
                Err(_) => client.call(method.as_str(), params).await,
            }
            .with_context(|| format!("call to {} failed", method))?;
            println!("{}", serde_json::to_string_pretty(&convert::value_to_json(&result))?);
        }
        Command::Listen { count } => listen(&client, count).await?,
    }

    Ok(())
}

/// `RUST_LOG` wins when set; otherwise `--debug` picks DEBUG over WARN.
fn log_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { LevelFilter::DEBUG } else { LevelFilter::WARN };
        EnvFilter::default().add_directive(level.into())
    })
}

fn build_config(args: &Args) -> ConnectionConfig {
    let config = match &args.socket {
        Some(path) => ConnectionConfig::with_socket_path(path),
        None => ConnectionConfig::from_env(),
    };
    let timeout = (args.timeout > 0).then(|| Duration::from_secs(args.timeout));
    config.call_timeout(timeout)
}

async fn listen(client: &Client, count: Option<usize>) -> Result<()> {
    let mut seen = 0usize;
    loop {
        let batch = tokio::select! {
            batch = client.next_notifications() => batch,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, exiting");
                return Ok(());
            }
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) if e.is_connection_loss() => {
                info!("Peer closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for note in batch {
            let line = serde_json::json!({
                "name": note.name,
                "args": convert::value_to_json(&note.args),
            });
            println!("{}", line);

            seen += 1;
            if count.is_some_and(|limit| seen >= limit) {
                return Ok(());
            }
        }
    }
}
