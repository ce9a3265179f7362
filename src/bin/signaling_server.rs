//! Standalone signaling server binary
//!
//! Run with:
//!   cargo run --bin signaling-server -- --port 8080
//!
//! With TLS:
//!   cargo run --bin signaling-server -- --port 8443 --cert cert.pem --key key.pem

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bubblevoice::signaling::{create_tls_acceptor, SignalingServer, DEFAULT_PORT};

/// Signaling relay for bubblevoice rooms
#[derive(Parser, Debug)]
#[command(name = "signaling-server")]
#[command(about = "Signaling relay for bubblevoice rooms")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "BUBBLEVOICE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "BUBBLEVOICE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Path to TLS certificate file (PEM format)
    #[arg(long, env = "BUBBLEVOICE_TLS_CERT")]
    cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, env = "BUBBLEVOICE_TLS_KEY")]
    key: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let tls_acceptor = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => {
            info!("TLS enabled with cert: {:?}, key: {:?}", cert, key);
            Some(create_tls_acceptor(cert, key)?)
        }
        (Some(_), None) | (None, Some(_)) => {
            error!("Both --cert and --key must be provided for TLS");
            bail!("TLS configuration incomplete");
        }
        (None, None) => {
            warn!("TLS disabled - running in plain WebSocket mode");
            None
        }
    };

    let server = SignalingServer::new();
    match tls_acceptor {
        Some(acceptor) => {
            info!("Protocol: wss:// (WebSocket Secure)");
            server.run_tls(&addr.to_string(), acceptor).await?;
        }
        None => {
            info!("Protocol: ws:// (WebSocket)");
            server.run(&addr.to_string()).await?;
        }
    }

    Ok(())
}
