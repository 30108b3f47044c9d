//! Parley server binary.
//!
//! # Usage
//!
//! ```bash
//! # Open server (empty password)
//! parley-server --bind 0.0.0.0:16482
//!
//! # Password-protected, shorter idle timeout
//! parley-server --password hunter2 --idle-secs 30
//! ```

use std::time::Duration;

use clap::Parser;
use parley_server::{DriverConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley chat server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Multi-user encrypted chat server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:16482")]
    bind: String,

    /// Shared password clients must prove knowledge of
    #[arg(short, long, default_value = "")]
    password: String,

    /// Seconds a new connection has to authenticate
    #[arg(long, default_value = "30")]
    inactivity_secs: u64,

    /// Seconds of silence before an authenticated user is dropped
    #[arg(long, default_value = "60")]
    idle_secs: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Event loop tick period in milliseconds
    #[arg(long, default_value = "250")]
    poll_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Parley server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.password.is_empty() {
        tracing::warn!("No password set - any client can authenticate");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        poll_interval: Duration::from_millis(args.poll_ms.max(1)),
        driver: DriverConfig {
            password: args.password,
            handshake_timeout: Duration::from_secs(args.inactivity_secs),
            idle_timeout: Duration::from_secs(args.idle_secs),
            max_connections: args.max_connections,
            ..Default::default()
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Interrupted, shutting down");
        })
        .await?;

    Ok(())
}
