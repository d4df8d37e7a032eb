//! HTTP(S) forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                 FORWARD PROXY                │
//!     Client             │  ┌──────────┐   ┌─────────┐                  │
//!     ───────────────────┼─▶│ listener │──▶│  http   │── CONNECT ──┐    │
//!     (plain or TLS)     │  │ + tls    │   │ server  │             ▼    │
//!                        │  └──────────┘   └────┬────┘        ┌────────┐│
//!                        │                      │ absolute    │ hijack ││
//!                        │                      ▼ URI         │ + relay│┼──▶ Target
//!                        │               ┌─────────────┐      └────────┘│
//!                        │               │ headers +   │                │
//!     ◀──────────────────┼───────────────│ body copier │◀───────────────┼─── Upstream
//!                        │               └─────────────┘                │
//!                        │  config · observability · lifecycle          │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use relay_proxy::config::{load_config, ProxyConfig};
use relay_proxy::lifecycle::{wait_for_signal, Shutdown};
use relay_proxy::net::listener::Listener;
use relay_proxy::net::tls::ServerTlsConfig;
use relay_proxy::observability::{init_logging, metrics};
use relay_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "relay-proxy")]
#[command(about = "HTTP(S) forward proxy with CONNECT tunneling", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    init_logging(level)?;

    tracing::info!("relay-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tls = config.listener.tls.is_some(),
        connect_timeout_secs = config.timeouts.connect_secs,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let tls = match &config.listener.tls {
        Some(settings) => {
            let tls = ServerTlsConfig::from_settings(settings)?;
            tracing::info!(client_auth = ?tls.client_auth(), "TLS enabled");
            Some(tls)
        }
        None => None,
    };

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested");
        signal_shutdown.trigger();
    });

    let server = ProxyServer::new(config, tls, &shutdown);
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
