//! Signaling relay bridge: entry point.
//!
//! Accepts WebSocket connections from browsers, logs each one in against a
//! remote device through the device gateway, and relays WebRTC signaling
//! between the two.
//!
//! # Usage
//!
//! ```text
//! signaling-bridge [OPTIONS]
//!
//! Options:
//!   --config <FILE>                TOML configuration file
//!   --ws-bind <IP>                 WebSocket bind address [default: 0.0.0.0]
//!   --ws-port <PORT>               WebSocket listener port [default: 6503]
//!   --gateway-host <IP>            Device gateway address [default: 127.0.0.1]
//!   --gateway-port <PORT>          Device gateway port [default: 6504]
//!   --server-url <URL>             Device server URL passed to the gateway
//!   --fallback-stream-port <PORT>  Stream port to use when discovery fails
//!   --connect-timeout <SECS>       Bound on each setup step [default: 10]
//!   --io-timeout <SECS>            Bound on each stream write [default: 10]
//!   --write-retries <N>            Stream write attempts [default: 3]
//!   --write-backoff-ms <MS>        First write retry delay [default: 50]
//! ```
//!
//! Every option can also be given as a `SIGNALING_*` environment variable
//! (e.g. `SIGNALING_WS_PORT`).  Precedence, highest first: command line,
//! environment, config file, built-in default.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signaling_bridge::domain::{BridgeConfig, PortDiscoveryPolicy};
use signaling_bridge::infrastructure::config_file::FileConfig;
use signaling_bridge::infrastructure::tcp_gateway::TcpGatewayConnector;
use signaling_bridge::infrastructure::ws_server::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Signaling relay bridge.
///
/// Options left unset fall back to the config file, then to the built-in
/// defaults.
#[derive(Debug, Default, Parser)]
#[command(
    name = "signaling-bridge",
    about = "Relays WebRTC signaling between browser WebSockets and device streams",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "SIGNALING_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "SIGNALING_WS_BIND")]
    ws_bind: Option<IpAddr>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "SIGNALING_WS_PORT")]
    ws_port: Option<u16>,

    /// IP address of the device gateway.
    #[arg(long, env = "SIGNALING_GATEWAY_HOST")]
    gateway_host: Option<IpAddr>,

    /// TCP port of the device gateway.
    #[arg(long, env = "SIGNALING_GATEWAY_PORT")]
    gateway_port: Option<u16>,

    /// Device server URL passed through to the gateway on connect.
    #[arg(long, env = "SIGNALING_SERVER_URL")]
    server_url: Option<String>,

    /// Open the stream on this port when `/webrtc/info` does not answer 205.
    ///
    /// Without it such sessions fail with 1011.  Older devices expect 42.
    #[arg(long, env = "SIGNALING_FALLBACK_STREAM_PORT")]
    fallback_stream_port: Option<u32>,

    /// Seconds allowed for each of connect, discovery and stream open.
    #[arg(long, env = "SIGNALING_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Seconds allowed for one framed write to the device stream.
    #[arg(long, env = "SIGNALING_IO_TIMEOUT")]
    io_timeout: Option<u64>,

    /// Attempts per stream write, including the first.
    #[arg(long, env = "SIGNALING_WRITE_RETRIES")]
    write_retries: Option<u32>,

    /// Delay before the first write retry, in milliseconds.
    #[arg(long, env = "SIGNALING_WRITE_BACKOFF_MS")]
    write_backoff_ms: Option<u64>,
}

impl Cli {
    /// Builds the effective [`BridgeConfig`]: defaults, then the config file,
    /// then these arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or holds invalid
    /// values, or if a timeout argument is zero.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = BridgeConfig::default();

        if let Some(path) = &self.config {
            FileConfig::load(path)
                .and_then(|file| file.apply_to(&mut config))
                .with_context(|| format!("invalid config file {}", path.display()))?;
        }

        self.apply_to(&mut config)?;
        Ok(config)
    }

    fn apply_to(self, config: &mut BridgeConfig) -> anyhow::Result<()> {
        if let Some(ip) = self.ws_bind {
            config.ws_bind_addr.set_ip(ip);
        }
        if let Some(port) = self.ws_port {
            config.ws_bind_addr.set_port(port);
        }
        if let Some(ip) = self.gateway_host {
            config.gateway_addr = SocketAddr::new(ip, config.gateway_addr.port());
        }
        if let Some(port) = self.gateway_port {
            config.gateway_addr.set_port(port);
        }
        if self.server_url.is_some() {
            config.server_url = self.server_url;
        }
        if let Some(port) = self.fallback_stream_port {
            config.port_discovery = PortDiscoveryPolicy::Fallback(port);
        }
        if let Some(secs) = self.connect_timeout {
            ensure!(secs > 0, "--connect-timeout must be at least 1 second");
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.io_timeout {
            ensure!(secs > 0, "--io-timeout must be at least 1 second");
            config.io_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.write_retries {
            config.write_retry.max_attempts = retries.max(1);
        }
        if let Some(ms) = self.write_backoff_ms {
            config.write_retry.initial_backoff = Duration::from_millis(ms);
        }
        Ok(())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity; `info` when unset or invalid.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    info!(
        "signaling bridge starting: ws={}, gateway={}, discovery={:?}",
        config.ws_bind_addr, config.gateway_addr, config.port_discovery
    );

    // The accept loop checks this flag every 200 ms.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let connector = Arc::new(TcpGatewayConnector::new(config.gateway_addr));
    run_server(config, connector, running).await?;

    info!("signaling bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
