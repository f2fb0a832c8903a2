//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from CLI flags, environment variables and an optional
//! TOML file; tests build it directly or start from [`BridgeConfig::default`].

use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound for a single write backoff step.
const MAX_WRITE_BACKOFF: Duration = Duration::from_secs(2);

/// What to do when the `/webrtc/info` discovery query does not answer with
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDiscoveryPolicy {
    /// Fail the session with a server error.
    Strict,
    /// Open the stream on this port anyway.
    ///
    /// Older relays always fell back to port 42; enable this only for devices
    /// that do not implement the discovery endpoint.
    Fallback(u32),
}

/// Bounded retry policy for device stream writes.
///
/// A write is only retried while no byte of the frame has been accepted by the
/// stream.  Once part of a frame is on the wire a retry would corrupt the
/// framing, so any further error is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRetryPolicy {
    /// Total number of attempts, including the first one.  `1` disables retry.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each subsequent retry.
    pub initial_backoff: Duration,
}

impl WriteRetryPolicy {
    /// Returns the delay to wait after the `failed_attempts`-th failure.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use signaling_bridge::domain::WriteRetryPolicy;
    ///
    /// let p = WriteRetryPolicy { max_attempts: 4, initial_backoff: Duration::from_millis(50) };
    /// assert_eq!(p.backoff_for(1), Duration::from_millis(50));
    /// assert_eq!(p.backoff_for(2), Duration::from_millis(100));
    /// ```
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(MAX_WRITE_BACKOFF)
    }
}

impl Default for WriteRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use signaling_bridge::domain::{BridgeConfig, PortDiscoveryPolicy};
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 6503);
/// assert_eq!(cfg.port_discovery, PortDiscoveryPolicy::Strict);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the WebSocket server binds to.
    pub ws_bind_addr: SocketAddr,

    /// Address of the device gateway used by the TCP transport.
    pub gateway_addr: SocketAddr,

    /// Device server URL passed through to the device transport, if any.
    pub server_url: Option<String>,

    /// Behaviour when the stream-port discovery query fails.
    pub port_discovery: PortDiscoveryPolicy,

    /// Bound on each step of session setup: connect, discovery query, and
    /// stream open.
    pub connect_timeout: Duration,

    /// Bound on a single framed write to the device stream, retries included.
    pub io_timeout: Duration,

    /// Retry policy for device stream writes.
    pub write_retry: WriteRetryPolicy,
}

impl Default for BridgeConfig {
    /// | Field           | Default             |
    /// |-----------------|---------------------|
    /// | ws_bind_addr    | `0.0.0.0:6503`      |
    /// | gateway_addr    | `127.0.0.1:6504`    |
    /// | server_url      | none                |
    /// | port_discovery  | strict              |
    /// | connect_timeout | 10 seconds          |
    /// | io_timeout      | 10 seconds          |
    /// | write_retry     | 3 attempts, 50 ms   |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], 6503)),
            gateway_addr: SocketAddr::from(([127, 0, 0, 1], 6504)),
            server_url: None,
            port_discovery: PortDiscoveryPolicy::Strict,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(10),
            write_retry: WriteRetryPolicy::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
