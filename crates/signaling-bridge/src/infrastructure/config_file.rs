//! Optional TOML configuration file.
//!
//! Every key is optional.  Keys that are present override the built-in
//! defaults; command-line flags and `SIGNALING_*` environment variables in
//! turn override the file (see `main.rs`).
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 6503
//!
//! [gateway]
//! host = "127.0.0.1"
//! port = 6504
//! server_url = "https://devices.example.com"
//!
//! [session]
//! fallback_stream_port = 42
//! connect_timeout_secs = 10
//! io_timeout_secs = 10
//! write_retries = 3
//! write_backoff_ms = 50
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{BridgeConfig, PortDiscoveryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub gateway: GatewaySection,
    pub session: SessionSection,
}

/// WebSocket listener.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Device gateway used by the TCP transport.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub server_url: Option<String>,
}

/// Per-session device behaviour.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub fallback_stream_port: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub write_retries: Option<u32>,
    pub write_backoff_ms: Option<u64>,
}

impl FileConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the config file at `path`.
    ///
    /// Unlike the defaults, an explicitly named file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Overrides the fields of `config` that this file sets.
    pub fn apply_to(&self, config: &mut BridgeConfig) -> Result<(), ConfigError> {
        if let Some(bind) = &self.server.bind {
            config.ws_bind_addr.set_ip(parse_ip("server.bind", bind)?);
        }
        if let Some(port) = self.server.port {
            config.ws_bind_addr.set_port(port);
        }

        if let Some(host) = &self.gateway.host {
            let ip = parse_ip("gateway.host", host)?;
            config.gateway_addr = SocketAddr::new(ip, config.gateway_addr.port());
        }
        if let Some(port) = self.gateway.port {
            config.gateway_addr.set_port(port);
        }
        if let Some(url) = &self.gateway.server_url {
            config.server_url = Some(url.clone());
        }

        let session = &self.session;
        if let Some(port) = session.fallback_stream_port {
            config.port_discovery = PortDiscoveryPolicy::Fallback(port);
        }
        if let Some(secs) = session.connect_timeout_secs {
            config.connect_timeout = positive_secs("session.connect_timeout_secs", secs)?;
        }
        if let Some(secs) = session.io_timeout_secs {
            config.io_timeout = positive_secs("session.io_timeout_secs", secs)?;
        }
        if let Some(retries) = session.write_retries {
            config.write_retry.max_attempts = retries.max(1);
        }
        if let Some(ms) = session.write_backoff_ms {
            config.write_retry.initial_backoff = Duration::from_millis(ms);
        }
        Ok(())
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_owned(),
    })
}

fn positive_secs(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            value: secs.to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
