//! Device transport seam.
//!
//! The relay does not know how a secure device connection is established.  It
//! consumes it through the traits below: connect with some options, run one
//! request/response query, open a byte stream on a numeric port, close.
//! `infrastructure::tcp_gateway` provides a TCP implementation; tests provide
//! in-memory fakes.

use std::fmt;

use async_trait::async_trait;
use signaling_core::{Credential, LoginRequest};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Status codes used by the query primitive.
pub mod status {
    /// Request accepted, resource created (used for connect and stream open).
    pub const CREATED: u16 = 201;
    /// Request succeeded and the payload carries content.
    pub const CONTENT: u16 = 205;
    /// Resource not present on the device.
    pub const NOT_FOUND: u16 = 404;
}

/// Content-format tag for CBOR payloads.
pub const CONTENT_FORMAT_CBOR: u16 = 60;

/// Errors reported by a device transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device connect failed: {0}")]
    Connect(String),

    #[error("opening stream on port {port} failed: {reason}")]
    StreamOpen { port: u32, reason: String },

    #[error("transport protocol error: {0}")]
    Protocol(String),

    #[error("device connection already closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for one device connection.
///
/// Built from a validated login request plus relay configuration.  The
/// password and credential are passed through opaquely and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub product_id: String,
    pub device_id: String,
    pub credential: Credential,
    pub username: String,
    pub password: String,
    pub server_url: Option<String>,
}

impl ConnectOptions {
    pub fn from_login(login: LoginRequest, server_url: Option<String>) -> Self {
        Self {
            product_id: login.product_id,
            device_id: login.device_id,
            credential: login.credential,
            username: login.username,
            password: login.password,
            server_url,
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("product_id", &self.product_id)
            .field("device_id", &self.device_id)
            .field("credential", &self.credential)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_url", &self.server_url)
            .finish()
    }
}

/// Result of a request/response query against the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub status: u16,
    pub content_format: Option<u16>,
    pub payload: Vec<u8>,
}

pub type StreamReader = Box<dyn AsyncRead + Send + Unpin>;
pub type StreamWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open byte-stream channel, already split so reads and writes can be
/// driven from different tasks.
pub struct DeviceStream {
    pub reader: StreamReader,
    pub writer: StreamWriter,
}

impl fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceStream { .. }")
    }
}

/// Establishes device connections.
///
/// One connector is shared by every session; each call produces an
/// independent connection.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, options: ConnectOptions)
        -> Result<Box<dyn DeviceConnection>, TransportError>;
}

/// One established device connection.
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    /// Runs a single request/response query such as `GET /webrtc/info`.
    async fn query(&self, method: &str, path: &str) -> Result<QueryResponse, TransportError>;

    /// Opens a byte-stream channel on `port`.
    async fn open_stream(&self, port: u32) -> Result<DeviceStream, TransportError>;

    /// Closes the connection and every stream opened on it.
    ///
    /// Implementations must tolerate repeated calls.
    async fn close(&self) -> Result<(), TransportError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
