//! Device transport over TCP to a device gateway process.
//!
//! The gateway terminates the secure device connection on the relay's behalf.
//! Control messages are CBOR maps carried in the same length-prefixed frames
//! the device stream uses:
//!
//! ```text
//! control socket:  Connect ─► 201      Query ─► {status, content_format, payload}
//!                  Close   ─► (socket shut down)
//!
//! stream socket:   OpenStream{port} ─► 201, then raw device stream bytes
//! ```
//!
//! Every opened stream gets its own TCP socket, so the stream bytes never mix
//! with control traffic.  Closing the connection shuts those sockets down too.

use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use signaling_core::{decode_length, encode_object, Credential, FRAME_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::application::transport::{
    status, ConnectOptions, DeviceConnection, DeviceConnector, DeviceStream, QueryResponse,
    TransportError,
};

/// Largest control frame accepted from the gateway.
pub const MAX_CONTROL_FRAME: usize = 1024 * 1024;

// ── Wire types ────────────────────────────────────────────────────────────────

/// Requests sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayRequest {
    Connect {
        product_id: String,
        device_id: String,
        credential_kind: String,
        credential: String,
        username: String,
        password: String,
        server_url: Option<String>,
    },
    Query {
        method: String,
        path: String,
    },
    OpenStream {
        product_id: String,
        device_id: String,
        port: u32,
    },
    Close,
}

impl GatewayRequest {
    fn connect(options: &ConnectOptions) -> Self {
        let (credential_kind, credential) = match &options.credential {
            Credential::ServerConnectToken(t) => ("sct", t.clone()),
            Credential::ServerKey(k) => ("serverKey", k.clone()),
        };
        GatewayRequest::Connect {
            product_id: options.product_id.clone(),
            device_id: options.device_id.clone(),
            credential_kind: credential_kind.to_owned(),
            credential,
            username: options.username.clone(),
            password: options.password.clone(),
            server_url: options.server_url.clone(),
        }
    }
}

/// Reply to every gateway request except `Close`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReply {
    pub status: u16,
    #[serde(default)]
    pub content_format: Option<u16>,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GatewayReply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_format: None,
            payload: Vec::new(),
            message: None,
        }
    }

    fn describe(&self) -> String {
        match &self.message {
            Some(m) => format!("status {}: {m}", self.status),
            None => format!("status {}", self.status),
        }
    }
}

// ── Control framing ───────────────────────────────────────────────────────────

/// Writes `value` as one CBOR control frame.
pub async fn write_control_frame<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let mut body = Vec::new();
    ciborium::ser::into_writer(value, &mut body)
        .map_err(|e| TransportError::Protocol(format!("encoding control frame: {e}")))?;
    let frame = encode_object(&body).map_err(|e| TransportError::Protocol(e.to_string()))?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one CBOR control frame.
///
/// Reads exactly the frame and nothing more, so raw stream bytes that follow
/// an `OpenStream` reply stay in the socket.
pub async fn read_control_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = decode_length(prefix) as usize;
    if len > MAX_CONTROL_FRAME {
        return Err(TransportError::Protocol(format!(
            "control frame of {len} bytes exceeds {MAX_CONTROL_FRAME}"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    ciborium::de::from_reader(body.as_slice())
        .map_err(|e| TransportError::Protocol(format!("decoding control frame: {e}")))
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// [`DeviceConnector`] backed by a device gateway reachable over TCP.
#[derive(Debug, Clone)]
pub struct TcpGatewayConnector {
    gateway_addr: SocketAddr,
}

impl TcpGatewayConnector {
    pub fn new(gateway_addr: SocketAddr) -> Self {
        Self { gateway_addr }
    }
}

#[async_trait]
impl DeviceConnector for TcpGatewayConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn DeviceConnection>, TransportError> {
        let mut control = TcpStream::connect(self.gateway_addr).await.map_err(|e| {
            TransportError::Connect(format!("gateway {} unreachable: {e}", self.gateway_addr))
        })?;
        // Control frames are small request/response pairs.
        control.set_nodelay(true)?;

        write_control_frame(&mut control, &GatewayRequest::connect(&options)).await?;
        let reply: GatewayReply = read_control_frame(&mut control).await?;
        if reply.status != status::CREATED {
            return Err(TransportError::Connect(format!(
                "gateway refused device {}: {}",
                options.device_id,
                reply.describe()
            )));
        }

        info!(
            "gateway {}: connected to device {}",
            self.gateway_addr, options.device_id
        );
        Ok(Box::new(TcpGatewayConnection {
            gateway_addr: self.gateway_addr,
            product_id: options.product_id,
            device_id: options.device_id,
            control: Mutex::new(control),
            streams: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One device connection held open by the gateway.
pub struct TcpGatewayConnection {
    gateway_addr: SocketAddr,
    product_id: String,
    device_id: String,
    control: Mutex<TcpStream>,
    /// Duplicated handles of every opened stream socket, shut down on close.
    streams: Mutex<Vec<std::net::TcpStream>>,
    closed: AtomicBool,
}

impl TcpGatewayConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceConnection for TcpGatewayConnection {
    async fn query(&self, method: &str, path: &str) -> Result<QueryResponse, TransportError> {
        self.ensure_open()?;
        let request = GatewayRequest::Query {
            method: method.to_owned(),
            path: path.to_owned(),
        };

        let mut control = self.control.lock().await;
        write_control_frame(&mut *control, &request).await?;
        let reply: GatewayReply = read_control_frame(&mut *control).await?;
        debug!(
            "gateway {}: {method} {path} → {}",
            self.gateway_addr, reply.status
        );

        Ok(QueryResponse {
            status: reply.status,
            content_format: reply.content_format,
            payload: reply.payload,
        })
    }

    async fn open_stream(&self, port: u32) -> Result<DeviceStream, TransportError> {
        self.ensure_open()?;
        let stream_open = |reason: String| TransportError::StreamOpen { port, reason };

        let mut socket = TcpStream::connect(self.gateway_addr)
            .await
            .map_err(|e| stream_open(e.to_string()))?;
        socket.set_nodelay(true)?;

        let request = GatewayRequest::OpenStream {
            product_id: self.product_id.clone(),
            device_id: self.device_id.clone(),
            port,
        };
        write_control_frame(&mut socket, &request).await?;
        let reply: GatewayReply = read_control_frame(&mut socket).await?;
        if reply.status != status::CREATED {
            return Err(stream_open(reply.describe()));
        }

        let socket = socket.into_std()?;
        self.streams.lock().await.push(socket.try_clone()?);
        let (reader, writer) = TcpStream::from_std(socket)?.into_split();
        Ok(DeviceStream {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut control = self.control.lock().await;
        // The gateway may already be gone; shutting down is what matters.
        if let Err(e) = write_control_frame(&mut *control, &GatewayRequest::Close).await {
            debug!("gateway {}: close request not delivered: {e}", self.gateway_addr);
        }
        control.shutdown().await?;
        drop(control);

        for stream in self.streams.lock().await.drain(..) {
            // NotConnected just means the stream already ended.
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("gateway {}: stream shutdown: {e}", self.gateway_addr);
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
