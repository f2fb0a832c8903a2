//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket, echoing the `json`
//!    subprotocol when the browser offers it.
//! 3. Registering the session and running it in its own tasks:
//!    - **Driver**: reads WebSocket messages and device events and feeds
//!      them to the [`ClientSession`] state machine.
//!    - **Writer**: drains the session's outbound channel into the WebSocket
//!      sink, ending with a close frame when the session asks for one.
//!    - **Device reader**: spawned by the device session once the stream is
//!      open (see `application::device_session`).
//! 4. Deregistering the session once the driver finishes, whatever the cause.
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! A panic inside a driver task is caught at the join handle: the browser gets
//! a `1011` close and the accept loop keeps running.  The device connection is
//! still closed, from the device session's `Drop`.
//!
//! The driver keeps reading the browser while a login or device write is in
//! flight, so a browser that leaves mid-login abandons the login at once.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::{ClientSession, DeviceConnector, DeviceEvent, Outbound, SessionRegistry};
use crate::domain::{BridgeConfig, CloseDirective, SessionId};

/// Subprotocol advertised to browsers.
pub const WS_SUBPROTOCOL: &str = "json";

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Capacity of the per-session outbound channel.
const OUTBOUND_CAPACITY: usize = 128;

// ── Public API ────────────────────────────────────────────────────────────────

/// The relay server: configuration, device connector and live sessions.
pub struct RelayServer {
    config: Arc<BridgeConfig>,
    connector: Arc<dyn DeviceConnector>,
    registry: Arc<SessionRegistry>,
}

impl RelayServer {
    pub fn new(config: BridgeConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Binds the WebSocket listener on `config.ws_bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is in use or cannot be bound.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.config.ws_bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
        info!(
            "signaling relay listening on {}",
            listener.local_addr().unwrap_or(addr)
        );
        Ok(listener)
    }

    /// Accepts connections on `listener` until `running` is cleared.
    ///
    /// Each connection runs in its own task, so one slow browser never blocks
    /// the others.  Sessions already running are left to finish on their own.
    pub async fn serve(&self, listener: TcpListener, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    debug!("new connection from {peer_addr}");
                    let config = Arc::clone(&self.config);
                    let connector = Arc::clone(&self.connector);
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, peer_addr, config, connector, registry).await
                        {
                            warn!("connection from {peer_addr} failed: {e:#}");
                        }
                    });
                }
                Ok(Err(e)) => {
                    // Transient (e.g. out of file descriptors); keep serving.
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        Ok(())
    }
}

/// Binds `config.ws_bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    config: BridgeConfig,
    connector: Arc<dyn DeviceConnector>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let server = RelayServer::new(config, connector);
    let listener = server.bind().await?;
    server.serve(listener, running).await
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Echoes the `json` subprotocol when the browser lists it.
fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == WS_SUBPROTOCOL);

    if offered {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_SUBPROTOCOL));
    }
    Ok(response)
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<BridgeConfig>,
    connector: Arc<dyn DeviceConnector>,
    registry: Arc<SessionRegistry>,
) -> anyhow::Result<()> {
    let ws_stream = accept_hdr_async(stream, negotiate_subprotocol)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let id = SessionId::new();
    registry.register(id, peer_addr).await;
    info!("session {id}: WebSocket established with {peer_addr}");

    let (sink, inbound) = ws_stream.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_outbound(id, sink, out_rx));

    let (session, device_rx) = ClientSession::new(id, connector, config, out_tx.clone());
    let driver = tokio::spawn(drive_session(session, inbound, device_rx));

    if let Err(e) = driver.await {
        if e.is_panic() {
            error!("session {id}: session task panicked; closing with 1011");
            let _ = out_tx.send(Outbound::Close(CloseDirective::INTERNAL_ERROR)).await;
        }
    }

    drop(out_tx);
    if let Err(e) = writer.await {
        debug!("session {id}: writer task ended abnormally: {e}");
    }

    registry.remove(id).await;
    info!("session {id}: closed");
    Ok(())
}

/// Feeds WebSocket messages and device events into `session` until it closes
/// or the browser goes away, then tears the session down.
async fn drive_session<S>(
    mut session: ClientSession,
    mut inbound: S,
    mut device_rx: mpsc::Receiver<DeviceEvent>,
) where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let id = session.id();

    while !session.is_closed() {
        tokio::select! {
            message = next_data(id, &mut inbound) => match message {
                Some(message) => {
                    if !deliver(&mut session, &mut inbound, message).await {
                        break;
                    }
                }
                None => break,
            },
            Some(event) = device_rx.recv() => session.on_device_event(event).await,
        }
    }

    session.shutdown().await;
}

/// Returns the next text or binary message, or `None` once the browser is
/// gone.  Cancel safe.
async fn next_data<S>(id: SessionId, inbound: &mut S) -> Option<WsMessage>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        match inbound.next().await {
            Some(Ok(message @ (WsMessage::Text(_) | WsMessage::Binary(_)))) => return Some(message),
            Some(Ok(WsMessage::Close(frame))) => {
                debug!("session {id}: browser closed the WebSocket ({frame:?})");
                return None;
            }
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                debug!("session {id}: browser stream ended");
                return None;
            }
            Some(Err(e)) => {
                warn!("session {id}: WebSocket error: {e}");
                return None;
            }
        }
    }
}

/// Hands `first` to the session while still watching the browser.
///
/// Login and device writes can take up to their timeouts.  Messages arriving
/// meanwhile are queued and handed over in order.  Returns `false` if the
/// browser went away first, dropping the step in flight.
async fn deliver<S>(session: &mut ClientSession, inbound: &mut S, first: WsMessage) -> bool
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let id = session.id();
    let mut pending = VecDeque::from([first]);

    while let Some(message) = pending.pop_front() {
        if session.is_closed() {
            break;
        }
        let step = on_message(session, message);
        tokio::pin!(step);
        loop {
            tokio::select! {
                biased;
                () = &mut step => break,
                next = next_data(id, inbound) => match next {
                    Some(message) => pending.push_back(message),
                    None => {
                        debug!("session {id}: browser gone mid-step; abandoning it");
                        return false;
                    }
                },
            }
        }
    }
    true
}

async fn on_message(session: &mut ClientSession, message: WsMessage) {
    match message {
        WsMessage::Text(text) => session.on_text(&text).await,
        WsMessage::Binary(bytes) => session.on_binary(&bytes).await,
        _ => {}
    }
}

/// Drains `outbound` into the WebSocket sink.
async fn write_outbound<S>(id: SessionId, mut sink: S, mut outbound: mpsc::Receiver<Outbound>)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!("session {id}: WebSocket send failed: {e}");
                    break;
                }
            }
            Outbound::Close(directive) => {
                let frame = CloseFrame {
                    code: CloseCode::from(directive.code),
                    reason: directive.reason.into(),
                };
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!("session {id}: close frame not delivered: {e}");
                }
                break;
            }
        }
    }

    let _ = sink.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
