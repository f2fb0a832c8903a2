//! ClientSession: the browser half of one relay session.
//!
//! A pure state machine over inbound events.  It never touches the WebSocket
//! directly: everything it wants to send goes out through an [`Outbound`]
//! channel that the server's writer task drains.
//!
//! ```text
//! AwaitingLogin ── valid login, device started ──► Relaying ──► Closed
//!       │                                              │
//!       └── bad payload (1007) / binary (1000) ────────┴──► Closed
//! ```

use std::sync::Arc;

use signaling_core::{ControlEnvelope, LoginRequest};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::device_session::{DeviceEvent, DeviceSession};
use super::transport::{ConnectOptions, DeviceConnector};
use crate::domain::{BridgeConfig, ClientSessionState, CloseDirective, SessionId};

/// Capacity of the per-session device event channel.
const DEVICE_EVENT_CAPACITY: usize = 128;

/// Something the session wants written to the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame; nothing follows it.
    Close(CloseDirective),
}

pub struct ClientSession {
    id: SessionId,
    state: ClientSessionState,
    connector: Arc<dyn DeviceConnector>,
    config: Arc<BridgeConfig>,
    outbound: mpsc::Sender<Outbound>,
    device: Option<DeviceSession>,
    device_events: mpsc::Sender<DeviceEvent>,
}

impl ClientSession {
    /// Creates a session in `AwaitingLogin`.
    ///
    /// The returned receiver yields the device events for this session and
    /// must be polled by whoever drives it.
    pub fn new(
        id: SessionId,
        connector: Arc<dyn DeviceConnector>,
        config: Arc<BridgeConfig>,
        outbound: mpsc::Sender<Outbound>,
    ) -> (Self, mpsc::Receiver<DeviceEvent>) {
        let (device_events, device_rx) = mpsc::channel(DEVICE_EVENT_CAPACITY);
        let session = Self {
            id,
            state: ClientSessionState::AwaitingLogin,
            connector,
            config,
            outbound,
            device: None,
            device_events,
        };
        (session, device_rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> ClientSessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ClientSessionState::Closed
    }

    pub fn has_device_session(&self) -> bool {
        self.device.is_some()
    }

    /// Handles one WebSocket text message.
    pub async fn on_text(&mut self, text: &str) {
        match self.state {
            ClientSessionState::AwaitingLogin => match ControlEnvelope::parse(text) {
                Ok(ControlEnvelope::LoginRequest(login)) => self.login(login).await,
                Ok(other) => {
                    warn!(
                        "session {}: expected login request, got {:?}",
                        self.id,
                        other.object_type()
                    );
                    self.close_with(CloseDirective::UNSUPPORTED_PAYLOAD).await;
                }
                Err(e) => {
                    warn!("session {}: rejected login payload: {e}", self.id);
                    self.close_with(CloseDirective::UNSUPPORTED_PAYLOAD).await;
                }
            },
            ClientSessionState::Relaying => self.forward(text.as_bytes()).await,
            ClientSessionState::Closed => {}
        }
    }

    /// Handles one WebSocket binary message.
    pub async fn on_binary(&mut self, bytes: &[u8]) {
        match self.state {
            ClientSessionState::AwaitingLogin => {
                warn!("session {}: binary message before login", self.id);
                self.close_with(CloseDirective::DEVICE_CONNECTION_CLOSED).await;
            }
            ClientSessionState::Relaying => self.forward(bytes).await,
            ClientSessionState::Closed => {}
        }
    }

    /// Handles one event from the device read loop.
    pub async fn on_device_event(&mut self, event: DeviceEvent) {
        if self.is_closed() {
            return;
        }
        match event {
            DeviceEvent::Object(payload) => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                self.send(Outbound::Text(text)).await;
            }
            DeviceEvent::StreamFailed(reason) => {
                error!("session {}: device stream lost: {reason}", self.id);
                self.close_with(CloseDirective::INTERNAL_ERROR).await;
            }
        }
    }

    /// Sends a close frame and tears the session down.  No-op once closed.
    pub async fn close_with(&mut self, directive: CloseDirective) {
        if self.is_closed() {
            return;
        }
        info!(
            "session {}: closing WebSocket with {} {}",
            self.id, directive.code, directive.reason
        );
        self.send(Outbound::Close(directive)).await;
        self.shutdown().await;
    }

    /// Stops the device session (best effort) and marks the session closed.
    ///
    /// Safe to call any number of times.
    pub async fn shutdown(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop().await;
        }
        if self.state != ClientSessionState::Closed {
            debug!("session {}: {:?} → Closed", self.id, self.state);
            self.state = ClientSessionState::Closed;
        }
    }

    async fn login(&mut self, login: LoginRequest) {
        info!(
            "session {}: login for device {} as {}",
            self.id, login.device_id, login.username
        );
        let options = ConnectOptions::from_login(login, self.config.server_url.clone());
        let mut device = DeviceSession::new(self.id, &self.config);

        match device
            .start(self.connector.as_ref(), options, self.device_events.clone())
            .await
        {
            Ok(()) => {
                self.device = Some(device);
                self.state = ClientSessionState::Relaying;
                self.send(Outbound::Text(ControlEnvelope::LoginResponse.to_json()))
                    .await;
                info!("session {}: relaying", self.id);
            }
            Err(e) => {
                error!("session {}: device session failed to start: {e}", self.id);
                self.close_with(CloseDirective::INTERNAL_ERROR).await;
            }
        }
    }

    async fn forward(&mut self, payload: &[u8]) {
        let result = match &self.device {
            Some(device) => device.write_object(payload).await,
            None => {
                error!("session {}: relaying without a device session", self.id);
                self.close_with(CloseDirective::INTERNAL_ERROR).await;
                return;
            }
        };
        if let Err(e) = result {
            error!("session {}: write to device failed: {e}", self.id);
            self.close_with(CloseDirective::INTERNAL_ERROR).await;
        }
    }

    async fn send(&self, message: Outbound) {
        if self.outbound.send(message).await.is_err() {
            debug!("session {}: WebSocket writer already gone", self.id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
