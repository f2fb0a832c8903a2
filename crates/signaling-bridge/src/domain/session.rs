//! Session identities, lifecycle states, and close directives.

use std::fmt;

use uuid::Uuid;

/// Identity of one browser session, used as the registry key and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell sessions apart in a log.
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

/// Lifecycle of the device side of a session.
///
/// ```text
/// Idle → Connecting → StreamOpening → Connected → Closed
/// ```
///
/// There are no backwards transitions.  Any state may move to `Closed`, which
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSessionState {
    Idle,
    Connecting,
    StreamOpening,
    Connected,
    Closed,
}

impl DeviceSessionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: DeviceSessionState) -> bool {
        use DeviceSessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, StreamOpening)
                | (StreamOpening, Connected)
                | (Idle | Connecting | StreamOpening | Connected, Closed)
        )
    }
}

/// Lifecycle of the browser side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSessionState {
    /// WebSocket accepted; waiting for the login request.
    AwaitingLogin,
    /// Login succeeded; traffic is relayed in both directions.
    Relaying,
    /// Terminal.
    Closed,
}

/// WebSocket close code and reason sent when the relay ends a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseDirective {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseDirective {
    /// Malformed or incomplete login (1007).
    pub const UNSUPPORTED_PAYLOAD: Self = Self {
        code: 1007,
        reason: "SERVER_UNSUPPORTED_PAYLOAD",
    };

    /// Device connect, discovery, stream open, or stream I/O failure (1011).
    pub const INTERNAL_ERROR: Self = Self {
        code: 1011,
        reason: "SERVER_INTERNAL_ERROR",
    };

    /// Binary traffic before the device connection exists (1000).
    pub const DEVICE_CONNECTION_CLOSED: Self = Self {
        code: 1000,
        reason: "DEVICE_CONNECTION_CLOSED",
    };
}

// ── Tests ─────────────────────────────────────────────────────────────────────
