//! Domain layer for signaling-bridge.
//!
//! Pure types with no I/O, no async runtime, and no sockets: runtime
//! configuration, session identities, the two session state machines, and
//! the WebSocket close directives the relay can issue.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or WebSocket types
//! - File I/O or environment variable reading
//! - The device transport traits (those live in the application layer)

pub mod config;
pub mod session;

pub use config::{BridgeConfig, PortDiscoveryPolicy, WriteRetryPolicy};
pub use session::{ClientSessionState, CloseDirective, DeviceSessionState, SessionId};
