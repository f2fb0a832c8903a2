//! Application layer: session logic independent of sockets.
//!
//! - [`transport`]      – the device connection seam (traits + value types).
//! - [`discovery`]      – `/webrtc/info` stream-port resolution.
//! - [`device_session`] – device connection, stream read loop and writes.
//! - [`client_session`] – per-browser login and relay state machine.
//! - [`registry`]       – the set of live sessions.

pub mod client_session;
pub mod device_session;
pub mod discovery;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake_device;

pub use client_session::{ClientSession, Outbound};
pub use device_session::{DeviceEvent, DeviceSession, SessionError};
pub use discovery::{resolve_stream_port, DiscoveryError, WebrtcInfo};
pub use registry::SessionRegistry;
pub use transport::{
    ConnectOptions, DeviceConnection, DeviceConnector, DeviceStream, QueryResponse,
    TransportError,
};
