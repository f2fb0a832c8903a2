//! # signaling-bridge
//!
//! Relays WebRTC signaling between a browser and a remote device.
//!
//! ```text
//! Browser  ──(WebSocket, JSON text)──►  signaling-bridge  ──(framed byte stream)──►  Device
//!          ◄─────────────────────────                     ◄──────────────────────
//! ```
//!
//! The browser logs in with a JSON control envelope.  The bridge then opens a
//! device connection, asks the device which stream port to use, opens that
//! stream and relays traffic both ways: every WebSocket message becomes one
//! length-prefixed object on the stream, and every object read from the
//! stream becomes one WebSocket text message.
//!
//! ## Layers
//!
//! - [`domain`]         – configuration and session state types; no I/O.
//! - [`application`]    – session state machines and the device transport seam.
//! - [`infrastructure`] – WebSocket server, TCP gateway transport, config file.

pub mod application;
pub mod domain;
pub mod infrastructure;
