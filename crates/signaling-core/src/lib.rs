//! # signaling-core
//!
//! Shared protocol pieces for the signaling relay bridge.
//!
//! The bridge sits between a browser WebSocket and a device byte stream.  Two
//! wire formats meet in the middle:
//!
//! - **`protocol::framing`** – the device side.  Every object on the byte
//!   stream is a 4-byte little-endian length followed by that many payload
//!   bytes.  The payload is opaque.
//!
//! - **`protocol::envelope`** – the browser side.  JSON objects tagged with an
//!   integer `type` field.  Only the login request and login response are
//!   interpreted by the relay; everything else is forwarded untouched.
//!
//! This crate does no I/O.  It depends on nothing async and can be tested
//! entirely with byte slices and strings.

pub mod protocol;

pub use protocol::envelope::{ControlEnvelope, Credential, EnvelopeError, LoginRequest, ObjectType};
pub use protocol::framing::{decode_length, decode_object, encode_object, FramingError, FRAME_HEADER_SIZE};
