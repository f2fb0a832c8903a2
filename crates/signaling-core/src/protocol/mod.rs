//! Protocol module containing the byte-stream framing codec and the JSON
//! control envelope.

pub mod envelope;
pub mod framing;

pub use envelope::{ControlEnvelope, Credential, EnvelopeError, LoginRequest, ObjectType};
pub use framing::{decode_length, decode_object, encode_object, FramingError, FRAME_HEADER_SIZE};
