//! Length-prefixed framing for the device byte stream.
//!
//! Wire format:
//! ```text
//! [payload_len:4][payload:N]
//! ```
//! The length is a little-endian `u32`.  The payload is never inspected: it is
//! usually UTF-8 JSON, but the codec treats it as raw bytes.

use thiserror::Error;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Errors that can occur while framing or unframing an object.
#[derive(Debug, Error, PartialEq)]
pub enum FramingError {
    /// The buffer does not contain a complete length prefix.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The length prefix declares more payload bytes than the buffer holds.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The payload cannot be described by a 32-bit length prefix.
    #[error("payload of {0} bytes exceeds the 32-bit length prefix")]
    PayloadTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Frames `payload` by prepending its 4-byte little-endian length.
///
/// The output is always exactly `payload.len() + 4` bytes long.
///
/// # Errors
///
/// Returns [`FramingError::PayloadTooLarge`] if the payload length does not
/// fit in a `u32`.
///
/// # Examples
///
/// ```rust
/// use signaling_core::protocol::framing::encode_object;
///
/// let framed = encode_object(b"hello").unwrap();
/// assert_eq!(&framed[..4], &[5, 0, 0, 0]);
/// assert_eq!(&framed[4..], b"hello");
/// ```
pub fn encode_object(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    let len = u32::try_from(payload.len()).map_err(|_| FramingError::PayloadTooLarge(payload.len()))?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Interprets a 4-byte length prefix as a little-endian `u32`.
///
/// Callers read exactly [`FRAME_HEADER_SIZE`] bytes from the stream first and
/// pass them here.
pub fn decode_length(prefix: [u8; FRAME_HEADER_SIZE]) -> u32 {
    u32::from_le_bytes(prefix)
}

/// Extracts one framed object from the beginning of `bytes`.
///
/// Returns the payload slice and the total number of bytes consumed (prefix +
/// payload) so the caller can advance its read cursor.  A partial object is
/// never returned.
///
/// # Errors
///
/// - [`FramingError::InsufficientData`] when fewer than 4 bytes are available.
/// - [`FramingError::PayloadLengthMismatch`] when the declared payload is not
///   fully present.
///
/// # Examples
///
/// ```rust
/// use signaling_core::protocol::framing::{decode_object, encode_object};
///
/// let framed = encode_object(b"{}").unwrap();
/// let (payload, consumed) = decode_object(&framed).unwrap();
/// assert_eq!(payload, b"{}");
/// assert_eq!(consumed, framed.len());
/// ```
pub fn decode_object(bytes: &[u8]) -> Result<(&[u8], usize), FramingError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(FramingError::InsufficientData {
            needed: FRAME_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let declared = decode_length([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let available = bytes.len() - FRAME_HEADER_SIZE;
    if available < declared {
        return Err(FramingError::PayloadLengthMismatch { declared, available });
    }

    let total = FRAME_HEADER_SIZE + declared;
    Ok((&bytes[FRAME_HEADER_SIZE..total], total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
