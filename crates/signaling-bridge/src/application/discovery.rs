//! Stream-port discovery.
//!
//! Before opening the signaling stream the relay asks the device which port
//! to use: `GET /webrtc/info`.  A `205 Content` reply carries a CBOR map with
//! an integer `SignalingStreamPort` entry.

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::transport::{status, QueryResponse};
use crate::domain::PortDiscoveryPolicy;

/// Query path for the discovery request.
pub const WEBRTC_INFO_PATH: &str = "/webrtc/info";

/// Method for the discovery request.
pub const WEBRTC_INFO_METHOD: &str = "GET";

/// Decoded `/webrtc/info` payload.  Unknown map entries are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WebrtcInfo {
    #[serde(rename = "SignalingStreamPort")]
    pub signaling_stream_port: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("device answered /webrtc/info with status {0}")]
    UnexpectedStatus(u16),

    #[error("invalid /webrtc/info payload: {0}")]
    InvalidPayload(String),
}

/// Decodes a CBOR `/webrtc/info` payload.
pub fn decode_webrtc_info(payload: &[u8]) -> Result<WebrtcInfo, DiscoveryError> {
    ciborium::de::from_reader(payload).map_err(|e| DiscoveryError::InvalidPayload(e.to_string()))
}

/// Picks the stream port from a discovery response.
///
/// A `205` reply must decode; a malformed payload is an error under every
/// policy.  Any other status is an error under [`PortDiscoveryPolicy::Strict`]
/// and yields the configured port under [`PortDiscoveryPolicy::Fallback`].
pub fn resolve_stream_port(
    response: &QueryResponse,
    policy: PortDiscoveryPolicy,
) -> Result<u32, DiscoveryError> {
    if response.status == status::CONTENT {
        return decode_webrtc_info(&response.payload).map(|info| info.signaling_stream_port);
    }

    match policy {
        PortDiscoveryPolicy::Strict => Err(DiscoveryError::UnexpectedStatus(response.status)),
        PortDiscoveryPolicy::Fallback(port) => {
            warn!(
                "/webrtc/info returned status {}; falling back to stream port {port}",
                response.status
            );
            Ok(port)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct InfoOut {
        #[serde(rename = "SignalingStreamPort")]
        port: u32,
        #[serde(rename = "Extra")]
        extra: &'static str,
    }

    fn cbor<T: Serialize>(value: &T) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out).unwrap();
        out
    }

    fn response(status: u16, payload: Vec<u8>) -> QueryResponse {
        QueryResponse {
            status,
            content_format: None,
            payload,
        }
    }

    #[test]
    fn test_content_reply_yields_advertised_port() {
        // Arrange
        let payload = cbor(&InfoOut {
            port: 4242,
            extra: "ignored",
        });

        // Act
        let port = resolve_stream_port(&response(205, payload), PortDiscoveryPolicy::Strict);

        // Assert
        assert_eq!(port, Ok(4242));
    }

    #[test]
    fn test_not_found_is_error_when_strict() {
        let result = resolve_stream_port(&response(404, vec![]), PortDiscoveryPolicy::Strict);
        assert_eq!(result, Err(DiscoveryError::UnexpectedStatus(404)));
    }

    #[test]
    fn test_not_found_uses_fallback_port() {
        let result =
            resolve_stream_port(&response(404, vec![]), PortDiscoveryPolicy::Fallback(42));
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_malformed_payload_is_error_even_with_fallback() {
        // 0xFF alone is a CBOR "break" with nothing to terminate.
        let result =
            resolve_stream_port(&response(205, vec![0xFF]), PortDiscoveryPolicy::Fallback(42));
        assert!(matches!(result, Err(DiscoveryError::InvalidPayload(_))));
    }

    #[test]
    fn test_payload_without_port_is_invalid() {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(&std::collections::BTreeMap::from([("Other", 1u32)]), &mut payload)
            .unwrap();
        assert!(matches!(
            decode_webrtc_info(&payload),
            Err(DiscoveryError::InvalidPayload(_))
        ));
    }
}
