//! JSON control envelope exchanged with the browser over the WebSocket.
//!
//! Every control message is a JSON object carrying an integer `type` field:
//!
//! ```json
//! {"type":20,"productId":"pr-1","deviceId":"de-1","username":"u","password":"pw","sct":"tok"}
//! {"type":21}
//! ```
//!
//! Serde's internally tagged enums only support string tags, so the envelope
//! is parsed in two steps: first into a JSON object, then the `type` field is
//! matched against [`ObjectType`] and the remaining fields are validated for
//! that variant.  Unknown tags are rejected rather than ignored.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while parsing a control envelope.
///
/// All of these are protocol violations caused by the browser.
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    /// The text was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The JSON value was not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// The object has no `type` field.
    #[error("envelope has no 'type' field")]
    MissingType,

    /// The `type` field is present but not a non-negative integer.
    #[error("envelope 'type' must be an unsigned integer, got {0}")]
    InvalidType(String),

    /// The `type` value does not name a known object type.
    #[error("unknown envelope type: {0}")]
    UnknownType(u64),

    /// A required field is absent, empty, or not a string.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

// ── Object type discriminant ──────────────────────────────────────────────────

/// Integer discriminant carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    WebrtcOffer = 0,
    WebrtcAnswer = 1,
    WebrtcIce = 2,
    TurnRequest = 3,
    TurnResponse = 4,
    LoginRequest = 20,
    LoginResponse = 21,
}

impl TryFrom<u64> for ObjectType {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, ()> {
        match value {
            0 => Ok(ObjectType::WebrtcOffer),
            1 => Ok(ObjectType::WebrtcAnswer),
            2 => Ok(ObjectType::WebrtcIce),
            3 => Ok(ObjectType::TurnRequest),
            4 => Ok(ObjectType::TurnResponse),
            20 => Ok(ObjectType::LoginRequest),
            21 => Ok(ObjectType::LoginResponse),
            _ => Err(()),
        }
    }
}

// ── Login request ─────────────────────────────────────────────────────────────

/// Credential used to authorize the device connection.
///
/// The relay never interprets either value; it passes it to the device
/// transport unchanged.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Short-lived server connect token (`sct`).
    ServerConnectToken(String),
    /// Long-lived server key (`serverKey`).
    ServerKey(String),
}

impl Credential {
    /// Short label for logs.  Never includes the secret itself.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ServerConnectToken(_) => "sct",
            Credential::ServerKey(_) => "serverKey",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.kind())
    }
}

/// A validated login request (`type = 20`).
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub product_id: String,
    pub device_id: String,
    pub username: String,
    pub password: String,
    pub credential: Credential,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("product_id", &self.product_id)
            .field("device_id", &self.device_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("credential", &self.credential)
            .finish()
    }
}

impl LoginRequest {
    fn from_fields(fields: &Map<String, Value>) -> Result<Self, EnvelopeError> {
        let product_id = required_str(fields, "productId")?;
        let device_id = required_str(fields, "deviceId")?;
        let username = required_str(fields, "username")?;
        let password = required_str(fields, "password")?;

        // `sct` wins when both are supplied.
        let credential = match (optional_str(fields, "sct"), optional_str(fields, "serverKey")) {
            (Some(sct), _) => Credential::ServerConnectToken(sct),
            (None, Some(key)) => Credential::ServerKey(key),
            (None, None) => return Err(EnvelopeError::MissingField("sct or serverKey")),
        };

        Ok(Self {
            product_id,
            device_id,
            username,
            password,
            credential,
        })
    }

    fn write_fields(&self, fields: &mut Map<String, Value>) {
        fields.insert("productId".into(), Value::String(self.product_id.clone()));
        fields.insert("deviceId".into(), Value::String(self.device_id.clone()));
        fields.insert("username".into(), Value::String(self.username.clone()));
        fields.insert("password".into(), Value::String(self.password.clone()));
        match &self.credential {
            Credential::ServerConnectToken(sct) => {
                fields.insert("sct".into(), Value::String(sct.clone()));
            }
            Credential::ServerKey(key) => {
                fields.insert("serverKey".into(), Value::String(key.clone()));
            }
        }
    }
}

/// Returns a non-empty string field or `None`.
fn optional_str(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn required_str(fields: &Map<String, Value>, name: &'static str) -> Result<String, EnvelopeError> {
    optional_str(fields, name).ok_or(EnvelopeError::MissingField(name))
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// All control messages understood by the relay.
///
/// The WebRTC signaling variants keep their remaining fields as an untyped
/// JSON map: the relay forwards them, it does not interpret them.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEnvelope {
    WebrtcOffer(Map<String, Value>),
    WebrtcAnswer(Map<String, Value>),
    WebrtcIce(Map<String, Value>),
    TurnRequest(Map<String, Value>),
    TurnResponse(Map<String, Value>),
    LoginRequest(LoginRequest),
    LoginResponse,
}

impl ControlEnvelope {
    /// Parses a WebSocket text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] for malformed JSON, a missing or unknown
    /// `type`, or a login request missing any required field.
    ///
    /// # Example
    ///
    /// ```rust
    /// use signaling_core::{ControlEnvelope, ObjectType};
    ///
    /// let env = ControlEnvelope::parse(r#"{"type":21}"#).unwrap();
    /// assert_eq!(env.object_type(), ObjectType::LoginResponse);
    /// ```
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let tag = fields.remove("type").ok_or(EnvelopeError::MissingType)?;
        let code = tag
            .as_u64()
            .ok_or_else(|| EnvelopeError::InvalidType(tag.to_string()))?;
        let kind = ObjectType::try_from(code).map_err(|_| EnvelopeError::UnknownType(code))?;

        Ok(match kind {
            ObjectType::WebrtcOffer => ControlEnvelope::WebrtcOffer(fields),
            ObjectType::WebrtcAnswer => ControlEnvelope::WebrtcAnswer(fields),
            ObjectType::WebrtcIce => ControlEnvelope::WebrtcIce(fields),
            ObjectType::TurnRequest => ControlEnvelope::TurnRequest(fields),
            ObjectType::TurnResponse => ControlEnvelope::TurnResponse(fields),
            ObjectType::LoginRequest => {
                ControlEnvelope::LoginRequest(LoginRequest::from_fields(&fields)?)
            }
            ObjectType::LoginResponse => ControlEnvelope::LoginResponse,
        })
    }

    /// Returns the discriminant of this envelope.
    pub fn object_type(&self) -> ObjectType {
        match self {
            ControlEnvelope::WebrtcOffer(_) => ObjectType::WebrtcOffer,
            ControlEnvelope::WebrtcAnswer(_) => ObjectType::WebrtcAnswer,
            ControlEnvelope::WebrtcIce(_) => ObjectType::WebrtcIce,
            ControlEnvelope::TurnRequest(_) => ObjectType::TurnRequest,
            ControlEnvelope::TurnResponse(_) => ObjectType::TurnResponse,
            ControlEnvelope::LoginRequest(_) => ObjectType::LoginRequest,
            ControlEnvelope::LoginResponse => ObjectType::LoginResponse,
        }
    }

    /// Serializes the envelope back into its JSON wire form.
    pub fn to_json(&self) -> String {
        let mut fields = match self {
            ControlEnvelope::WebrtcOffer(m)
            | ControlEnvelope::WebrtcAnswer(m)
            | ControlEnvelope::WebrtcIce(m)
            | ControlEnvelope::TurnRequest(m)
            | ControlEnvelope::TurnResponse(m) => m.clone(),
            ControlEnvelope::LoginRequest(login) => {
                let mut m = Map::new();
                login.write_fields(&mut m);
                m
            }
            ControlEnvelope::LoginResponse => Map::new(),
        };
        fields.insert("type".into(), Value::from(self.object_type() as u8));
        Value::Object(fields).to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
