//! Wire envelope types and the codec between them and raw text.
//!
//! Inbound messages from the embedded surface look like
//! `{"version":"2.0","id":"42","method":"checkout.start","params":{...}}`.
//! Responses going back carry the echoed `id` and exactly one of `result` or
//! `error`.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use thiserror::Error;

/// Protocol version carried by every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Field names used on the wire.
pub struct Fields;

impl Fields {
    pub const VERSION: &'static str = "version";
    /// Older surfaces still send the version under this name.
    pub const LEGACY_VERSION: &'static str = "jsonrpc";
    pub const ID: &'static str = "id";
    pub const METHOD: &'static str = "method";
    pub const PARAMS: &'static str = "params";
    pub const RESULT: &'static str = "result";
    pub const ERROR: &'static str = "error";
}

/// Why a piece of text is not a valid envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Syntax(String),

    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unsupported protocol version `{0}`")]
    UnsupportedVersion(String),

    #[error("response must carry exactly one of `result` or `error`")]
    AmbiguousOutcome,

    #[error("invalid envelope: {0}")]
    Invalid(String),
}

impl DecodeError {
    /// Human-readable reason, suitable for logs.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Message received from the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Protocol version, if the sender included one.
    ///
    /// Filled in by [`decode_inbound`] from `version` or `jsonrpc`.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Correlation token. Absent for notifications.
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Method name (e.g., "checkout.start").
    pub method: String,
    /// Method parameters as JSON value.
    #[serde(default)]
    pub params: Value,
}

impl InboundEnvelope {
    /// Create a request envelope (has an id, expects a response).
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.to_string()),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Create a notification envelope (no id, no response).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.to_string()),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Ids arrive as strings or numbers; both are carried as strings.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

/// Outcome carried by a response: a result value or an error string, never
/// both and never neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(String),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

/// Response sent back to the surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEnvelope {
    pub version: String,
    /// Echoed request id. Notifications never get a response.
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl OutboundEnvelope {
    /// Create a success response.
    pub fn result(id: impl Into<String>, result: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            outcome: Outcome::Result(result),
        }
    }

    /// Create an error response.
    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            outcome: Outcome::Error(error.into()),
        }
    }

    /// Check if this response indicates success.
    pub fn is_success(&self) -> bool {
        !self.outcome.is_error()
    }
}

fn parse_object(raw: &str) -> std::result::Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::NotAnObject),
        Err(e) => Err(DecodeError::Syntax(e.to_string())),
    }
}

/// Both version fields may be present; each one that is must match.
fn check_version(map: &Map<String, Value>) -> std::result::Result<Option<String>, DecodeError> {
    let mut found = None;
    for field in [Fields::VERSION, Fields::LEGACY_VERSION] {
        match map.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(v)) if v == PROTOCOL_VERSION => found = Some(v.clone()),
            Some(Value::String(v)) => return Err(DecodeError::UnsupportedVersion(v.clone())),
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field,
                    reason: format!("expected string, got {}", other),
                });
            }
        }
    }
    Ok(found)
}

/// Decode an inbound envelope.
///
/// Unknown fields are ignored. `method` must be present and a string.
pub fn decode_inbound(raw: &str) -> std::result::Result<InboundEnvelope, DecodeError> {
    let map = parse_object(raw)?;
    let version = check_version(&map)?;

    match map.get(Fields::METHOD) {
        Some(Value::String(_)) => {}
        None | Some(Value::Null) => return Err(DecodeError::MissingField(Fields::METHOD)),
        Some(other) => {
            return Err(DecodeError::InvalidField {
                field: Fields::METHOD,
                reason: format!("expected string, got {}", other),
            });
        }
    }

    let mut envelope: InboundEnvelope =
        serde_json::from_value(Value::Object(map)).map_err(|e| DecodeError::Invalid(e.to_string()))?;
    envelope.version = version;
    Ok(envelope)
}

/// Decode an outbound envelope, e.g. one captured from the wire.
///
/// Requires an id and exactly one of `result` or `error`.
pub fn decode_outbound(raw: &str) -> std::result::Result<OutboundEnvelope, DecodeError> {
    let mut map = parse_object(raw)?;
    check_version(&map)?;

    let id = match map.remove(Fields::ID) {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        None | Some(Value::Null) => return Err(DecodeError::MissingField(Fields::ID)),
        Some(other) => {
            return Err(DecodeError::InvalidField {
                field: Fields::ID,
                reason: format!("expected string or number, got {}", other),
            });
        }
    };

    let outcome = match (map.remove(Fields::RESULT), map.remove(Fields::ERROR)) {
        (Some(result), None) => Outcome::Result(result),
        (None, Some(Value::String(error))) => Outcome::Error(error),
        (None, Some(other)) => {
            return Err(DecodeError::InvalidField {
                field: Fields::ERROR,
                reason: format!("expected string, got {}", other),
            });
        }
        _ => return Err(DecodeError::AmbiguousOutcome),
    };

    Ok(OutboundEnvelope {
        version: PROTOCOL_VERSION.to_string(),
        id,
        outcome,
    })
}

/// Encode a response envelope to text.
pub fn encode(envelope: &OutboundEnvelope) -> crate::error::Result<String> {
    serde_json::to_string(envelope).map_err(Into::into)
}

/// Encode an inbound envelope to text.
pub fn encode_inbound(envelope: &InboundEnvelope) -> crate::error::Result<String> {
    serde_json::to_string(envelope).map_err(Into::into)
}
