//! Error types for surface-bridge
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in surface-bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Inbound text could not be parsed as an envelope
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// No decoder registered for the method
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Decoded params or response payload failed domain validation
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// No unanswered request with this id
    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    /// A raw response could not be decoded against the expected type
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    /// The channel could not deliver an outbound message
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Surface construction or teardown failed
    #[error("Surface error: {0}")]
    Surface(String),

    /// The UI-affine context is gone or refused work
    #[error("UI context error: {0}")]
    UiContext(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for surface-bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Machine-readable session error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// An outbound message could not reach the surface.
    pub const ERROR_SENDING_MESSAGE: &'static str = "error_sending_message";
    /// An inbound message could not be processed.
    pub const ERROR_RECEIVING_MESSAGE: &'static str = "error_receiving_message";
    /// The process rendering the surface went away.
    pub const RENDER_PROCESS_GONE: &'static str = "render_process_gone";
    /// Anything else.
    pub const UNKNOWN: &'static str = "unknown";
}

/// Session-level failure reported to the host.
///
/// Carries a machine-readable `code`, a human-readable `description`, and
/// whether the session may still be usable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description} ({code})")]
pub struct SessionError {
    pub code: String,
    pub description: String,
    pub recoverable: bool,
}

impl SessionError {
    /// Create a new session error.
    pub fn new(code: impl Into<String>, description: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            recoverable,
        }
    }

    /// A response could not be delivered; the session itself may still work.
    pub fn sending_failed(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::ERROR_SENDING_MESSAGE, description, true)
    }

    /// An inbound message could not be handled.
    pub fn receiving_failed(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::ERROR_RECEIVING_MESSAGE, description, true)
    }

    /// The rendering process is gone; the surface cannot be used again.
    pub fn render_process_gone(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::RENDER_PROCESS_GONE, description, false)
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }
}
