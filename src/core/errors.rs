use serde_json::Value;
use thiserror::Error;

/// Server messages that are expected outcomes of subscription replay.
const IGNORABLE_API_MESSAGES: &[&str] = &[
    "You are already subscribed to",
    "Input validation failed: forget",
];

#[derive(Error, Debug)]
pub enum LiveApiError {
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: String, message: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Unknown call: {0}")]
    UnknownCall(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Request {req_id} timed out")]
    RequestTimeout { req_id: String },

    #[error("Session closed")]
    SessionClosed,

    #[error("Other error: {0}")]
    Other(String),
}

impl LiveApiError {
    /// Build an `ApiError` from the `error` object of a server frame
    pub fn from_api_error(error: &Value) -> Self {
        let field = |name: &str| {
            error
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self::ApiError {
            code: field("code"),
            message: field("message"),
        }
    }

    /// Whether a server error message is a duplicate-subscribe or
    /// late-unsubscribe artifact that should settle nothing
    pub fn is_ignorable_api_message(message: &str) -> bool {
        IGNORABLE_API_MESSAGES
            .iter()
            .any(|pattern| message.contains(pattern))
    }
}
