use crate::core::errors::LiveApiError;
use serde_json::Value;

/// A decoded server frame
///
/// Decoded once per frame and dispatched; never retained.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// A frame echoing a `req_id`, possibly carrying an error
    Response {
        req_id: String,
        msg_type: String,
        error: Option<Value>,
        frame: Value,
    },
    /// An unsolicited frame
    Push { msg_type: String, frame: Value },
    /// An unsolicited frame carrying a top-level error
    ErrorPush { error: Value, frame: Value },
}

/// JSON text codec for the trading API wire format
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveCodec;

impl LiveCodec {
    pub fn encode(&self, payload: &Value) -> Result<String, LiveApiError> {
        serde_json::to_string(payload).map_err(LiveApiError::from)
    }

    /// Decode a text frame
    ///
    /// # Returns
    /// - `Ok(message)` - frame classified by its `req_id` and `error` fields
    /// - `Err(error)` - frame is not a JSON object
    pub fn decode(&self, text: &str) -> Result<IncomingMessage, LiveApiError> {
        let frame: Value = serde_json::from_str(text).map_err(|e| {
            LiveApiError::DeserializationError(format!("Failed to parse JSON: {}", e))
        })?;

        if !frame.is_object() {
            return Err(LiveApiError::DeserializationError(format!(
                "Expected a JSON object frame, got {}",
                frame
            )));
        }

        let msg_type = frame
            .get("msg_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let error = frame.get("error").filter(|e| !e.is_null()).cloned();

        if let Some(req_id) = Self::req_id(&frame) {
            return Ok(IncomingMessage::Response {
                req_id,
                msg_type,
                error,
                frame,
            });
        }

        Ok(match error {
            Some(error) => IncomingMessage::ErrorPush { error, frame },
            None => IncomingMessage::Push { msg_type, frame },
        })
    }

    /// String form of the frame's `req_id`, if it has one
    pub fn req_id(frame: &Value) -> Option<String> {
        match frame.get("req_id")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}
