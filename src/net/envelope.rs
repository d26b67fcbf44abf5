//! Normalized error messages for non-2xx responses.

use serde::Deserialize;

/// The single error shape the backend is expected to return.
///
/// All fields are optional; the first non-empty one in the order
/// `detail`, `message`, `error` is the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorEnvelope {
    /// The highest-priority non-empty message, if any.
    pub fn into_message(self) -> Option<String> {
        [self.detail, self.message, self.error]
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())
    }
}

/// Fallback message when the body carries nothing usable.
pub fn generic_message(status: u16) -> String {
    format!("request failed with status {status}")
}

/// Extract the message for a failed response.
///
/// JSON bodies must match [`ErrorEnvelope`]; anything else gets the generic
/// message. Non-JSON bodies are passed through as text.
pub fn error_message(status: u16, is_json: bool, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return generic_message(status);
    }
    if !is_json {
        return body.to_string();
    }
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(ErrorEnvelope::into_message)
        .unwrap_or_else(|| generic_message(status))
}
