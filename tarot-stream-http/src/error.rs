//! Mapping of HTTP failures onto [`StreamError`].

use serde_json::Value as JsonValue;
use tarot_stream::StreamError;

/// Convert a reqwest error.
pub fn map_reqwest_error(err: reqwest::Error) -> StreamError {
    if err.is_timeout() {
        StreamError::Timeout
    } else if err.is_connect() {
        StreamError::Connection(err.to_string())
    } else {
        StreamError::Transport(err.to_string())
    }
}

/// Extract a readable message from an error response body.
///
/// Looks at `error.message`, `error.detail` and `detail`, in that order, and
/// falls back to `request failed: <status>`.
pub fn parse_api_error(status: u16, body: &str) -> String {
    let fallback = || format!("request failed: {status}");
    let Ok(json) = serde_json::from_str::<JsonValue>(body) else {
        return fallback();
    };

    let text = |value: Option<&JsonValue>| {
        value
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    let error = json.get("error");
    text(error.and_then(|e| e.get("message")))
        .or_else(|| text(error.and_then(|e| e.get("detail"))))
        .or_else(|| text(json.get("detail")))
        .unwrap_or_else(fallback)
}

/// Build the error for a non-success response.
pub fn http_error(status: u16, body: &str) -> StreamError {
    StreamError::Http {
        status,
        message: parse_api_error(status, body),
    }
}
