//! Streaming errors.

use thiserror::Error;

/// Errors that can occur while opening, decoding or consuming a stream.
///
/// Frame-level parse failures never surface here: the decoder logs and
/// drops them. Everything in this enum is fatal to the stream it came from,
/// except [`StreamError::Persistence`], which only ever reaches a log line.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The server answered with a non-success status.
    #[error("HTTP error {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, or a fallback.
        message: String,
    },

    /// Transport failure while the request or the body was in flight.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout waiting for the transport.
    #[error("Timeout waiting for stream")]
    Timeout,

    /// The decode buffer grew past its limit without a line terminator.
    #[error("SSE buffer exceeded {limit} bytes")]
    BufferOverflow {
        /// Configured limit.
        limit: usize,
    },

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Saving a finished response to history failed.
    #[error("History persistence failed: {0}")]
    Persistence(String),

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Check if retrying the request could succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;
