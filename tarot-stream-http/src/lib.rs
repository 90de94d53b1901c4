//! # tarot-stream-http
//!
//! HTTP transport for [`tarot_stream`].
//!
//! [`ChatStreamClient`] posts a chat completion request with `stream: true`
//! and hands back the response body as a [`ResponseReader`], ready for a
//! [`StreamFrameDecoder`](tarot_stream::StreamFrameDecoder) or a
//! [`StreamConsumer`](tarot_stream::StreamConsumer).
//!
//! ## Example
//!
//! ```ignore
//! use tarot_stream_http::{ChatMessage, ChatStreamClient, ClientConfig};
//!
//! let client = ChatStreamClient::new(ClientConfig::from_env()?)?;
//! let outcome = client
//!     .stream_reply(vec![ChatMessage::user("Draw three cards")], &mut consumer)
//!     .await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod request;

pub use client::{ChatStreamClient, ResponseReader, REQUEST_ID_HEADER};
pub use config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, DEFAULT_MODEL,
    DEFAULT_REQUEST_ID_PREFIX, DEFAULT_TIMEOUT,
};
pub use error::{http_error, map_reqwest_error, parse_api_error};
pub use request::{ChatCompletionRequest, ChatMessage, Role};
