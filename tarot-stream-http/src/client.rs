//! reqwest client for the streaming chat endpoint.

use crate::config::ClientConfig;
use crate::error::{http_error, map_reqwest_error};
use crate::request::{ChatCompletionRequest, ChatMessage};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::Response;
use tarot_stream::{ByteStreamReader, StreamConsumer, StreamError, StreamOutcome, StreamResult};
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

/// Header carrying the per-request correlation ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Body reader returned by [`ChatStreamClient::open`].
pub type ResponseReader = ByteStreamReader<BoxStream<'static, StreamResult<Bytes>>>;

/// Opens streaming chat completions over HTTP.
///
/// Requests are not retried. A failed request is reported once and the
/// caller decides what to do.
#[derive(Debug, Clone)]
pub struct ChatStreamClient {
    client: reqwest::Client,
    config: ClientConfig,
    url: Url,
}

impl ChatStreamClient {
    /// Create a client with its own connection pool.
    pub fn new(config: ClientConfig) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Self::with_client(client, config)
    }

    /// Create a client on top of an existing reqwest client.
    pub fn with_client(client: reqwest::Client, config: ClientConfig) -> StreamResult<Self> {
        let url = config.endpoint_url()?;
        Ok(Self {
            client,
            config,
            url,
        })
    }

    /// Get the config.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Generate a request ID such as `web-7c9e...`.
    pub fn new_request_id(&self) -> String {
        format!("{}-{}", self.config.request_id_prefix, Uuid::new_v4())
    }

    /// Start a streaming completion with a fresh request ID.
    pub async fn open(&self, messages: Vec<ChatMessage>) -> StreamResult<ResponseReader> {
        let request_id = self.new_request_id();
        self.open_with_request_id(messages, &request_id).await
    }

    /// Start a streaming completion.
    ///
    /// Resolves once the response headers arrive with a success status. The
    /// configured timeout covers only that wait; the body streams for as
    /// long as the server keeps it open.
    pub async fn open_with_request_id(
        &self,
        messages: Vec<ChatMessage>,
        request_id: &str,
    ) -> StreamResult<ResponseReader> {
        let body = ChatCompletionRequest::new(self.config.model.clone(), messages);

        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(REQUEST_ID_HEADER, request_id)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        info!(
            request_id,
            model = %self.config.model,
            messages = body.messages.len(),
            "Opening chat stream"
        );

        let response = tokio::time::timeout(self.config.timeout, request.send())
            .await
            .map_err(|_| StreamError::Timeout)?
            .map_err(map_reqwest_error)?;

        let response = check_response(response, request_id).await?;
        debug!(request_id, status = response.status().as_u16(), "Chat stream opened");

        let body = response.bytes_stream().map_err(map_reqwest_error).boxed();
        Ok(ByteStreamReader::new(body))
    }

    /// Open a stream for `messages` and run `consumer` over it.
    pub async fn stream_reply(
        &self,
        messages: Vec<ChatMessage>,
        consumer: &mut StreamConsumer,
    ) -> StreamOutcome {
        consumer.run(self.open(messages)).await
    }
}

async fn check_response(response: Response, request_id: &str) -> StreamResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = http_error(status.as_u16(), &body);
    error!(request_id, status = status.as_u16(), error = %err, "Chat stream request failed");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_prefix() {
        let client =
            ChatStreamClient::new(ClientConfig::new("http://localhost:8000").request_id_prefix("cli"))
                .unwrap();
        let id = client.new_request_id();
        assert!(id.starts_with("cli-"));
        assert!(Uuid::parse_str(&id["cli-".len()..]).is_ok());
        assert_ne!(id, client.new_request_id());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(ChatStreamClient::new(ClientConfig::new("::not a url")).is_err());
    }
}
