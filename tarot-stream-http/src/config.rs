//! Client configuration.

use std::fmt;
use std::time::Duration;
use tarot_stream::{StreamError, StreamResult};
use url::Url;

/// Default path of the streaming endpoint, relative to the base URL.
pub const DEFAULT_ENDPOINT: &str = "/chat/completions";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "Qwen/Qwen3-Next-80B-A3B-Instruct";

/// How long to wait for the response headers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How long to wait for a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of generated `X-Request-ID` values.
pub const DEFAULT_REQUEST_ID_PREFIX: &str = "web";

/// Configuration for [`ChatStreamClient`](crate::ChatStreamClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Endpoint path appended to the base URL.
    pub endpoint: String,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Model name sent with each request.
    pub model: String,
    /// Time allowed until the response headers arrive. The body may stream
    /// for longer.
    pub timeout: Duration,
    /// Time allowed to connect.
    pub connect_timeout: Duration,
    /// Prefix for generated request IDs.
    pub request_id_prefix: String,
}

impl ClientConfig {
    /// Create a config for `base_url` with defaults for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_id_prefix: DEFAULT_REQUEST_ID_PREFIX.to_string(),
        }
    }

    /// Create from environment variables.
    ///
    /// `TAROT_API_BASE_URL` is required. `TAROT_API_KEY`, `TAROT_MODEL`,
    /// `TAROT_ENDPOINT` and `TAROT_TIMEOUT_SECS` are optional.
    pub fn from_env() -> StreamResult<Self> {
        let base_url = std::env::var("TAROT_API_BASE_URL")
            .map_err(|_| StreamError::Other("TAROT_API_BASE_URL is not set".to_string()))?;

        let mut config = Self::new(base_url);
        if let Ok(key) = std::env::var("TAROT_API_KEY") {
            config = config.api_key(key);
        }
        if let Ok(model) = std::env::var("TAROT_MODEL") {
            config = config.model(model);
        }
        if let Ok(endpoint) = std::env::var("TAROT_ENDPOINT") {
            config = config.endpoint(endpoint);
        }
        if let Ok(secs) = std::env::var("TAROT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| StreamError::Other(format!("invalid TAROT_TIMEOUT_SECS: {secs}")))?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Set the endpoint path.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the API key. Empty keys are ignored.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the header timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request ID prefix.
    pub fn request_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.request_id_prefix = prefix.into();
        self
    }

    /// Full URL of the streaming endpoint.
    pub fn endpoint_url(&self) -> StreamResult<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|err| StreamError::Other(format!("invalid endpoint URL {joined}: {err}")))
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_id_prefix", &self.request_id_prefix)
            .finish()
    }
}
