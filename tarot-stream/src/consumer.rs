//! Consumption of a streamed reply.
//!
//! [`StreamConsumer`] is the glue between a transport, the
//! [`StreamFrameDecoder`] and a [`RenderBatcher`]: it opens the stream,
//! accumulates delta text, feeds the batcher and decides how the stream ended.
//!
//! ```text
//! Idle ──run──▶ Streaming ──▶ Completed
//!                         └─▶ Failed (transport, upstream, empty, cancelled)
//! ```

use crate::batcher::RenderBatcher;
use crate::decoder::{ChunkReader, DecoderConfig, StreamFrameDecoder};
use crate::error::{StreamError, StreamResult};
use crate::history::{HistoryRecord, HistorySink};
use serde_json::{Map, Value as JsonValue};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lifecycle state of a [`StreamConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Not started yet.
    Idle,
    /// Reading the stream.
    Streaming,
    /// Finished with content.
    Completed,
    /// Finished without usable content.
    Failed,
}

/// Configuration for [`StreamConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Notice shown when the transport fails.
    pub fallback_notice: String,
    /// Notice shown when the stream ends without any text.
    pub empty_notice: String,
    /// Decoder settings.
    pub decoder: DecoderConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fallback_notice: "⚠️ Connection lost, please try again.".to_string(),
            empty_notice: "⚠️ No response was received, please try again.".to_string(),
            decoder: DecoderConfig::default(),
        }
    }
}

impl ConsumerConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport failure notice.
    pub fn fallback_notice(mut self, notice: impl Into<String>) -> Self {
        self.fallback_notice = notice.into();
        self
    }

    /// Set the empty response notice.
    pub fn empty_notice(mut self, notice: impl Into<String>) -> Self {
        self.empty_notice = notice.into();
        self
    }

    /// Set the decoder config.
    pub fn decoder(mut self, decoder: DecoderConfig) -> Self {
        self.decoder = decoder;
        self
    }
}

/// Why a stream failed.
#[derive(Debug)]
pub enum FailureKind {
    /// Opening or reading the stream failed.
    Transport(StreamError),
    /// The server reported an error inside the stream.
    Upstream {
        /// Message from the error frame.
        message: String,
        /// Code from the error frame.
        code: Option<String>,
    },
    /// The stream ended normally but carried no text.
    Empty,
    /// The consumer was cancelled.
    Cancelled,
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The stream produced text.
    Completed {
        /// Full accumulated text.
        text: String,
    },
    /// The stream produced nothing usable.
    Failed {
        /// Cause.
        failure: FailureKind,
        /// Message to show the user. `None` when cancelled.
        notice: Option<String>,
        /// Text accumulated before the failure.
        partial: String,
    },
}

impl StreamOutcome {
    /// Check if the stream completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Full text of a completed stream.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed { text } => Some(text),
            Self::Failed { .. } => None,
        }
    }

    /// User-facing notice of a failed stream.
    pub fn notice(&self) -> Option<&str> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { notice, .. } => notice.as_deref(),
        }
    }

    /// Failure cause, if any.
    pub fn failure(&self) -> Option<&FailureKind> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { failure, .. } => Some(failure),
        }
    }
}

/// Drives one streamed reply from request to outcome.
pub struct StreamConsumer {
    batcher: RenderBatcher,
    history: Option<Arc<dyn HistorySink>>,
    cancel: CancellationToken,
    config: ConsumerConfig,
    state: ConsumerState,
    accumulated: String,
    prompt: Option<String>,
    request_id: Option<String>,
    metadata: Map<String, JsonValue>,
    persist_task: Option<JoinHandle<()>>,
}

impl StreamConsumer {
    /// Create a consumer rendering through `batcher`.
    pub fn new(batcher: RenderBatcher) -> Self {
        Self {
            batcher,
            history: None,
            cancel: CancellationToken::new(),
            config: ConsumerConfig::default(),
            state: ConsumerState::Idle,
            accumulated: String::new(),
            prompt: None,
            request_id: None,
            metadata: Map::new(),
            persist_task: None,
        }
    }

    /// Save completed responses to `history`.
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set the config.
    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the prompt to the saved history record.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Attach a request ID to logs and the saved history record.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach extra data to the saved history record.
    pub fn with_metadata(mut self, metadata: Map<String, JsonValue>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Current state.
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.accumulated
    }

    /// Token that cancels this consumer.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Handle of the detached history save, if one was started.
    pub fn take_persist_task(&mut self) -> Option<JoinHandle<()>> {
        self.persist_task.take()
    }

    /// Open the stream with `open` and consume it to the end.
    ///
    /// Never returns an error: every failure is folded into the outcome. A
    /// consumer runs once; later calls fail with an invalid-state error.
    pub async fn run<R, F>(&mut self, open: F) -> StreamOutcome
    where
        R: ChunkReader,
        F: Future<Output = StreamResult<R>>,
    {
        if self.state != ConsumerState::Idle {
            return StreamOutcome::Failed {
                failure: FailureKind::Transport(StreamError::InvalidState(format!(
                    "consumer already ran ({:?})",
                    self.state
                ))),
                notice: Some(self.config.fallback_notice.clone()),
                partial: String::new(),
            };
        }

        self.state = ConsumerState::Streaming;
        debug!(request_id = self.request_id.as_deref(), "stream started");

        let cancel = self.cancel.clone();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return self.cancelled(),
            opened = open => opened,
        };
        let reader = match opened {
            Ok(reader) => reader,
            Err(err) => return self.fail(FailureKind::Transport(err)),
        };

        let mut decoder = StreamFrameDecoder::with_config(reader, self.config.decoder.clone())
            .with_cancellation(cancel.clone());

        loop {
            let event = match decoder.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    drop(decoder);
                    return self.fail(FailureKind::Transport(err));
                }
            };

            if cancel.is_cancelled() {
                break;
            }

            if let Some(payload) = &event.error {
                let failure = FailureKind::Upstream {
                    message: payload
                        .display_message()
                        .unwrap_or("upstream error")
                        .to_string(),
                    code: payload.code.clone(),
                };
                drop(decoder);
                return self.fail(failure);
            }

            if let Some(text) = event.delta_text() {
                self.accumulated.push_str(text);
                self.batcher.update(self.accumulated.as_str());
            }
        }
        drop(decoder);

        if cancel.is_cancelled() {
            return self.cancelled();
        }
        if self.accumulated.trim().is_empty() {
            return self.fail(FailureKind::Empty);
        }

        self.state = ConsumerState::Completed;
        self.batcher.complete();
        debug!(
            request_id = self.request_id.as_deref(),
            len = self.accumulated.len(),
            "stream completed"
        );
        self.persist();

        StreamOutcome::Completed {
            text: self.accumulated.clone(),
        }
    }

    fn fail(&mut self, failure: FailureKind) -> StreamOutcome {
        if matches!(failure, FailureKind::Cancelled) {
            return self.cancelled();
        }
        self.state = ConsumerState::Failed;
        self.batcher.complete();

        let notice = match &failure {
            FailureKind::Transport(err) => {
                error!(request_id = self.request_id.as_deref(), error = %err, "stream failed");
                Some(self.config.fallback_notice.clone())
            }
            FailureKind::Upstream { message, code } => {
                error!(
                    request_id = self.request_id.as_deref(),
                    code = code.as_deref(),
                    upstream_message = %message,
                    "upstream reported an error"
                );
                Some(message.clone())
            }
            FailureKind::Empty => {
                warn!(request_id = self.request_id.as_deref(), "stream ended without content");
                Some(self.config.empty_notice.clone())
            }
            FailureKind::Cancelled => None,
        };

        StreamOutcome::Failed {
            failure,
            notice,
            partial: self.accumulated.clone(),
        }
    }

    fn cancelled(&mut self) -> StreamOutcome {
        self.state = ConsumerState::Failed;
        self.batcher.abandon();
        debug!(request_id = self.request_id.as_deref(), "stream cancelled");

        StreamOutcome::Failed {
            failure: FailureKind::Cancelled,
            notice: None,
            partial: self.accumulated.clone(),
        }
    }

    fn persist(&mut self) {
        let Some(sink) = self.history.clone() else {
            return;
        };

        let mut record = HistoryRecord::new(self.accumulated.clone())
            .with_request_id(self.request_id.clone())
            .with_metadata(self.metadata.clone());
        if let Some(prompt) = &self.prompt {
            record = record.with_prompt(prompt.clone());
        }

        self.persist_task = Some(tokio::spawn(async move {
            let id = record.id;
            match sink.save(record).await {
                Ok(()) => debug!(%id, "response saved to history"),
                Err(err) => warn!(%id, error = %err, "failed to save response to history"),
            }
        }));
    }
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("state", &self.state)
            .field("accumulated_len", &self.accumulated.len())
            .field("request_id", &self.request_id)
            .field("has_history", &self.history.is_some())
            .finish()
    }
}
