//! # tarot-stream
//!
//! Streaming support for chat replies delivered as Server-Sent Events.
//!
//! This crate turns an arbitrarily chunked HTTP body into structured events
//! and paints the growing reply without flooding the display.
//!
//! ## Core Concepts
//!
//! - **[`StreamFrameDecoder`]**: bytes → UTF-8 → lines → `data: ` frames → [`StreamEvent`]s
//! - **[`RenderBatcher`]**: at most one render per frame, plus a final flush
//! - **[`StreamConsumer`]**: opens the stream, accumulates text, hands the
//!   result to a [`HistorySink`]
//!
//! ## Example - Decoding
//!
//! ```ignore
//! use tarot_stream::{ByteStreamReader, StreamFrameDecoder};
//!
//! let mut decoder = StreamFrameDecoder::new(ByteStreamReader::new(response.bytes_stream()));
//! while let Some(event) = decoder.next_event().await? {
//!     if let Some(text) = event.delta_text() {
//!         print!("{text}");
//!     }
//! }
//! ```
//!
//! ## Example - Consuming with batched rendering
//!
//! ```ignore
//! use std::sync::Arc;
//! use tarot_stream::prelude::*;
//!
//! let scheduler = Arc::new(TokioFrameScheduler::new(DEFAULT_FRAME_INTERVAL));
//! let batcher = RenderBatcher::new(scheduler, |text| redraw(text));
//! let mut consumer = StreamConsumer::new(batcher).with_history(history);
//!
//! match consumer.run(client.open(messages)).await {
//!     StreamOutcome::Completed { text } => println!("{text}"),
//!     failed => eprintln!("{}", failed.notice().unwrap_or_default()),
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod batcher;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod events;
pub mod history;
pub mod sse;
pub mod utf8;

// Re-exports
pub use batcher::{
    BatchStats, FrameCallback, FrameHandle, FrameScheduler, ManualScheduler, RenderBatcher,
    TokioFrameScheduler, DEFAULT_FRAME_INTERVAL,
};
pub use consumer::{ConsumerConfig, ConsumerState, FailureKind, StreamConsumer, StreamOutcome};
pub use decoder::{ByteStreamReader, ChunkReader, DecoderConfig, StreamFrameDecoder};
pub use error::{StreamError, StreamResult};
pub use events::{Choice, Delta, ErrorPayload, StreamEvent};
pub use history::{HistoryRecord, HistorySink, MemoryHistory, MAX_HISTORY_ITEMS};
pub use sse::{format_done, format_sse, parse_line, Frame, LineBuffer};
pub use utf8::Utf8Decoder;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        ByteStreamReader, ChunkReader, ConsumerConfig, ConsumerState, DecoderConfig,
        FailureKind, FrameScheduler, HistorySink, MemoryHistory, RenderBatcher, StreamConsumer,
        StreamError, StreamEvent, StreamFrameDecoder, StreamOutcome, StreamResult,
        TokioFrameScheduler, DEFAULT_FRAME_INTERVAL,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let config = DecoderConfig::default();
        assert!(config.stop_at_done);
        assert_eq!(ConsumerConfig::default().decoder.max_buffer_size, 10 * 1024 * 1024);
        let _ = ConsumerState::Idle;
    }
}
