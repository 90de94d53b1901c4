//! Lazy decoding of a chunked byte stream into [`StreamEvent`]s.
//!
//! [`StreamFrameDecoder`] pulls chunks from a [`ChunkReader`] only when the
//! caller asks for the next event. Chunk boundaries are opaque: a frame, a
//! JSON token or a multi-byte character may be split anywhere and still
//! decodes to the same sequence of events.

use crate::error::{StreamError, StreamResult};
use crate::events::StreamEvent;
use crate::sse::{parse_line, Frame, LineBuffer, DEFAULT_MAX_BUFFER_SIZE};
use crate::utf8::Utf8Decoder;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A pull-based source of byte chunks.
#[async_trait]
pub trait ChunkReader: Send {
    /// Read the next chunk, or `None` once the source is exhausted.
    async fn read(&mut self) -> StreamResult<Option<Bytes>>;

    /// Release the underlying source.
    ///
    /// The decoder calls this exactly once, on whichever exit path it takes.
    fn release(&mut self) {}
}

/// [`ChunkReader`] over any fallible byte stream, such as an HTTP body.
///
/// Releasing drops the inner stream.
pub struct ByteStreamReader<S> {
    inner: Option<S>,
}

impl<S> ByteStreamReader<S> {
    /// Wrap a byte stream.
    pub fn new(inner: S) -> Self {
        Self { inner: Some(inner) }
    }

    /// Check if the inner stream has been dropped.
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl<S> std::fmt::Debug for ByteStreamReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStreamReader")
            .field("released", &self.is_released())
            .finish()
    }
}

#[async_trait]
impl<S, B, E> ChunkReader for ByteStreamReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin + Send,
    B: Into<Bytes> + Send,
    E: Into<StreamError> + Send,
{
    async fn read(&mut self) -> StreamResult<Option<Bytes>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        match inner.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk.into())),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.inner = None;
    }
}

/// Configuration for [`StreamFrameDecoder`].
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// End the event sequence at the `[DONE]` sentinel instead of reading
    /// on until the transport closes.
    pub stop_at_done: bool,
    /// Limit for the unterminated tail of the decode buffer.
    pub max_buffer_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            stop_at_done: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl DecoderConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the sentinel ends the sequence.
    pub fn stop_at_done(mut self, stop: bool) -> Self {
        self.stop_at_done = stop;
        self
    }

    /// Set the buffer limit.
    pub fn max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }
}

/// Turns a [`ChunkReader`] into a lazy, single-use sequence of events.
pub struct StreamFrameDecoder<R: ChunkReader> {
    reader: R,
    utf8: Utf8Decoder,
    lines: LineBuffer,
    pending: VecDeque<StreamEvent>,
    config: DecoderConfig,
    cancel: Option<CancellationToken>,
    finished: bool,
    released: bool,
    dropped_frames: usize,
}

impl<R: ChunkReader> StreamFrameDecoder<R> {
    /// Create a decoder with the default config.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, DecoderConfig::default())
    }

    /// Create a decoder with a custom config.
    pub fn with_config(reader: R, config: DecoderConfig) -> Self {
        Self {
            reader,
            utf8: Utf8Decoder::new(),
            lines: LineBuffer::with_max_size(config.max_buffer_size),
            pending: VecDeque::new(),
            config,
            cancel: None,
            finished: false,
            released: false,
            dropped_frames: 0,
        }
    }

    /// Stop reading when `token` is cancelled.
    ///
    /// Cancellation is treated as end of stream.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Get the config.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Number of frames dropped because their payload was not valid JSON.
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Check if the reader has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Pull the next event.
    ///
    /// Returns `Ok(None)` once the source is exhausted, the sentinel has been
    /// seen, or the cancellation token fired. Transport errors are returned
    /// once; the decoder is finished afterwards.
    pub async fn next_event(&mut self) -> StreamResult<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                self.release();
                return Ok(None);
            }

            match self.read_chunk().await {
                Ok(Some(chunk)) => {
                    let text = self.utf8.decode(&chunk);
                    match self.lines.push(&text) {
                        Ok(lines) => self.process_lines(lines),
                        Err(err) => return Err(self.fail(err)),
                    }
                }
                Ok(None) => self.finish_input(),
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Drive the decoder to the end, concatenating all delta text.
    ///
    /// `on_content` sees each fragment as it arrives.
    pub async fn collect_text<F>(mut self, mut on_content: F) -> StreamResult<String>
    where
        F: FnMut(&str),
    {
        let mut full = String::new();
        while let Some(event) = self.next_event().await? {
            if let Some(text) = event.delta_text() {
                full.push_str(text);
                on_content(text);
            }
        }
        Ok(full)
    }

    /// Convert into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = StreamResult<StreamEvent>> + Send
    where
        R: 'static,
    {
        futures::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(decoder))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn read_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!("SSE read cancelled");
                    Ok(None)
                }
                chunk = self.reader.read() => chunk,
            },
            None => self.reader.read().await,
        }
    }

    fn process_lines(&mut self, lines: Vec<String>) {
        for line in lines {
            match parse_line(&line) {
                None => {}
                Some(Frame::Done) => {
                    if self.config.stop_at_done {
                        debug!("SSE done sentinel received");
                        self.finished = true;
                        return;
                    }
                }
                Some(Frame::Data(payload)) => match StreamEvent::from_payload(&payload) {
                    Ok(event) => self.pending.push_back(event),
                    Err(err) => {
                        self.dropped_frames += 1;
                        warn!(error = %err, data = %payload, "Dropping malformed SSE frame");
                    }
                },
            }
        }
    }

    fn finish_input(&mut self) {
        let mut rest = self.lines.take_remainder();
        rest.push_str(&self.utf8.finish());
        if !rest.trim().is_empty() {
            self.process_lines(vec![rest]);
        }
        self.finished = true;
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        self.finished = true;
        self.pending.clear();
        self.lines.clear();
        self.release();
        err
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.reader.release();
            debug!(dropped_frames = self.dropped_frames, "SSE reader released");
        }
    }
}

impl<R: ChunkReader> Drop for StreamFrameDecoder<R> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<R: ChunkReader> std::fmt::Debug for StreamFrameDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFrameDecoder")
            .field("buffered", &self.lines.len())
            .field("pending_events", &self.pending.len())
            .field("finished", &self.finished)
            .field("released", &self.released)
            .field("dropped_frames", &self.dropped_frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready};

    /// Scripted reader that counts releases.
    struct ScriptedReader {
        chunks: VecDeque<StreamResult<Bytes>>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedReader {
        fn new(chunks: Vec<StreamResult<Bytes>>) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            let reader = Self {
                chunks: chunks.into(),
                releases: releases.clone(),
            };
            (reader, releases)
        }
    }

    #[async_trait]
    impl ChunkReader for ScriptedReader {
        async fn read(&mut self) -> StreamResult<Option<Bytes>> {
            self.chunks.pop_front().transpose()
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reader_from(
        chunks: &[&str],
    ) -> ByteStreamReader<impl Stream<Item = StreamResult<Bytes>> + Unpin + Send> {
        let chunks: Vec<StreamResult<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .collect();
        ByteStreamReader::new(stream::iter(chunks))
    }

    async fn texts<R: ChunkReader>(mut decoder: StreamFrameDecoder<R>) -> Vec<Option<String>> {
        let mut out = Vec::new();
        while let Some(event) = decoder.next_event().await.unwrap() {
            out.push(event.delta_text().map(str::to_owned));
        }
        out
    }

    #[tokio::test]
    async fn test_basic_frames() {
        let decoder = StreamFrameDecoder::new(reader_from(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n",
        ]));

        assert_eq!(
            texts(decoder).await,
            vec![Some("Hel".to_string()), Some("lo".to_string())]
        );
    }

    #[tokio::test]
    async fn test_blank_lines_and_comments_skipped() {
        let decoder = StreamFrameDecoder::new(reader_from(&[
            ": ping\n\n\n\r\n",
            "event: message\n",
            "data: {\"content\":\"a\"}\n\n\n\n",
        ]));

        assert_eq!(texts(decoder).await, vec![Some("a".to_string())]);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let mut decoder = StreamFrameDecoder::new(reader_from(&[
            "data: {\"content\":\"a\"}\n",
            "data: {not valid json\n",
            "data: {\"content\":\"b\"}\n",
        ]));

        let first = decoder.next_event().await.unwrap().unwrap();
        let second = decoder.next_event().await.unwrap().unwrap();
        assert_eq!(first.delta_text(), Some("a"));
        assert_eq!(second.delta_text(), Some("b"));
        assert!(decoder.next_event().await.unwrap().is_none());
        assert_eq!(decoder.dropped_frames(), 1);
    }

    #[tokio::test]
    async fn test_event_without_text_is_yielded() {
        let decoder = StreamFrameDecoder::new(reader_from(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[]}\n",
        ]));

        assert_eq!(texts(decoder).await, vec![None, None]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let decoder = StreamFrameDecoder::new(reader_from(&[
            "data: {\"content\":\"a\"}\n",
            "data: {\"content\":",
            "\"tail\"}",
        ]));

        assert_eq!(
            texts(decoder).await,
            vec![Some("a".to_string()), Some("tail".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sentinel_stops_reading() {
        let (reader, releases) = ScriptedReader::new(vec![
            Ok(Bytes::from_static(
                b"data: {\"content\":\"a\"}\ndata: [DONE]\ndata: {\"content\":\"late\"}\n",
            )),
            Err(StreamError::Transport("must not be read".into())),
        ]);
        let mut decoder = StreamFrameDecoder::new(reader);

        assert_eq!(decoder.next_event().await.unwrap().unwrap().delta_text(), Some("a"));
        assert!(decoder.next_event().await.unwrap().is_none());
        assert!(decoder.next_event().await.unwrap().is_none());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sentinel_can_be_skipped() {
        let config = DecoderConfig::new().stop_at_done(false);
        let decoder = StreamFrameDecoder::with_config(
            reader_from(&["data: [DONE]\n", "data: {\"content\":\"after\"}\n"]),
            config,
        );

        assert_eq!(texts(decoder).await, vec![Some("after".to_string())]);
    }

    #[tokio::test]
    async fn test_transport_error_releases_reader() {
        let (reader, releases) = ScriptedReader::new(vec![
            Ok(Bytes::from_static(b"data: {\"content\":\"a\"}\n")),
            Err(StreamError::Connection("reset".into())),
        ]);
        let mut decoder = StreamFrameDecoder::new(reader);

        assert!(decoder.next_event().await.unwrap().is_some());
        let err = decoder.next_event().await.unwrap_err();
        assert!(matches!(err, StreamError::Connection(_)));
        assert!(decoder.is_released());
        assert!(decoder.next_event().await.unwrap().is_none());

        drop(decoder);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_decoder_releases_reader() {
        let (reader, releases) = ScriptedReader::new(vec![Ok(Bytes::from_static(
            b"data: {\"content\":\"a\"}\ndata: {\"content\":\"b\"}\n",
        ))]);
        let mut decoder = StreamFrameDecoder::new(reader);

        assert!(decoder.next_event().await.unwrap().is_some());
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        drop(decoder);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_buffer_overflow_is_fatal() {
        let config = DecoderConfig::new().max_buffer_size(16);
        let mut decoder = StreamFrameDecoder::with_config(
            reader_from(&["data: {\"content\":\"this line never ends"]),
            config,
        );

        let err = decoder.next_event().await.unwrap_err();
        assert!(matches!(err, StreamError::BufferOverflow { limit: 16 }));
        assert!(decoder.is_released());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<StreamResult<Bytes>>();
        let token = CancellationToken::new();
        let mut decoder =
            StreamFrameDecoder::new(ByteStreamReader::new(rx)).with_cancellation(token.clone());

        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"content\":\"a\"}\n")))
            .unwrap();
        assert_eq!(decoder.next_event().await.unwrap().unwrap().delta_text(), Some("a"));

        token.cancel();
        assert!(decoder.next_event().await.unwrap().is_none());
        assert!(decoder.is_released());
    }

    #[test]
    fn test_decoder_suspends_until_line_completes() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<StreamResult<Bytes>>();
        let mut decoder = StreamFrameDecoder::new(ByteStreamReader::new(rx));

        let mut next = tokio_test::task::spawn(decoder.next_event());
        assert_pending!(next.poll());

        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"content\":\"a\"}")))
            .unwrap();
        assert_pending!(next.poll());

        tx.unbounded_send(Ok(Bytes::from_static(b"\n"))).unwrap();
        let event = assert_ready!(next.poll()).unwrap().unwrap();
        assert_eq!(event.delta_text(), Some("a"));
    }

    #[tokio::test]
    async fn test_collect_text() {
        let decoder = StreamFrameDecoder::new(reader_from(&[
            "data: {\"content\":\"塔\"}\n",
            "data: {\"content\":\"罗\"}\n",
        ]));

        let mut seen = Vec::new();
        let full = decoder
            .collect_text(|text| seen.push(text.to_string()))
            .await
            .unwrap();
        assert_eq!(full, "塔罗");
        assert_eq!(seen, vec!["塔", "罗"]);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let decoder = StreamFrameDecoder::new(reader_from(&[
            "data: {\"content\":\"x\"}\n",
            "data: {\"content\":\"y\"}\n",
        ]));

        let events: Vec<_> = decoder.into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_ref().unwrap().delta_text(), Some("y"));
    }
}
