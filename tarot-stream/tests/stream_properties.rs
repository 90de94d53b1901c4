//! End-to-end properties of decoding and consuming a chunked SSE body.

use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use tarot_stream::prelude::*;
use tarot_stream::ManualScheduler;

const HELLO: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n";

const MIXED: &str = concat!(
    ": stream opened\n\n",
    "data: {\"id\":\"r1\",\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\r\n\r\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"The Tower 🗼 \"}}]}\n\n\n",
    "event: ping\n",
    "data: {not valid json\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"塔罗牌\"}}]}\n\n",
    "data: {\"content\":\"—fin\"}\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}",
);

fn chunked(body: &str, cuts: &[usize]) -> Vec<StreamResult<Bytes>> {
    let bytes = body.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        chunks.push(Ok(Bytes::copy_from_slice(&bytes[start..cut])));
        start = cut;
    }
    chunks.push(Ok(Bytes::copy_from_slice(&bytes[start..])));
    chunks
}

async fn decode(chunks: Vec<StreamResult<Bytes>>) -> Vec<StreamEvent> {
    let mut decoder = StreamFrameDecoder::new(ByteStreamReader::new(stream::iter(chunks)));
    let mut events = Vec::new();
    while let Some(event) = decoder.next_event().await.expect("decode") {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn chunk_boundaries_do_not_change_events() {
    let reference = decode(chunked(MIXED, &[])).await;
    assert_eq!(reference.len(), 5);

    let len = MIXED.len();
    for first in 0..=len {
        for second in (first..=len).step_by(7) {
            let events = decode(chunked(MIXED, &[first, second])).await;
            assert_eq!(events, reference, "cuts at {first} and {second}");
        }
    }
}

#[tokio::test]
async fn one_byte_chunks_decode_like_one_chunk() {
    let reference = decode(chunked(MIXED, &[])).await;
    let cuts: Vec<usize> = (1..MIXED.len()).collect();
    assert_eq!(decode(chunked(MIXED, &cuts)).await, reference);
}

#[tokio::test]
async fn sentinel_yields_nothing_and_ends_cleanly() {
    let events = decode(chunked("data: [DONE]\n", &[])).await;
    assert!(events.is_empty());

    let events = decode(chunked(HELLO, &[])).await;
    let texts: Vec<_> = events.iter().filter_map(StreamEvent::delta_text).collect();
    assert_eq!(texts, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn leading_byte_order_mark_keeps_first_frame() {
    let body = format!("\u{FEFF}{HELLO}");
    for cut in 0..=4 {
        let events = decode(chunked(&body, &[cut])).await;
        let texts: Vec<_> = events.iter().filter_map(StreamEvent::delta_text).collect();
        assert_eq!(texts, vec!["Hel", "lo"], "cut at {cut}");
    }
}

#[tokio::test]
async fn malformed_frame_only_skips_itself() {
    let body = "data: {\"content\":\"a\"}\ndata: {not valid json\ndata: {\"content\":\"b\"}\ndata: {\"content\":\"c\"}\n";
    let events = decode(chunked(body, &[])).await;
    let texts: Vec<_> = events.iter().filter_map(StreamEvent::delta_text).collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[rstest]
#[case(&[5, 60])]
#[case(&[48, 49])]
#[case(&[1, 108])]
#[case(&[0, 0])]
#[tokio::test]
async fn consumer_accumulates_hello(#[case] cuts: &[usize]) {
    let scheduler = Arc::new(ManualScheduler::new());
    let rendered = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&rendered);
    let batcher = RenderBatcher::new(scheduler.clone(), move |text| {
        sink.lock().push(text.to_string());
    });
    let history = Arc::new(MemoryHistory::new());
    let mut consumer = StreamConsumer::new(batcher).with_history(history.clone());

    let chunks = chunked(HELLO, cuts);
    assert_eq!(chunks.len(), 3);
    let outcome = consumer
        .run(async move { Ok(ByteStreamReader::new(stream::iter(chunks))) })
        .await;

    assert_eq!(outcome.text(), Some("Hello"));
    assert_eq!(consumer.state(), ConsumerState::Completed);
    assert_eq!(rendered.lock().last().map(String::as_str), Some("Hello"));

    consumer.take_persist_task().expect("history task").await.unwrap();
    assert_eq!(history.latest().unwrap().content, "Hello");
}

#[tokio::test]
async fn consumer_hello_every_three_way_split() {
    let len = HELLO.len();
    for first in 0..=len {
        for second in first..=len {
            let scheduler = Arc::new(ManualScheduler::new());
            let batcher = RenderBatcher::new(scheduler, |_| {});
            let mut consumer = StreamConsumer::new(batcher);
            let chunks = chunked(HELLO, &[first, second]);

            let outcome = consumer
                .run(async move { Ok(ByteStreamReader::new(stream::iter(chunks))) })
                .await;
            assert_eq!(outcome.text(), Some("Hello"), "cuts at {first} and {second}");
        }
    }
}
