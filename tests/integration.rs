//! End-to-end tests for the publisher against scripted streams.
//!
//! Run with: `cargo test --test integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use stream_publisher::{
    Event, EventData, Fallback, PerRecordResult, PublishError, Publisher, PublisherConfig, Record,
    ScriptedStream, StreamClient, TransportError, MAX_BATCH_BYTES, MAX_RECORDS,
};

const THROUGHPUT: &str = "ProvisionedThroughputExceededException";

fn fast_config() -> PublisherConfig {
    serde_json::from_value(json!({
        "retry_initial_delay_ms": 1,
        "retry_max_delay_ms": 4,
        "retry_jitter": "none"
    }))
    .unwrap()
}

fn publisher(stream: ScriptedStream) -> Publisher<ScriptedStream> {
    Publisher::new(stream, fast_config()).unwrap()
}

fn generate_event() -> Event {
    Event::text("1", r#"{"Ben":"Is Awesome!"}"#)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_puts_single_record() {
    let publisher = publisher(ScriptedStream::new());
    publisher.publish("fake", vec![Event::binary("1", vec![b'x'; 10])]).await.unwrap();
    assert_eq!(publisher.client().call_count(), 1);
}

#[tokio::test]
async fn test_puts_buffer_payload() {
    let payload = serde_json::to_vec(&json!({"Ben": "Is Awesome!"})).unwrap();
    let publisher = publisher(ScriptedStream::new());
    publisher.publish("fake", vec![Event::binary("1", payload.clone())]).await.unwrap();

    assert_eq!(publisher.client().call_count(), 1);
    assert_eq!(publisher.client().delivered()[0].data, payload);
}

#[tokio::test]
async fn test_retries_on_retryable_failure() {
    let stream = ScriptedStream::new();
    stream.push_error(TransportError::from_status(500, "You Better Retry this server failure"));
    let publisher = publisher(stream);

    publisher.publish("fake", vec![generate_event()]).await.unwrap();
    assert_eq!(publisher.client().call_count(), 2);
}

#[tokio::test]
async fn test_handles_individual_retryable_record_failure() {
    let stream = ScriptedStream::new();
    stream.push_results(vec![PerRecordResult::Failure {
        error_code: THROUGHPUT.into(),
        message: None,
    }]);
    let publisher = publisher(stream);

    publisher.publish("fake", vec![generate_event()]).await.unwrap();
    assert_eq!(publisher.client().call_count(), 2);
}

#[tokio::test]
async fn test_errors_on_non_string_or_binary_payload() {
    let publisher = publisher(ScriptedStream::new());
    let event = Event::new("1", EventData::Structured(json!({"Ben": "Is Awesome!"})));

    let err = publisher.publish("fake", vec![event]).await.unwrap_err();
    assert_eq!(publisher.client().call_count(), 0);
    assert!(matches!(err, PublishError::Conversion { .. }));
}

// =============================================================================
// Batching limits
// =============================================================================

#[tokio::test]
async fn test_large_submission_respects_limits() {
    let publisher = publisher(ScriptedStream::with_shards(4));
    // 1200 records of ~20 KiB: count and byte ceilings both come into play
    let events: Vec<_> = (0..1200)
        .map(|i| Event::binary(format!("key-{i}"), vec![(i % 251) as u8; 20 * 1024]))
        .collect();

    let summary = publisher.publish("big", events).await.unwrap();
    assert_eq!(summary.delivered, 1200);

    let calls = publisher.client().calls();
    for call in &calls {
        let bytes: usize = call.iter().filter_map(Record::size_bytes).sum();
        assert!(call.len() <= MAX_RECORDS);
        assert!(bytes <= MAX_BATCH_BYTES);
    }
    assert_eq!(calls.iter().map(Vec::len).sum::<usize>(), 1200);

    // Submission order is kept across batches when nothing fails
    let sent: Vec<_> = calls.into_iter().flatten().map(|r| r.partition_key).collect();
    let expected: Vec<_> = (0..1200).map(|i| format!("key-{i}")).collect();
    assert_eq!(sent, expected);
}

#[tokio::test]
async fn test_every_call_targets_submitted_stream() {
    let publisher = publisher(ScriptedStream::new());
    let events = (0..600).map(|i| Event::text(i.to_string(), "x")).collect();
    publisher.publish("orders", events).await.unwrap();

    let streams = publisher.client().streams();
    assert_eq!(streams.len(), 2);
    assert!(streams.iter().all(|s| s == "orders"));
}

// =============================================================================
// Retry behaviour
// =============================================================================

#[tokio::test]
async fn test_retry_keeps_relative_order_of_failed_records() {
    let stream = ScriptedStream::new();
    stream.reject_positions(vec![1, 3, 4], "InternalFailure");
    let publisher = publisher(stream);
    let events = (0..6).map(|i| Event::text(format!("k{i}"), "v")).collect();

    publisher.publish("fake", events).await.unwrap();

    let calls = publisher.client().calls();
    let retried: Vec<_> = calls[1].iter().map(|r| r.partition_key.as_str()).collect();
    assert_eq!(retried, ["k1", "k3", "k4"]);
}

#[tokio::test]
async fn test_survivors_follow_record_that_triggered_flush() {
    let stream = ScriptedStream::new();
    stream.reject_positions(vec![0], THROUGHPUT);
    let config = PublisherConfig {
        max_records: 2,
        ..fast_config()
    };
    let publisher = Publisher::new(stream, config).unwrap();
    let events = (0..5).map(|i| Event::text(format!("k{i}"), "v")).collect();

    let summary = publisher.publish("fake", events).await.unwrap();
    assert_eq!(summary.delivered, 5);

    let order: Vec<Vec<String>> = publisher
        .client()
        .calls()
        .into_iter()
        .map(|call| call.into_iter().map(|r| r.partition_key).collect())
        .collect();
    // k2 was already waiting when k0 came back for its retry
    assert_eq!(order, vec![vec!["k0", "k1"], vec!["k2", "k0"], vec!["k3", "k4"]]);
}

#[tokio::test]
async fn test_client_error_stops_calls() {
    let stream = ScriptedStream::new();
    stream.push_error(TransportError::from_status(403, "AccessDenied"));
    let publisher = publisher(stream);

    let err = publisher.publish("fake", vec![generate_event()]).await.unwrap_err();
    assert!(matches!(err, PublishError::Transport(_)));
    assert!(!err.nothing_sent());
    assert_eq!(publisher.client().call_count(), 1);
}

#[tokio::test]
async fn test_sustained_server_errors_exhaust_budget() {
    let stream = ScriptedStream::new();
    stream.set_fallback(Fallback::Error(TransportError::from_status(503, "ServiceUnavailable")));
    let publisher = publisher(stream);

    let err = publisher.publish("fake", vec![generate_event()]).await.unwrap_err();
    match err {
        PublishError::RetryBudgetExhausted { attempts, last_error } => {
            assert_eq!(attempts, 5);
            assert_eq!(last_error.status_code, Some(503));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(publisher.client().call_count(), 5);
}

#[tokio::test]
async fn test_earlier_batches_stay_delivered_after_fatal_error() {
    let stream = ScriptedStream::new();
    stream.push_results(vec![PerRecordResult::success("shardId-000000000000", "1"); 500]);
    stream.push_error(TransportError::from_status(400, "ValidationException"));
    let publisher = publisher(stream);
    let events = (0..501).map(|i| Event::text(i.to_string(), "x")).collect();

    let err = publisher.publish("fake", events).await.unwrap_err();
    assert!(matches!(err, PublishError::Transport(_)));
    assert_eq!(publisher.client().delivered().len(), 500);
}

/// Fails every other call at the transport level, accepts the rest.
struct FlakyStream {
    calls: AtomicUsize,
    inner: ScriptedStream,
}

#[async_trait]
impl StreamClient for FlakyStream {
    async fn put_records(
        &self,
        stream_id: &str,
        records: &[Record],
    ) -> Result<Vec<PerRecordResult>, TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(TransportError::connectivity("connection reset"));
        }
        self.inner.put_records(stream_id, records).await
    }
}

#[tokio::test]
async fn test_flaky_transport_delivers_everything_once_per_acceptance() {
    let flaky = Arc::new(FlakyStream {
        calls: AtomicUsize::new(0),
        inner: ScriptedStream::new(),
    });
    let publisher = Publisher::new(Arc::clone(&flaky), fast_config()).unwrap();
    let events = (0..1000).map(|i| Event::text(i.to_string(), "payload")).collect();

    let summary = publisher.publish("fake", events).await.unwrap();
    assert_eq!(summary.delivered, 1000);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.publish_calls, 4);
    assert_eq!(flaky.inner.delivered().len(), 1000);
}

#[tokio::test]
async fn test_plain_publisher_does_not_requeue() {
    let stream = ScriptedStream::new();
    stream.reject_positions(vec![0], THROUGHPUT);
    let publisher = Publisher::plain(stream, fast_config()).unwrap();

    let summary = publisher.publish("fake", vec![generate_event()]).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(publisher.client().call_count(), 1);
}
