// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for stream-publisher.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing a recorder (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `stream_publisher_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `status`: completed, retryable_error, fatal_error
//! - `reason`: unmeasurable, oversize
//! - `kind`: record, transport

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one publish call and how it ended
pub fn record_publish_call(status: &str) {
    counter!(
        "stream_publisher_publish_calls_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record publish call latency
pub fn record_publish_latency(duration: Duration) {
    histogram!("stream_publisher_publish_seconds").record(duration.as_secs_f64());
}

/// Record batch size in records
pub fn record_batch_size(count: usize) {
    histogram!("stream_publisher_batch_size").record(count as f64);
}

/// Record batch size in bytes
pub fn record_batch_bytes(bytes: usize) {
    histogram!("stream_publisher_batch_bytes").record(bytes as f64);
}

/// Record records dropped before batching
pub fn record_dropped(reason: &str) {
    counter!(
        "stream_publisher_records_dropped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record records confirmed by the stream
pub fn record_delivered(count: usize) {
    counter!("stream_publisher_records_delivered_total").increment(count as u64);
}

/// Record records that failed with a non-retryable error code
pub fn record_failed(count: usize) {
    counter!("stream_publisher_records_failed_total").increment(count as u64);
}

/// Record a retry (re-queued record or resent batch)
pub fn record_retry(kind: &str, count: usize) {
    counter!(
        "stream_publisher_retries_total",
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

/// Record records abandoned after hitting their retry ceiling
pub fn record_abandoned(count: usize) {
    counter!("stream_publisher_records_abandoned_total").increment(count as u64);
}

/// Record backoff sleep duration
pub fn record_backoff(duration: Duration) {
    histogram!("stream_publisher_backoff_seconds").record(duration.as_secs_f64());
}
