//! # Stream Publisher
//!
//! Batches application events into size- and count-bounded requests and
//! publishes them to a sharded append-only log stream, retrying partial and
//! transient failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Publisher::publish                     │
//! │  • Converts every event to bytes up front                  │
//! │  • Rejects bad payloads/keys before anything is sent       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BatchAccumulator                        │
//! │  • ≤ 500 records, ≤ 5 MiB per batch                        │
//! │  • Drops unmeasurable and > 1 MiB records                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (one batch at a time)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  FlushPolicy + PublishGate                  │
//! │  • One remote call per send, normalized BatchOutcome       │
//! │  • 4xx: fail fast; 5xx/connectivity: resend same batch     │
//! │  • Retryable record errors: back to the accumulator        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_publisher::{Event, Publisher, PublisherConfig, ScriptedStream};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Any StreamClient works here; ScriptedStream is the in-memory one
//!     let publisher = Publisher::new(ScriptedStream::new(), PublisherConfig::default())
//!         .expect("valid config");
//!
//!     let events = vec![
//!         Event::text("user-1", r#"{"action":"login"}"#),
//!         Event::binary("user-2", vec![0x01, 0x02]),
//!     ];
//!     let summary = publisher.publish("clickstream", events).await.expect("publish failed");
//!     println!("{summary}");
//! }
//! ```
//!
//! ## Delivery Contract
//!
//! - At-least-once: a record may be resent after a whole-request failure.
//! - Order is kept within a batch and among the retries of one batch, not
//!   across retry rounds.
//! - Whole-request attempts and per-record attempts are both capped.
//!
//! ## Modules
//!
//! - [`record`]: events, records, payload encodings, fingerprints
//! - [`batching`]: the limit-respecting accumulator
//! - [`publish`]: the remote boundary ([`StreamClient`], [`PublishGate`]) and [`ScriptedStream`]
//! - [`engine`]: [`Publisher`] and the flush policies
//! - [`resilience`]: backoff configuration
//! - [`config`]: [`PublisherConfig`]
//! - [`metrics`]: counters and histograms

pub mod config;
pub mod record;
pub mod batching;
pub mod publish;
pub mod resilience;
pub mod engine;
pub mod metrics;

pub use config::{ConfigError, PublisherConfig};
pub use record::{get_data_bytes, ConversionError, Event, EventData, Fingerprint, Record, TextEncoding};
pub use batching::accumulator::{
    AdmitError, Batch, BatchAccumulator, BatchLimits, FlushBatch, FlushReason, LimitsError,
    MAX_BATCH_BYTES, MAX_RECORDS, MAX_RECORD_BYTES,
};
pub use publish::gate::{BatchOutcome, ErrorClass, PerRecordResult, PublishGate, StreamClient, TransportError};
pub use publish::memory::{Fallback, Scripted, ScriptedStream};
pub use engine::{
    Disposition, FlushPolicy, PlainFlush, PublishError, PublishSummary, Publisher, RetryState,
    RetryingFlush, Settled,
};
pub use resilience::retry::{Jitter, RetryConfig};
