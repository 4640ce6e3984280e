//! The publisher: batching plus a pluggable flush policy.
//!
//! A [`Publisher`] turns one `publish` call into a sequence of limit-bounded
//! batches, hands each to its [`FlushPolicy`], and re-drives records the policy
//! returns as retryable until every record is delivered, failed, dropped or
//! abandoned.
//!
//! All batching state lives on the call's own stack, so one `Publisher` can
//! serve concurrent submissions from many tasks.
//!
//! # Example
//!
//! ```
//! use stream_publisher::{Event, Publisher, PublisherConfig, ScriptedStream};
//!
//! # tokio_test_block_on(async {
//! let publisher = Publisher::new(ScriptedStream::new(), PublisherConfig::default()).unwrap();
//! let summary = publisher
//!     .publish("clickstream", vec![Event::text("user-1", "hello")])
//!     .await
//!     .unwrap();
//!
//! assert_eq!(summary.delivered, 1);
//! assert_eq!(publisher.client().call_count(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

pub mod policy;
pub mod types;

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::batching::accumulator::{AdmitError, BatchAccumulator, BatchLimits, FlushBatch};
use crate::config::{ConfigError, PublisherConfig};
use crate::metrics;
use crate::publish::gate::{PublishGate, StreamClient};
use crate::record::{Event, Fingerprint, Record, TextEncoding};

pub use policy::{Disposition, FlushPolicy, PlainFlush, RetryingFlush};
pub use types::{PublishError, PublishSummary, RetryState, Settled};

/// Batches events and publishes them through a flush policy.
pub struct Publisher<C, P = RetryingFlush> {
    gate: PublishGate<C>,
    policy: P,
    limits: BatchLimits,
    config: PublisherConfig,
}

/// State owned by a single `publish` call
struct Submission {
    accumulator: BatchAccumulator,
    state: RetryState,
    summary: PublishSummary,
}

impl<C: StreamClient> Publisher<C, RetryingFlush> {
    /// Publisher with the retrying policy configured from `config`.
    pub fn new(client: C, config: PublisherConfig) -> Result<Self, ConfigError> {
        let policy = RetryingFlush::from_config(&config);
        Self::with_policy(client, config, policy)
    }
}

impl<C: StreamClient> Publisher<C, PlainFlush> {
    /// Publisher that sends each batch once and never retries.
    pub fn plain(client: C, config: PublisherConfig) -> Result<Self, ConfigError> {
        Self::with_policy(client, config, PlainFlush)
    }
}

impl<C: StreamClient, P: FlushPolicy> Publisher<C, P> {
    pub fn with_policy(client: C, config: PublisherConfig, policy: P) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            gate: PublishGate::new(client),
            policy,
            limits: config.batch_limits()?,
            config,
        })
    }

    pub fn client(&self) -> &C {
        self.gate.client()
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Publish `events` to `stream_id` using the configured text encoding.
    pub async fn publish(&self, stream_id: &str, events: Vec<Event>) -> Result<PublishSummary, PublishError> {
        self.publish_with_encoding(stream_id, events, self.config.encoding).await
    }

    /// Publish `events`, encoding text payloads with `encoding`.
    pub async fn publish_with_encoding(
        &self,
        stream_id: &str,
        events: Vec<Event>,
        encoding: TextEncoding,
    ) -> Result<PublishSummary, PublishError> {
        let count = events.len();
        if self.config.enable_debug_logs {
            info!(stream_id, count, %encoding, "publish invoked");
        } else {
            debug!(stream_id, count, %encoding, "publish invoked");
        }

        let records = prepare(events, encoding).map_err(|e| {
            error!(stream_id, error = %e, "Rejecting submission, nothing was sent");
            e
        })?;

        let mut submission = Submission {
            accumulator: BatchAccumulator::new(self.limits),
            state: RetryState::default(),
            summary: PublishSummary {
                submitted: count,
                ..Default::default()
            },
        };

        for record in records {
            if let Some(batch) = self.admit(&mut submission, record) {
                self.dispatch(stream_id, &mut submission, batch).await?;
            }
        }
        if let Some(batch) = submission.accumulator.flush_if_non_empty() {
            self.dispatch(stream_id, &mut submission, batch).await?;
        }

        let mut summary = submission.summary;
        summary.publish_calls = submission.state.publish_calls();

        if summary.abandoned > 0 {
            error!(stream_id, %summary, "Submission finished with abandoned records");
            return Err(PublishError::RecordsAbandoned {
                abandoned: summary.abandoned,
                delivered: summary.delivered,
            });
        }

        if self.config.enable_debug_logs {
            info!(stream_id, %summary, "publish completed");
        } else {
            debug!(stream_id, %summary, "publish completed");
        }
        Ok(summary)
    }

    /// Publish with a deadline on the whole call.
    ///
    /// On expiry the call stops at its current suspension point. Batches the
    /// stream already acknowledged stay delivered.
    pub async fn publish_with_deadline(
        &self,
        stream_id: &str,
        events: Vec<Event>,
        deadline: Duration,
    ) -> Result<PublishSummary, PublishError> {
        match timeout(deadline, self.publish(stream_id, events)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(stream_id, ?deadline, "publish deadline exceeded");
                Err(PublishError::DeadlineExceeded(deadline))
            }
        }
    }

    /// Admit one record, logging and counting it if it is dropped.
    fn admit(&self, submission: &mut Submission, record: Record) -> Option<FlushBatch> {
        match submission.accumulator.admit(record) {
            Ok(flushed) => flushed,
            Err(err @ AdmitError::Unmeasurable { .. }) => {
                error!(error = %err, "Cannot produce data size of record, dropping it");
                metrics::record_dropped("unmeasurable");
                submission.summary.dropped += 1;
                None
            }
            Err(err @ AdmitError::Oversize { .. }) => {
                error!(error = %err, "FATAL: record exceeds maximum size and will not be published");
                metrics::record_dropped("oversize");
                submission.summary.dropped += 1;
                None
            }
        }
    }

    /// Settle `batch` and every retry round that follows from it.
    async fn dispatch(
        &self,
        stream_id: &str,
        submission: &mut Submission,
        batch: FlushBatch,
    ) -> Result<(), PublishError> {
        let mut pending = vec![batch];
        let mut round = 0;

        loop {
            let mut survivors = Vec::new();
            for batch in std::mem::take(&mut pending) {
                let settled = self
                    .policy
                    .flush(&self.gate, stream_id, &batch, &mut submission.state)
                    .await?;
                submission.summary.absorb(&settled);
                survivors.extend(settled.retries);
            }
            if survivors.is_empty() {
                return Ok(());
            }

            round += 1;
            let delay = self.policy.backoff(round);
            warn!(stream_id, count = survivors.len(), round, ?delay, "Records require retry");
            metrics::record_backoff(delay);
            sleep(delay).await;

            for record in survivors {
                pending.extend(self.admit(submission, record));
            }
            pending.extend(submission.accumulator.flush_if_non_empty());
        }
    }
}

/// Convert every event up front so a bad payload aborts before any send.
///
/// Identical events are numbered so each copy keeps its own retry count.
fn prepare(events: Vec<Event>, encoding: TextEncoding) -> Result<Vec<Record>, PublishError> {
    let mut seen: HashMap<Fingerprint, u32> = HashMap::new();
    events
        .into_iter()
        .enumerate()
        .map(|(index, event)| {
            let record = Record::from_event(event, encoding)
                .map_err(|source| PublishError::Conversion { index, source })?;
            if !record.has_valid_partition_key() {
                return Err(PublishError::InvalidPartitionKey {
                    index,
                    chars: record.partition_key.chars().count(),
                });
            }
            let copies = seen.entry(record.fingerprint()).or_insert(0);
            let occurrence = *copies;
            *copies += 1;
            Ok(record.with_occurrence(occurrence))
        })
        .collect()
}
