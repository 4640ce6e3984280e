//! Flush policies: what happens to a batch once it leaves the accumulator.
//!
//! - [`PlainFlush`] sends once and reports whatever came back.
//! - [`RetryingFlush`] resends whole batches after server-side failures and
//!   hands retryable per-record failures back for another round.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::{PublishError, RetryState, Settled};
use crate::batching::accumulator::FlushBatch;
use crate::config::PublisherConfig;
use crate::metrics;
use crate::publish::gate::{BatchOutcome, PerRecordResult, PublishGate, StreamClient};
use crate::resilience::retry::RetryConfig;

/// Decision for one per-record result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    /// Error code outside the retryable set
    Failed,
    Retry,
}

/// Strategy applied to each flushed batch.
#[async_trait]
pub trait FlushPolicy: Send + Sync {
    /// Publish `batch` and settle every record in it.
    async fn flush<C: StreamClient>(
        &self,
        gate: &PublishGate<C>,
        stream_id: &str,
        batch: &FlushBatch,
        state: &mut RetryState,
    ) -> Result<Settled, PublishError>;

    /// Delay before retry round `round` (1-based).
    fn backoff(&self, _round: u32) -> Duration {
        Duration::ZERO
    }
}

/// Send once, never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFlush;

#[async_trait]
impl FlushPolicy for PlainFlush {
    async fn flush<C: StreamClient>(
        &self,
        gate: &PublishGate<C>,
        stream_id: &str,
        batch: &FlushBatch,
        state: &mut RetryState,
    ) -> Result<Settled, PublishError> {
        state.note_publish_call();
        match gate.send(stream_id, batch).await {
            BatchOutcome::Failed(err) => {
                error!(stream_id, sequence = batch.sequence, error = %err, "Publish call failed");
                Err(PublishError::Transport(err))
            }
            BatchOutcome::Completed(results) => {
                let mut settled = Settled::default();
                for result in &results {
                    match result {
                        PerRecordResult::Success { .. } => settled.delivered += 1,
                        PerRecordResult::Failure { error_code, message } => {
                            warn!(stream_id, error_code, ?message, "Record rejected by stream");
                            settled.failed += 1;
                        }
                    }
                }
                metrics::record_delivered(settled.delivered);
                metrics::record_failed(settled.failed);
                Ok(settled)
            }
        }
    }
}

/// Retrying flush with bounded whole-request and per-record attempts.
#[derive(Debug, Clone)]
pub struct RetryingFlush {
    retry: RetryConfig,
    retryable: HashSet<String>,
}

impl RetryingFlush {
    pub fn new<I, S>(retry: RetryConfig, retryable_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            retry,
            retryable: retryable_codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            retry: config.retry_config(),
            retryable: config.retryable_codes(),
        }
    }

    /// Pure classification of one result.
    #[must_use]
    pub fn classify(&self, result: &PerRecordResult) -> Disposition {
        match result.error_code() {
            None => Disposition::Delivered,
            Some(code) if self.retryable.contains(code) => Disposition::Retry,
            Some(_) => Disposition::Failed,
        }
    }

    fn settle(
        &self,
        stream_id: &str,
        batch: &FlushBatch,
        results: &[PerRecordResult],
        state: &mut RetryState,
    ) -> Settled {
        let mut settled = Settled::default();
        for (record, result) in batch.records.iter().zip(results) {
            if let PerRecordResult::Failure { error_code, message } = result {
                warn!(stream_id, error_code, ?message, partition_key = %record.partition_key, "Stream reported record error");
            }
            match self.classify(result) {
                Disposition::Delivered => settled.delivered += 1,
                Disposition::Failed => settled.failed += 1,
                Disposition::Retry => {
                    let failures = state.note_record_failure(record);
                    if failures >= self.retry.max_record_attempts {
                        warn!(
                            stream_id,
                            fingerprint = %record.fingerprint(),
                            failures,
                            "Record reached its retry ceiling, abandoning"
                        );
                        settled.abandoned += 1;
                    } else {
                        settled.retries.push(record.clone());
                    }
                }
            }
        }

        metrics::record_delivered(settled.delivered);
        metrics::record_failed(settled.failed);
        metrics::record_abandoned(settled.abandoned);
        metrics::record_retry("record", settled.retries.len());
        settled
    }
}

impl Default for RetryingFlush {
    fn default() -> Self {
        Self::from_config(&PublisherConfig::default())
    }
}

#[async_trait]
impl FlushPolicy for RetryingFlush {
    async fn flush<C: StreamClient>(
        &self,
        gate: &PublishGate<C>,
        stream_id: &str,
        batch: &FlushBatch,
        state: &mut RetryState,
    ) -> Result<Settled, PublishError> {
        debug!(stream_id, sequence = batch.sequence, count = batch.len(), "Attempting to flush records");
        let mut attempts = 0;

        loop {
            attempts += 1;
            state.note_publish_call();

            let err = match gate.send(stream_id, batch).await {
                BatchOutcome::Completed(results) => {
                    if attempts > 1 {
                        info!(stream_id, sequence = batch.sequence, attempts, "Batch accepted after retries");
                    }
                    return Ok(self.settle(stream_id, batch, &results, state));
                }
                BatchOutcome::Failed(err) => err,
            };

            if !err.is_retryable() {
                error!(stream_id, sequence = batch.sequence, error = %err, "Unhandleable client error");
                return Err(PublishError::Transport(err));
            }
            if attempts >= self.retry.max_attempts {
                error!(
                    stream_id,
                    sequence = batch.sequence,
                    attempts,
                    error = %err,
                    "Giving up on batch after repeated failures"
                );
                return Err(PublishError::RetryBudgetExhausted {
                    attempts,
                    last_error: err,
                });
            }

            let delay = self.retry.delay_for(attempts);
            warn!(
                stream_id,
                sequence = batch.sequence,
                attempt = attempts,
                max_attempts = self.retry.max_attempts,
                error = %err,
                ?delay,
                "Manageable publish failure, resending batch after backoff"
            );
            metrics::record_retry("transport", 1);
            metrics::record_backoff(delay);
            sleep(delay).await;
        }
    }

    fn backoff(&self, round: u32) -> Duration {
        self.retry.delay_for(round)
    }
}
