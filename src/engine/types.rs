//! Public types for the publisher engine.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::publish::gate::TransportError;
use crate::record::{ConversionError, Fingerprint, Record};

/// Why a submission was rejected.
///
/// Conversion and partition key errors happen before anything is sent.
/// The others may leave earlier batches of the same call delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("event {index}: {source}")]
    Conversion {
        index: usize,
        #[source]
        source: ConversionError,
    },
    #[error("event {index}: partition key must be 1 to 256 characters, got {chars}")]
    InvalidPartitionKey { index: usize, chars: usize },
    #[error("publish call failed: {0}")]
    Transport(#[source] TransportError),
    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },
    #[error("{abandoned} records abandoned at the per-record retry ceiling ({delivered} delivered)")]
    RecordsAbandoned { abandoned: usize, delivered: usize },
    #[error("publish did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl PublishError {
    /// Whether the error was raised before any publish call was made.
    #[must_use]
    pub fn nothing_sent(&self) -> bool {
        matches!(self, Self::Conversion { .. } | Self::InvalidPartitionKey { .. })
    }
}

/// How one batch was resolved by a flush policy
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Settled {
    pub delivered: usize,
    /// Non-retryable per-record failures
    pub failed: usize,
    /// Retryable failures that hit their per-record ceiling
    pub abandoned: usize,
    /// Records to re-admit, in original relative order
    pub retries: Vec<Record>,
}

/// Call-scoped retry bookkeeping. Dropped when the call completes.
#[derive(Debug, Default)]
pub struct RetryState {
    record_attempts: HashMap<(Fingerprint, u32), u32>,
    publish_calls: u64,
}

impl RetryState {
    /// Count a retryable failure for this record and return its total so far.
    pub fn note_record_failure(&mut self, record: &Record) -> u32 {
        let attempts = self.record_attempts.entry(record.identity()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    #[must_use]
    pub fn record_failures(&self, record: &Record) -> u32 {
        self.record_attempts.get(&record.identity()).copied().unwrap_or(0)
    }

    pub fn note_publish_call(&mut self) {
        self.publish_calls += 1;
    }

    #[must_use]
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls
    }
}

/// What happened to the records of a completed submission.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub submitted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Unmeasurable or oversize, never sent
    pub dropped: usize,
    pub abandoned: usize,
    pub batches: usize,
    pub publish_calls: u64,
}

impl PublishSummary {
    pub(crate) fn absorb(&mut self, settled: &Settled) {
        self.delivered += settled.delivered;
        self.failed += settled.failed;
        self.abandoned += settled.abandoned;
        self.batches += 1;
    }
}

impl std::fmt::Display for PublishSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "submitted={} delivered={} failed={} dropped={} abandoned={} batches={} calls={}",
            self.submitted,
            self.delivered,
            self.failed,
            self.dropped,
            self.abandoned,
            self.batches,
            self.publish_calls
        )
    }
}
