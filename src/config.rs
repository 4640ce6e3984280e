//! Configuration for the publisher.
//!
//! # Example
//!
//! ```
//! use stream_publisher::PublisherConfig;
//!
//! // Provider limits and bounded retry by default
//! let config = PublisherConfig::default();
//! assert_eq!(config.max_records, 500);
//! assert_eq!(config.max_batch_bytes, 5 * 1024 * 1024);
//! assert_eq!(config.max_attempts, 5);
//!
//! // Override what you need
//! let config = PublisherConfig {
//!     max_attempts: 3,
//!     retry_max_delay_ms: 5_000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::batching::accumulator::{BatchLimits, LimitsError, MAX_BATCH_BYTES, MAX_RECORDS, MAX_RECORD_BYTES};
use crate::record::TextEncoding;
use crate::resilience::retry::{Jitter, RetryConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid batch limits: {0}")]
    Limits(#[from] LimitsError),
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("max_record_attempts must be at least 1")]
    ZeroRecordAttempts,
    #[error("retry_factor must be a finite number >= 1.0, got {0}")]
    BadFactor(f64),
    #[error("retry_initial_delay_ms ({initial}) exceeds retry_max_delay_ms ({max})")]
    DelayOrder { initial: u64, max: u64 },
}

/// Configuration for a [`crate::Publisher`].
///
/// All fields have defaults matching the provider's hard limits and a bounded
/// exponential retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Raise submission lifecycle logs from debug to info
    #[serde(default)]
    pub enable_debug_logs: bool,

    /// Encoding for text payloads when the caller does not pick one
    #[serde(default)]
    pub encoding: TextEncoding,

    /// Batch limits
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,

    /// Backoff shape
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,
    #[serde(default)]
    pub retry_jitter: Jitter,

    /// Sends per batch after whole-request failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Re-queues per record after per-record failures
    #[serde(default = "default_max_record_attempts")]
    pub max_record_attempts: u32,

    /// Per-record error codes worth retrying
    #[serde(default = "default_retryable_error_codes")]
    pub retryable_error_codes: Vec<String>,
}

fn default_max_records() -> usize { MAX_RECORDS }
fn default_max_batch_bytes() -> usize { MAX_BATCH_BYTES } // 5 MiB
fn default_max_record_bytes() -> usize { MAX_RECORD_BYTES } // 1 MiB
fn default_retry_initial_delay_ms() -> u64 { 100 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_retry_factor() -> f64 { 2.0 }
fn default_max_attempts() -> u32 { 5 }
fn default_max_record_attempts() -> u32 { 5 }
fn default_retryable_error_codes() -> Vec<String> {
    vec![
        "ProvisionedThroughputExceededException".into(),
        "InternalFailure".into(),
        "ServiceUnavailable".into(),
    ]
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enable_debug_logs: false,
            encoding: TextEncoding::default(),
            max_records: default_max_records(),
            max_batch_bytes: default_max_batch_bytes(),
            max_record_bytes: default_max_record_bytes(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_factor: default_retry_factor(),
            retry_jitter: Jitter::default(),
            max_attempts: default_max_attempts(),
            max_record_attempts: default_max_record_attempts(),
            retryable_error_codes: default_retryable_error_codes(),
        }
    }
}

impl PublisherConfig {
    /// Check every field combination the publisher relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.batch_limits()?;
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.max_record_attempts == 0 {
            return Err(ConfigError::ZeroRecordAttempts);
        }
        if !self.retry_factor.is_finite() || self.retry_factor < 1.0 {
            return Err(ConfigError::BadFactor(self.retry_factor));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::DelayOrder {
                initial: self.retry_initial_delay_ms,
                max: self.retry_max_delay_ms,
            });
        }
        Ok(())
    }

    pub fn batch_limits(&self) -> Result<BatchLimits, ConfigError> {
        Ok(BatchLimits::new(
            self.max_records,
            self.max_batch_bytes,
            self.max_record_bytes,
        )?)
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            factor: self.retry_factor,
            jitter: self.retry_jitter,
            max_attempts: self.max_attempts,
            max_record_attempts: self.max_record_attempts,
        }
    }

    #[must_use]
    pub fn retryable_codes(&self) -> HashSet<String> {
        self.retryable_error_codes.iter().cloned().collect()
    }
}
