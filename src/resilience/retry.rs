// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backoff policy for retry rounds.
//!
//! One policy covers both flavours of backoff: exponential growth from
//! `initial_delay` capped at `max_delay`, optionally with full jitter. Setting
//! `initial_delay == max_delay` with full jitter gives a flat uniform delay.
//!
//! # Example
//!
//! ```
//! use stream_publisher::{Jitter, RetryConfig};
//! use std::time::Duration;
//!
//! // Exponential, capped at 30 seconds
//! let bounded = RetryConfig::bounded();
//! assert_eq!(bounded.max_attempts, 5);
//! assert_eq!(bounded.max_delay, Duration::from_secs(30));
//!
//! // Flat: uniform in [0, 2s)
//! let uniform = RetryConfig::uniform();
//! assert_eq!(uniform.ceiling(7), Duration::from_secs(2));
//!
//! let fixed = RetryConfig { jitter: Jitter::None, ..RetryConfig::bounded() };
//! assert_eq!(fixed.delay_for(3), Duration::from_millis(400));
//! ```

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// How the computed delay is randomized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Uniform in `[0, delay)`
    #[default]
    Full,
    /// Use the delay as computed
    None,
}

/// Retry ceilings and backoff shape.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::bounded()`] - exponential backoff, 5 attempts
/// - [`RetryConfig::uniform()`] - flat random delay under 2 seconds, 5 attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: Jitter,
    /// Sends of one batch after whole-request failures, first send included
    pub max_attempts: u32,
    /// Times a single record may be re-queued before it is abandoned
    pub max_record_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::bounded()
    }
}

impl RetryConfig {
    /// Exponential backoff from 100ms, capped at 30 seconds.
    #[must_use]
    pub fn bounded() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: Jitter::Full,
            max_attempts: 5,
            max_record_attempts: 5,
        }
    }

    /// Flat random delay in `[0, 2000ms)` per round.
    #[must_use]
    pub fn uniform() -> Self {
        Self {
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(2000),
            factor: 1.0,
            jitter: Jitter::Full,
            max_attempts: 5,
            max_record_attempts: 5,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[must_use]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
            jitter: Jitter::None,
            max_attempts: 5,
            max_record_attempts: 5,
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_delay.as_nanos() as f64 * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(scaled.max(0.0).round() as u64)
    }

    /// Delay to sleep before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full if ceiling.is_zero() => ceiling,
            Jitter::Full => rand::thread_rng().gen_range(Duration::ZERO..ceiling),
        }
    }
}
