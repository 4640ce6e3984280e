// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Limit-respecting batch accumulation.
//!
//! The [`BatchAccumulator`] packs records into batches that never exceed the
//! provider's hard limits: a record count ceiling, a total byte ceiling, and a
//! per-record byte ceiling. When a record would push the batch over either
//! batch ceiling, the current batch is handed back for flushing and the record
//! starts the next one.
//!
//! # Example
//!
//! ```
//! use stream_publisher::{BatchAccumulator, BatchLimits, FlushReason, Record};
//!
//! let limits = BatchLimits::new(2, 1024, 512).unwrap();
//! let mut acc = BatchAccumulator::new(limits);
//!
//! assert!(acc.admit(Record::new("a", vec![0; 10])).unwrap().is_none());
//! assert!(acc.admit(Record::new("b", vec![0; 10])).unwrap().is_none());
//!
//! // Third record does not fit: the first two come back as a full batch
//! let full = acc.admit(Record::new("c", vec![0; 10])).unwrap().unwrap();
//! assert_eq!(full.len(), 2);
//! assert_eq!(full.reason, FlushReason::Count);
//! assert_eq!(acc.stats(), (1, 11));
//! ```

use thiserror::Error;
use tracing::debug;

use crate::record::Record;

/// Provider ceiling on records per request.
pub const MAX_RECORDS: usize = 500;
/// Provider ceiling on a single record (payload + partition key).
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
/// Provider ceiling on a whole request.
pub const MAX_BATCH_BYTES: usize = 5 * MAX_RECORD_BYTES;

/// Why a batch was handed off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Next record would exceed the record count ceiling
    Count,
    /// Next record would exceed the byte ceiling
    Size,
    /// End of submission, remainder flushed
    Drain,
}

/// Why a record was refused admission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    #[error("cannot determine record size (partition key '{partition_key}')")]
    Unmeasurable { partition_key: String },
    #[error("record of {size} bytes exceeds maximum record size of {max} bytes (partition key '{partition_key}')")]
    Oversize {
        partition_key: String,
        size: usize,
        max: usize,
    },
}

/// Invalid limit combination
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitsError {
    #[error("max_records must be at least 1")]
    ZeroRecords,
    #[error("max_record_bytes ({record}) must not exceed max_batch_bytes ({batch})")]
    RecordLargerThanBatch { record: usize, batch: usize },
}

/// Batch ceilings.
///
/// Construction guarantees that any record within `max_record_bytes` fits
/// into an empty batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    max_records: usize,
    max_batch_bytes: usize,
    max_record_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_records: MAX_RECORDS,
            max_batch_bytes: MAX_BATCH_BYTES,
            max_record_bytes: MAX_RECORD_BYTES,
        }
    }
}

impl BatchLimits {
    pub fn new(max_records: usize, max_batch_bytes: usize, max_record_bytes: usize) -> Result<Self, LimitsError> {
        if max_records == 0 {
            return Err(LimitsError::ZeroRecords);
        }
        if max_record_bytes > max_batch_bytes {
            return Err(LimitsError::RecordLargerThanBatch {
                record: max_record_bytes,
                batch: max_batch_bytes,
            });
        }
        Ok(Self {
            max_records,
            max_batch_bytes,
            max_record_bytes,
        })
    }

    #[must_use]
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    #[must_use]
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    #[must_use]
    pub fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }
}

/// A batch taken from the accumulator, ready to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushBatch {
    pub records: Vec<Record>,
    pub total_bytes: usize,
    /// Call-scoped batch sequence number, starting at 1
    pub sequence: u64,
    pub reason: FlushReason,
}

impl FlushBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The in-progress batch
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<Record>,
    total_bytes: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn push(&mut self, record: Record, size_bytes: usize) {
        self.records.push(record);
        self.total_bytes += size_bytes;
    }

    fn take(&mut self) -> (Vec<Record>, usize) {
        let total = std::mem::take(&mut self.total_bytes);
        (std::mem::take(&mut self.records), total)
    }
}

/// Packs records into limit-respecting batches.
///
/// Owned by a single submission; nothing else observes the in-progress batch.
#[derive(Debug)]
pub struct BatchAccumulator {
    limits: BatchLimits,
    batch: Batch,
    sequence: u64,
}

impl BatchAccumulator {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            batch: Batch::new(),
            sequence: 0,
        }
    }

    /// Admit a record.
    ///
    /// Returns the previous batch when this record did not fit into it. The
    /// record itself is then the first member of the new batch.
    pub fn admit(&mut self, record: Record) -> Result<Option<FlushBatch>, AdmitError> {
        let Some(size) = record.size_bytes() else {
            return Err(AdmitError::Unmeasurable {
                partition_key: record.partition_key,
            });
        };
        if size > self.limits.max_record_bytes {
            return Err(AdmitError::Oversize {
                partition_key: record.partition_key,
                size,
                max: self.limits.max_record_bytes,
            });
        }

        let reason = if self.batch.len() >= self.limits.max_records {
            Some(FlushReason::Count)
        } else if self.batch.total_bytes + size > self.limits.max_batch_bytes {
            Some(FlushReason::Size)
        } else {
            None
        };

        let flushed = reason.and_then(|r| self.take(r));
        self.batch.push(record, size);
        Ok(flushed)
    }

    /// Take whatever is pending, if anything.
    pub fn flush_if_non_empty(&mut self) -> Option<FlushBatch> {
        self.take(FlushReason::Drain)
    }

    fn take(&mut self, reason: FlushReason) -> Option<FlushBatch> {
        if self.batch.is_empty() {
            return None;
        }
        let (records, total_bytes) = self.batch.take();
        self.sequence += 1;
        debug!(
            sequence = self.sequence,
            count = records.len(),
            bytes = total_bytes,
            ?reason,
            "Batch taken for flush"
        );
        Some(FlushBatch {
            records,
            total_bytes,
            sequence: self.sequence,
            reason,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Pending (count, bytes)
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        (self.batch.len(), self.batch.total_bytes())
    }

    #[must_use]
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }
}
