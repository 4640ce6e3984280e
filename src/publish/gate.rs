//! The remote publish boundary.
//!
//! [`StreamClient`] is the opaque remote operation: put an ordered list of
//! records on a stream, get back one outcome per record or a single transport
//! error. [`PublishGate`] calls it exactly once per batch and normalizes the
//! result into a [`BatchOutcome`]. It never retries or classifies.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::batching::accumulator::FlushBatch;
use crate::metrics;
use crate::record::Record;

/// Status class of a whole-request failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 4xx: malformed request, auth, unknown stream. Never succeeds on resend.
    Client,
    /// 5xx
    Server,
    /// The call did not complete (connect/reset/timeout)
    Connectivity,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Connectivity => write!(f, "connectivity"),
        }
    }
}

/// A failure of the publish call as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub class: ErrorClass,
    pub status_code: Option<u16>,
    pub message: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} error (status {}): {}", self.class, code, self.message),
            None => write!(f, "{} error: {}", self.class, self.message),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Classify by HTTP-style status: 4xx is client-class, anything else server-class.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let class = if status_code / 100 == 4 {
            ErrorClass::Client
        } else {
            ErrorClass::Server
        };
        Self {
            class,
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Connectivity,
            status_code: None,
            message: message.into(),
        }
    }

    /// Whether resending the same request can possibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class, ErrorClass::Client)
    }
}

/// Outcome for one record, positionally matched to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerRecordResult {
    Success {
        shard_id: String,
        sequence_number: String,
    },
    Failure {
        error_code: String,
        message: Option<String>,
    },
}

impl PerRecordResult {
    pub fn success(shard_id: impl Into<String>, sequence_number: impl Into<String>) -> Self {
        Self::Success {
            shard_id: shard_id.into(),
            sequence_number: sequence_number.into(),
        }
    }

    pub fn failure(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            error_code: error_code.into(),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error_code, .. } => Some(error_code),
        }
    }
}

/// Normalized result of one publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Call completed; one result per record, in request order
    Completed(Vec<PerRecordResult>),
    /// Call failed as a whole; no per-record information exists
    Failed(TransportError),
}

/// The remote "publish batch" operation.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn put_records(
        &self,
        stream_id: &str,
        records: &[Record],
    ) -> Result<Vec<PerRecordResult>, TransportError>;
}

#[async_trait]
impl<C: StreamClient + ?Sized> StreamClient for std::sync::Arc<C> {
    async fn put_records(
        &self,
        stream_id: &str,
        records: &[Record],
    ) -> Result<Vec<PerRecordResult>, TransportError> {
        (**self).put_records(stream_id, records).await
    }
}

/// Single-shot adapter over a [`StreamClient`].
pub struct PublishGate<C> {
    client: C,
}

impl<C: StreamClient> PublishGate<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Publish the batch once.
    pub async fn send(&self, stream_id: &str, batch: &FlushBatch) -> BatchOutcome {
        metrics::record_batch_size(batch.len());
        metrics::record_batch_bytes(batch.total_bytes);

        let start = Instant::now();
        let result = self.client.put_records(stream_id, &batch.records).await;
        metrics::record_publish_latency(start.elapsed());

        let outcome = match result {
            Ok(results) if results.len() == batch.len() => BatchOutcome::Completed(results),
            Ok(results) => BatchOutcome::Failed(TransportError {
                class: ErrorClass::Server,
                status_code: None,
                message: format!(
                    "response length mismatch: sent {} records, got {} results",
                    batch.len(),
                    results.len()
                ),
            }),
            Err(err) => BatchOutcome::Failed(err),
        };

        let status = match &outcome {
            BatchOutcome::Completed(_) => "completed",
            BatchOutcome::Failed(e) if e.is_retryable() => "retryable_error",
            BatchOutcome::Failed(_) => "fatal_error",
        };
        metrics::record_publish_call(status);
        debug!(
            stream_id,
            sequence = batch.sequence,
            count = batch.len(),
            bytes = batch.total_bytes,
            status,
            "Publish call finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::accumulator::FlushReason;
    use crate::publish::memory::ScriptedStream;

    fn batch(keys: &[&str]) -> FlushBatch {
        let records: Vec<_> = keys.iter().map(|k| Record::new(*k, b"payload".to_vec())).collect();
        let total_bytes = records.iter().filter_map(Record::size_bytes).sum();
        FlushBatch {
            records,
            total_bytes,
            sequence: 1,
            reason: FlushReason::Drain,
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(TransportError::from_status(400, "bad").class, ErrorClass::Client);
        assert_eq!(TransportError::from_status(404, "no stream").class, ErrorClass::Client);
        assert_eq!(TransportError::from_status(500, "boom").class, ErrorClass::Server);
        assert_eq!(TransportError::from_status(503, "busy").class, ErrorClass::Server);
        assert!(!TransportError::from_status(403, "denied").is_retryable());
        assert!(TransportError::from_status(502, "gateway").is_retryable());
        assert!(TransportError::connectivity("reset").is_retryable());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::from_status(500, "You Better Retry this server failure");
        assert_eq!(err.to_string(), "server error (status 500): You Better Retry this server failure");
        assert_eq!(TransportError::connectivity("reset").to_string(), "connectivity error: reset");
    }

    #[tokio::test]
    async fn test_completed_outcome_preserves_order() {
        let stream = ScriptedStream::new();
        let gate = PublishGate::new(stream);

        let outcome = gate.send("events", &batch(&["a", "b"])).await;
        let BatchOutcome::Completed(results) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(gate.client().call_count(), 1);

        let sent: Vec<_> = gate.client().calls()[0].iter().map(|r| r.partition_key.clone()).collect();
        assert_eq!(sent, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_transport_failure_maps_to_failed() {
        let stream = ScriptedStream::new();
        stream.push_error(TransportError::from_status(500, "boom"));
        let gate = PublishGate::new(stream);

        let outcome = gate.send("events", &batch(&["a"])).await;
        assert_eq!(outcome, BatchOutcome::Failed(TransportError::from_status(500, "boom")));
        assert_eq!(gate.client().call_count(), 1);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_server_failure() {
        let stream = ScriptedStream::new();
        stream.push_results(vec![PerRecordResult::success("shard-0", "1")]);
        let gate = PublishGate::new(stream);

        let outcome = gate.send("events", &batch(&["a", "b"])).await;
        let BatchOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(err.class, ErrorClass::Server);
        assert!(err.message.contains("length mismatch"));
    }
}
