//! In-memory [`StreamClient`] with scripted responses.
//!
//! Every call is recorded. Responses are taken from a script queue in order;
//! once the script is exhausted the fallback applies, which by default
//! accepts every record and assigns it to a shard by partition key hash.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::gate::{PerRecordResult, StreamClient, TransportError};
use crate::record::Record;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return these per-record results verbatim
    Results(Vec<PerRecordResult>),
    /// Fail the whole call
    Error(TransportError),
    /// Accept everything except the given positions, which get this error code
    RejectPositions { positions: Vec<usize>, error_code: String },
}

/// Behaviour once the script runs out
#[derive(Debug, Clone)]
pub enum Fallback {
    AcceptAll,
    Error(TransportError),
}

#[derive(Debug)]
struct State {
    script: VecDeque<Scripted>,
    fallback: Fallback,
    calls: Vec<(String, Vec<Record>)>,
    shards: Vec<Vec<Record>>,
}

/// Scriptable in-memory stream.
#[derive(Debug)]
pub struct ScriptedStream {
    state: Mutex<State>,
}

impl ScriptedStream {
    /// Single-shard stream accepting everything.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(1)
    }

    #[must_use]
    pub fn with_shards(shard_count: usize) -> Self {
        Self {
            state: Mutex::new(State {
                script: VecDeque::new(),
                fallback: Fallback::AcceptAll,
                calls: Vec::new(),
                shards: vec![Vec::new(); shard_count.max(1)],
            }),
        }
    }

    pub fn push(&self, response: Scripted) {
        self.state.lock().script.push_back(response);
    }

    pub fn push_results(&self, results: Vec<PerRecordResult>) {
        self.push(Scripted::Results(results));
    }

    pub fn push_error(&self, error: TransportError) {
        self.push(Scripted::Error(error));
    }

    pub fn reject_positions(&self, positions: Vec<usize>, error_code: &str) {
        self.push(Scripted::RejectPositions {
            positions,
            error_code: error_code.to_string(),
        });
    }

    pub fn set_fallback(&self, fallback: Fallback) {
        self.state.lock().fallback = fallback;
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Records sent by each call, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<Record>> {
        self.state.lock().calls.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Stream ids targeted by each call
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(s, _)| s.clone()).collect()
    }

    /// Every accepted record, shard by shard
    #[must_use]
    pub fn delivered(&self) -> Vec<Record> {
        self.state.lock().shards.iter().flatten().cloned().collect()
    }

    /// Accepted records of one shard, in append order
    #[must_use]
    pub fn shard(&self, index: usize) -> Vec<Record> {
        self.state.lock().shards.get(index).cloned().unwrap_or_default()
    }
}

impl Default for ScriptedStream {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn shard_for(&self, partition_key: &str) -> usize {
        let digest = Sha256::digest(partition_key.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % self.shards.len() as u64) as usize
    }

    fn append(&mut self, record: &Record) -> PerRecordResult {
        let shard = self.shard_for(&record.partition_key);
        self.shards[shard].push(record.clone());
        PerRecordResult::success(
            format!("shardId-{shard:012}"),
            self.shards[shard].len().to_string(),
        )
    }

    fn accept_except(&mut self, records: &[Record], positions: &[usize], error_code: &str) -> Vec<PerRecordResult> {
        records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                if positions.contains(&i) {
                    PerRecordResult::failure(error_code, format!("scripted rejection of record {i}"))
                } else {
                    self.append(record)
                }
            })
            .collect()
    }
}

#[async_trait]
impl StreamClient for ScriptedStream {
    async fn put_records(
        &self,
        stream_id: &str,
        records: &[Record],
    ) -> Result<Vec<PerRecordResult>, TransportError> {
        let mut state = self.state.lock();
        state.calls.push((stream_id.to_string(), records.to_vec()));

        match state.script.pop_front() {
            Some(Scripted::Results(results)) => {
                for (record, result) in records.iter().zip(&results) {
                    if matches!(result, PerRecordResult::Success { .. }) {
                        let shard = state.shard_for(&record.partition_key);
                        state.shards[shard].push(record.clone());
                    }
                }
                Ok(results)
            }
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::RejectPositions { positions, error_code }) => {
                Ok(state.accept_except(records, &positions, &error_code))
            }
            None => match state.fallback.clone() {
                Fallback::AcceptAll => Ok(state.accept_except(records, &[], "")),
                Fallback::Error(err) => Err(err),
            },
        }
    }
}
