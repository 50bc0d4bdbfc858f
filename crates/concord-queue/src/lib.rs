//! Per-shard asynchronous job queue boundary.
//!
//! # Purpose
//! Every shard owns one queue and one worker. Producers only ever call
//! [`JobQueue::enqueue`] with a job kind, the target shard and a JSON payload;
//! delivery is at-least-once, so handlers must tolerate seeing the same
//! envelope twice.
//!
//! # Notes
//! [`memory::InMemoryJobQueue`] is the in-process implementation used by the
//! federation service and its tests. Failed jobs are never retried by the queue;
//! they land in a dead-letter list that operators inspect.
use async_trait::async_trait;
use concord_common::ShardId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod worker;

pub use memory::{DeadLetter, InMemoryJobQueue};
pub use worker::{DrainReport, ShardWorker, drain};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// One delivery of a job to a shard worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: JobId,
    pub kind: String,
    pub shard: ShardId,
    pub payload: serde_json::Value,
    /// 1 for the first delivery; redeliveries of the same job increment it.
    pub delivery: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue for shard {0}")]
    UnknownShard(ShardId),
    #[error("job queue closed")]
    Closed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: &str,
        shard: &ShardId,
        payload: serde_json::Value,
    ) -> Result<JobId, QueueError>;
}

/// Executes delivered jobs. Returning an error sends the job to the dead-letter list.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobEnvelope) -> anyhow::Result<()>;
}
