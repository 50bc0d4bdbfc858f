//! In-memory per-shard job queue.
//!
//! # Delivery semantics
//! - FIFO per shard; no ordering across shards.
//! - At-least-once: [`InMemoryJobQueue::redeliver`] re-queues an envelope that
//!   was already handed out, the same way a real broker redelivers after a lost ack.
//! - Not durable: pending jobs are lost with the process.
use super::{JobEnvelope, JobId, JobQueue, QueueError};
use async_trait::async_trait;
use concord_common::ShardId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub job: JobEnvelope,
    pub error: String,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    closed: bool,
    lanes: BTreeMap<ShardId, VecDeque<JobEnvelope>>,
    dead_letters: Vec<DeadLetter>,
    enqueued_total: u64,
}

pub struct InMemoryJobQueue {
    /// When set, enqueueing to any other shard fails with `UnknownShard`.
    known_shards: Option<BTreeSet<ShardId>>,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryJobQueue {
    /// Queue that accepts jobs for any shard.
    pub fn new() -> Self {
        Self {
            known_shards: None,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Queue restricted to a fixed farm of shards.
    pub fn with_shards(shards: impl IntoIterator<Item = ShardId>) -> Self {
        Self {
            known_shards: Some(shards.into_iter().collect()),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub async fn pop(&self, shard: &ShardId) -> Option<JobEnvelope> {
        self.state
            .lock()
            .await
            .lanes
            .get_mut(shard)
            .and_then(|lane| lane.pop_front())
    }

    /// Pop from the first non-empty lane in shard order.
    pub async fn pop_any(&self) -> Option<JobEnvelope> {
        let mut state = self.state.lock().await;
        state
            .lanes
            .values_mut()
            .find(|lane| !lane.is_empty())
            .and_then(|lane| lane.pop_front())
    }

    /// Deliver an already handed-out job again.
    pub async fn redeliver(&self, job: &JobEnvelope) {
        let mut again = job.clone();
        again.delivery += 1;
        let mut state = self.state.lock().await;
        state
            .lanes
            .entry(again.shard.clone())
            .or_default()
            .push_back(again);
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn record_failure(&self, job: JobEnvelope, error: String) {
        metrics::counter!("concord_dead_letters_total", "kind" => job.kind.clone()).increment(1);
        self.state
            .lock()
            .await
            .dead_letters
            .push(DeadLetter { job, error });
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    pub async fn pending(&self, shard: &ShardId) -> Vec<JobEnvelope> {
        self.state
            .lock()
            .await
            .lanes
            .get(shard)
            .map(|lane| lane.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn total_pending(&self) -> usize {
        self.state.lock().await.lanes.values().map(VecDeque::len).sum()
    }

    /// Count of `enqueue` calls accepted so far (redeliveries excluded).
    pub async fn enqueued_total(&self) -> u64 {
        self.state.lock().await.enqueued_total
    }

    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.notify
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        kind: &str,
        shard: &ShardId,
        payload: serde_json::Value,
    ) -> Result<JobId, QueueError> {
        if let Some(known) = &self.known_shards {
            if !known.contains(shard) {
                return Err(QueueError::UnknownShard(shard.clone()));
            }
        }
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        let id = JobId(state.next_id);
        state.next_id += 1;
        state.enqueued_total += 1;
        state
            .lanes
            .entry(shard.clone())
            .or_default()
            .push_back(JobEnvelope {
                id,
                kind: kind.to_string(),
                shard: shard.clone(),
                payload,
                delivery: 1,
            });
        drop(state);
        tracing::debug!(job_id = %id, kind, shard = %shard, "job enqueued");
        metrics::counter!("concord_jobs_enqueued_total", "kind" => kind.to_string()).increment(1);
        self.notify.notify_waiters();
        Ok(id)
    }
}
