//! Shard workers and the synchronous drain loop.
//!
//! A [`ShardWorker`] owns exactly one shard lane and runs each job to
//! completion before taking the next. [`drain`] processes every lane on the
//! caller's task until the queue is empty, which is what tests and one-shot
//! maintenance runs use.
use super::memory::InMemoryJobQueue;
use super::{JobEnvelope, JobHandler};
use concord_common::ShardId;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub struct ShardWorker {
    shard: ShardId,
    queue: Arc<InMemoryJobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown: CancellationToken,
}

impl ShardWorker {
    pub fn new(
        shard: ShardId,
        queue: Arc<InMemoryJobQueue>,
        handler: Arc<dyn JobHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shard,
            queue,
            handler,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        tracing::info!(shard = %self.shard, "shard worker started");
        loop {
            // Register interest before popping so an enqueue between the two is not missed.
            let notified = self.queue.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.queue.pop(&self.shard).await {
                process(&self.queue, self.handler.as_ref(), job).await;
                continue;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        tracing::info!(shard = %self.shard, "shard worker stopped");
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
}

/// Run jobs from every lane until none remain.
pub async fn drain(queue: &InMemoryJobQueue, handler: &dyn JobHandler) -> DrainReport {
    let mut report = DrainReport::default();
    while let Some(job) = queue.pop_any().await {
        report.processed += 1;
        if !process(queue, handler, job).await {
            report.failed += 1;
        }
    }
    report
}

async fn process(queue: &InMemoryJobQueue, handler: &dyn JobHandler, job: JobEnvelope) -> bool {
    let span = tracing::info_span!(
        "job",
        job_id = %job.id,
        kind = %job.kind,
        shard = %job.shard,
        delivery = job.delivery
    );
    match handler.handle(&job).instrument(span.clone()).await {
        Ok(()) => true,
        Err(err) => {
            let error = format!("{err:#}");
            span.in_scope(|| tracing::error!(%error, "job failed; moved to dead letters"));
            queue.record_failure(job, error).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobQueue;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        seen: AtomicUsize,
        fail_kind: &'static str,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, job: &JobEnvelope) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if job.kind == self.fail_kind {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn shard(id: &str) -> ShardId {
        ShardId::new(id).expect("shard")
    }

    #[tokio::test]
    async fn drain_reports_failures_as_dead_letters() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue("ok", &shard("wikia"), json!({})).await.expect("enqueue");
        queue.enqueue("bad", &shard("wikib"), json!({})).await.expect("enqueue");
        let handler = Counting {
            seen: AtomicUsize::new(0),
            fail_kind: "bad",
        };

        let report = drain(&queue, &handler).await;
        assert_eq!(report, DrainReport { processed: 2, failed: 1 });
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.kind, "bad");
        assert!(dead[0].error.contains("boom"));
    }

    #[tokio::test]
    async fn worker_processes_jobs_enqueued_after_start_and_stops_on_cancel() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            fail_kind: "never",
        });
        let shutdown = CancellationToken::new();
        let task = ShardWorker::new(
            shard("wikia"),
            Arc::clone(&queue),
            handler.clone(),
            shutdown.clone(),
        )
        .spawn();

        queue.enqueue("ok", &shard("wikia"), json!({})).await.expect("enqueue");
        queue.enqueue("ok", &shard("wikia"), json!({})).await.expect("enqueue");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while handler.seen.load(Ordering::SeqCst) < 2 {
            assert!(tokio::time::Instant::now() < deadline, "worker never drained");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker stops")
            .expect("join");
        assert_eq!(queue.total_pending().await, 0);
    }
}
