//! Routes queued envelopes to the job that handles their kind.
use super::merge::LocalMergeMutation;
use super::page_move::{PageMigrationFanout, PageMoveJob};
use super::rename::LocalRenameMutation;
use super::runner::{JobOutcome, ShardJobRunner};
use super::{JobError, JobKind, PageMoveParams, ShardJobParams};
use crate::registry::IdentityRegistry;
use crate::shard::ShardDirectory;
use crate::store::FederationStore;
use async_trait::async_trait;
use concord_queue::{JobEnvelope, JobHandler, JobQueue};
use std::sync::Arc;
use tracing::debug;

pub struct FederationJobHandler {
    runner: ShardJobRunner,
    rename: LocalRenameMutation,
    merge: LocalMergeMutation,
    page_moves: PageMoveJob,
}

impl FederationJobHandler {
    pub fn new(
        store: Arc<dyn FederationStore>,
        registry: Arc<dyn IdentityRegistry>,
        queue: Arc<dyn JobQueue>,
        shards: Arc<dyn ShardDirectory>,
    ) -> Self {
        let fanout = PageMigrationFanout::new(queue.clone());
        Self {
            runner: ShardJobRunner::new(store, registry.clone(), queue, shards.clone()),
            rename: LocalRenameMutation::new(registry, fanout),
            merge: LocalMergeMutation,
            page_moves: PageMoveJob::new(shards),
        }
    }

    pub async fn dispatch(&self, job: &JobEnvelope) -> Result<Option<JobOutcome>, JobError> {
        let kind =
            JobKind::parse(&job.kind).ok_or_else(|| JobError::UnknownKind(job.kind.clone()))?;
        debug!(kind = kind.as_str(), shard = %job.shard, delivery = job.delivery, "dispatching job");
        match kind {
            JobKind::LocalRename => {
                let params: ShardJobParams = serde_json::from_value(job.payload.clone())?;
                self.runner
                    .run(&self.rename, &job.shard, &params)
                    .await
                    .map(Some)
            }
            JobKind::LocalMerge => {
                let params: ShardJobParams = serde_json::from_value(job.payload.clone())?;
                self.runner
                    .run(&self.merge, &job.shard, &params)
                    .await
                    .map(Some)
            }
            JobKind::PageMove => {
                let params: PageMoveParams = serde_json::from_value(job.payload.clone())?;
                self.page_moves.run(&job.shard, &params).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobHandler for FederationJobHandler {
    async fn handle(&self, job: &JobEnvelope) -> anyhow::Result<()> {
        self.dispatch(job).await?;
        Ok(())
    }
}
