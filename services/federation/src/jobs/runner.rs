//! The per-shard job state machine.
//!
//! # Purpose
//! Every chain job walks `queued -> inprogress -> done | failed` for its own
//! (new name, shard) row. The runner holds that walk in one place so rename and
//! merge jobs differ only in their local mutation.
//!
//! # Key invariants
//! - A job runs only when its own row is `queued` or `failed`; anything else is
//!   a duplicate delivery and is absorbed without side effects.
//! - `inprogress` is committed before the local mutation starts.
//! - A failed mutation forces the row to `failed` and stops the chain there.
//!   The next shard is only ever enqueued from the success path, after `done`
//!   has been committed.
use super::{JobError, JobKind, ShardJobParams};
use crate::model::{ReadConsistency, RenameStatus};
use crate::registry::IdentityRegistry;
use crate::shard::{ShardDatabase, ShardDirectory};
use crate::store::FederationStore;
use async_trait::async_trait;
use concord_common::ShardId;
use concord_queue::JobQueue;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of the local mutation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Done,
    Failed(String),
}

/// The part of a chain job that differs between renames and merges.
#[async_trait]
pub trait ShardMutation: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Apply the local change. Must leave the shard untouched when it fails.
    async fn perform_shard_mutation(
        &self,
        db: &dyn ShardDatabase,
        params: &ShardJobParams,
    ) -> MutationOutcome;

    /// Runs once `done` is committed. Errors are logged; they never undo the mutation.
    async fn after_commit(
        &self,
        _db: &dyn ShardDatabase,
        _params: &ShardJobParams,
    ) -> Result<(), JobError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The mutation committed; `next` is the shard the chain moved on to.
    Completed { next: Option<ShardId> },
    /// Nothing ran: the row was missing or already past `queued`/`failed`.
    Skipped { status: Option<RenameStatus> },
}

#[derive(Clone)]
pub struct ShardJobRunner {
    store: Arc<dyn FederationStore>,
    registry: Arc<dyn IdentityRegistry>,
    queue: Arc<dyn JobQueue>,
    shards: Arc<dyn ShardDirectory>,
}

impl ShardJobRunner {
    pub fn new(
        store: Arc<dyn FederationStore>,
        registry: Arc<dyn IdentityRegistry>,
        queue: Arc<dyn JobQueue>,
        shards: Arc<dyn ShardDirectory>,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            shards,
        }
    }

    pub async fn run(
        &self,
        mutation: &dyn ShardMutation,
        shard: &ShardId,
        params: &ShardJobParams,
    ) -> Result<JobOutcome, JobError> {
        let kind = mutation.kind();

        // Waits out the transaction that enqueued us, then reads fresh rows.
        let statuses = self
            .store
            .statuses(&params.to, ReadConsistency::Locking)
            .await?;
        match statuses.get(shard).copied() {
            None => {
                warn!(kind = kind.as_str(), %shard, to = %params.to, "no status row for job; skipping");
                record_job(kind, "skipped");
                return Ok(JobOutcome::Skipped { status: None });
            }
            Some(status @ (RenameStatus::InProgress | RenameStatus::Done)) => {
                info!(kind = kind.as_str(), %shard, %status, "duplicate delivery; skipping");
                record_job(kind, "skipped");
                return Ok(JobOutcome::Skipped {
                    status: Some(status),
                });
            }
            Some(RenameStatus::Queued | RenameStatus::Failed) => {}
        }

        self.store
            .update_status(&params.to, shard, RenameStatus::InProgress)
            .await?;
        info!(kind = kind.as_str(), %shard, from = %params.from, to = %params.to, "shard job started");

        let db = match self.shards.database(shard) {
            Ok(db) => db,
            Err(err) => return Err(self.fail(kind, shard, params, err.to_string()).await),
        };
        if let MutationOutcome::Failed(reason) =
            mutation.perform_shard_mutation(db.as_ref(), params).await
        {
            return Err(self.fail(kind, shard, params, reason).await);
        }

        self.store
            .update_status(&params.to, shard, RenameStatus::Done)
            .await?;
        self.registry.invalidate_cache(&params.to).await;
        record_job(kind, "done");
        info!(kind = kind.as_str(), %shard, to = %params.to, "shard job done");

        if let Err(err) = mutation.after_commit(db.as_ref(), params).await {
            warn!(kind = kind.as_str(), %shard, error = %err, "post-commit follow-up failed");
        }

        let next = self.continue_chain(kind, shard, params).await?;
        Ok(JobOutcome::Completed { next })
    }

    async fn fail(
        &self,
        kind: JobKind,
        shard: &ShardId,
        params: &ShardJobParams,
        reason: String,
    ) -> JobError {
        record_job(kind, "failed");
        error!(kind = kind.as_str(), %shard, to = %params.to, %reason, "local mutation failed; chain halted");
        if let Err(err) = self
            .store
            .update_status(&params.to, shard, RenameStatus::Failed)
            .await
        {
            return err.into();
        }
        JobError::MutationFailed {
            shard: shard.clone(),
            reason,
        }
    }

    async fn continue_chain(
        &self,
        kind: JobKind,
        shard: &ShardId,
        params: &ShardJobParams,
    ) -> Result<Option<ShardId>, JobError> {
        let statuses = self
            .store
            .statuses(&params.to, ReadConsistency::Latest)
            .await?;
        let next = params
            .chain
            .iter()
            .find(|candidate| {
                *candidate != shard && statuses.get(*candidate) == Some(&RenameStatus::Queued)
            })
            .cloned();
        let Some(next) = next else {
            info!(kind = kind.as_str(), to = %params.to, "chain complete");
            return Ok(None);
        };
        let payload = serde_json::to_value(params)?;
        let job = self.queue.enqueue(kind.as_str(), &next, payload).await?;
        metrics::counter!("concord_chain_hops_total", "kind" => kind.as_str()).increment(1);
        info!(kind = kind.as_str(), from_shard = %shard, next_shard = %next, %job, "chain continued");
        Ok(Some(next))
    }
}

fn record_job(kind: JobKind, outcome: &'static str) {
    metrics::counter!(
        "concord_shard_jobs_total",
        "kind" => kind.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RenameOptions;
    use crate::registry::InMemoryRegistry;
    use crate::shard::InMemoryFarm;
    use crate::store::RenameStatusStore;
    use crate::store::memory::InMemoryStore;
    use concord_common::AccountName;
    use concord_queue::InMemoryJobQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        outcome: MutationOutcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ShardMutation for Scripted {
        fn kind(&self) -> JobKind {
            JobKind::LocalRename
        }

        async fn perform_shard_mutation(
            &self,
            _db: &dyn ShardDatabase,
            _params: &ShardJobParams,
        ) -> MutationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn name(value: &str) -> AccountName {
        AccountName::parse(value).expect("name")
    }

    fn shard(value: &str) -> ShardId {
        ShardId::new(value).expect("shard")
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        queue: Arc<InMemoryJobQueue>,
        runner: ShardJobRunner,
        params: ShardJobParams,
    }

    async fn fixture() -> Fixture {
        let chain = vec![shard("wikia"), shard("wikib"), shard("wikic")];
        let store = Arc::new(InMemoryStore::new());
        store
            .claim(&name("Alice"), &name("Bob"), &chain)
            .await
            .expect("claim");
        let registry = Arc::new(InMemoryRegistry::new(store.clone()));
        let queue = Arc::new(InMemoryJobQueue::new());
        let farm = Arc::new(InMemoryFarm::new(chain.clone()));
        let runner = ShardJobRunner::new(store.clone(), registry, queue.clone(), farm);
        Fixture {
            store,
            queue,
            runner,
            params: ShardJobParams {
                from: name("Alice"),
                to: name("Bob"),
                renamer: name("Steward"),
                reason: String::new(),
                options: RenameOptions::default(),
                chain,
            },
        }
    }

    fn scripted(outcome: MutationOutcome) -> Scripted {
        Scripted {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn success_marks_done_and_enqueues_the_next_queued_shard() {
        let fx = fixture().await;
        let mutation = scripted(MutationOutcome::Done);
        let outcome = fx
            .runner
            .run(&mutation, &shard("wikia"), &fx.params)
            .await
            .expect("run");
        assert_eq!(
            outcome,
            JobOutcome::Completed {
                next: Some(shard("wikib"))
            }
        );
        let statuses = fx
            .store
            .statuses(&name("Bob"), ReadConsistency::Latest)
            .await
            .expect("statuses");
        assert_eq!(statuses.get(&shard("wikia")), Some(&RenameStatus::Done));
        assert_eq!(fx.queue.pending(&shard("wikib")).await.len(), 1);
    }

    #[tokio::test]
    async fn a_second_delivery_is_absorbed() {
        let fx = fixture().await;
        let mutation = scripted(MutationOutcome::Done);
        fx.runner
            .run(&mutation, &shard("wikia"), &fx.params)
            .await
            .expect("first");
        let again = fx
            .runner
            .run(&mutation, &shard("wikia"), &fx.params)
            .await
            .expect("second");
        assert_eq!(
            again,
            JobOutcome::Skipped {
                status: Some(RenameStatus::Done)
            }
        );
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.queue.enqueued_total().await, 1);
    }

    #[tokio::test]
    async fn failure_forces_failed_and_enqueues_nothing() {
        let fx = fixture().await;
        let mutation = scripted(MutationOutcome::Failed("disk full".to_string()));
        let err = fx
            .runner
            .run(&mutation, &shard("wikia"), &fx.params)
            .await
            .expect_err("fails");
        assert!(matches!(err, JobError::MutationFailed { .. }));
        let statuses = fx
            .store
            .statuses(&name("Bob"), ReadConsistency::Latest)
            .await
            .expect("statuses");
        assert_eq!(statuses.get(&shard("wikia")), Some(&RenameStatus::Failed));
        assert_eq!(statuses.get(&shard("wikib")), Some(&RenameStatus::Queued));
        assert_eq!(fx.queue.enqueued_total().await, 0);
    }

    #[tokio::test]
    async fn failed_rows_can_run_again() {
        let fx = fixture().await;
        fx.store
            .update_status(&name("Bob"), &shard("wikia"), RenameStatus::Failed)
            .await
            .expect("fail");
        let mutation = scripted(MutationOutcome::Done);
        let outcome = fx
            .runner
            .run(&mutation, &shard("wikia"), &fx.params)
            .await
            .expect("rerun");
        assert!(matches!(outcome, JobOutcome::Completed { .. }));
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_row_is_treated_as_a_duplicate() {
        let fx = fixture().await;
        let mut params = fx.params.clone();
        params.to = name("Zed");
        let mutation = scripted(MutationOutcome::Done);
        let outcome = fx
            .runner
            .run(&mutation, &shard("wikia"), &params)
            .await
            .expect("skip");
        assert_eq!(outcome, JobOutcome::Skipped { status: None });
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn last_shard_ends_the_chain() {
        let fx = fixture().await;
        for id in ["wikia", "wikib"] {
            fx.store
                .update_status(&name("Bob"), &shard(id), RenameStatus::Done)
                .await
                .expect("done");
        }
        let outcome = fx
            .runner
            .run(&scripted(MutationOutcome::Done), &shard("wikic"), &fx.params)
            .await
            .expect("run");
        assert_eq!(outcome, JobOutcome::Completed { next: None });
        assert_eq!(fx.queue.total_pending().await, 0);
    }
}
