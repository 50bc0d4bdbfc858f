//! Entry point for global renames and merges.
//!
//! # Purpose
//! Turns a validated request into claimed status rows, an updated registry and
//! the first job of each chain. It returns as soon as the claim succeeded and
//! the jobs are queued; the shards are changed asynchronously by the chain.
//!
//! # Key invariants
//! - Nothing is written before the claim, and nothing after a partial claim.
//! - Exactly one job is enqueued per chain; the chain finds its own way onward.
//! - Every started operation leaves an audit entry carrying what an operator
//!   needs to resume it.
use crate::jobs::{JobKind, ShardJobParams};
use crate::model::{
    AuditAction, MergeRequest, NewAuditEntry, OperationParams, RenameOptions, RenameRequest,
    RenameStatus,
};
use crate::registry::{IdentityRegistry, RegistryError};
use crate::store::{FederationStore, StoreError};
use crate::validator::{ValidationError, Validator};
use concord_common::{AccountName, ShardId};
use concord_queue::{JobId, JobQueue, QueueError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RenameError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("another rename or merge to {0} is already in progress")]
    AlreadyInProgress(AccountName),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("encode job parameters: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a started rename looks like to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameTicket {
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub shards: Vec<ShardId>,
    pub first_job: Option<JobId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeTicket {
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub merge_shards: Vec<ShardId>,
    pub rename_shards: Vec<ShardId>,
    pub jobs: Vec<JobId>,
}

/// Split the old identity's shards for a merge.
///
/// Returns `(merge_shards, rename_shards)`: shards attached to both identities
/// get a local merge, shards attached only to the old identity get a local rename.
pub fn merge_partition(
    old_attached: &BTreeSet<ShardId>,
    new_attached: &BTreeSet<ShardId>,
) -> (Vec<ShardId>, Vec<ShardId>) {
    old_attached
        .iter()
        .cloned()
        .partition(|shard| new_attached.contains(shard))
}

#[derive(Clone)]
pub struct RenameOrchestrator {
    store: Arc<dyn FederationStore>,
    registry: Arc<dyn IdentityRegistry>,
    queue: Arc<dyn JobQueue>,
    validator: Validator,
}

impl RenameOrchestrator {
    pub fn new(
        store: Arc<dyn FederationStore>,
        registry: Arc<dyn IdentityRegistry>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let validator = Validator::new(registry.clone());
        Self {
            store,
            registry,
            queue,
            validator,
        }
    }

    pub async fn rename(&self, request: RenameRequest) -> Result<RenameTicket, RenameError> {
        let RenameRequest {
            old_name,
            new_name,
            performer,
            options,
        } = request;
        self.validator.validate(&old_name, &new_name).await?;

        let shards: Vec<ShardId> = self
            .registry
            .attached_shards(&old_name)
            .await?
            .into_iter()
            .collect();
        self.claim(&old_name, &new_name, &shards).await?;

        if let Err(err) = self.registry.rewrite_name(&old_name, &new_name).await {
            self.abandon_claim(&old_name, &new_name, &performer, &shards, &err)
                .await;
            return Err(err.into());
        }
        self.registry.invalidate_cache(&old_name).await;
        self.registry.invalidate_cache(&new_name).await;

        let params = ShardJobParams {
            from: old_name.clone(),
            to: new_name.clone(),
            renamer: performer.clone(),
            reason: options.reason.clone(),
            options: options.clone(),
            chain: shards.clone(),
        };
        let enqueued = self.start_chain(JobKind::LocalRename, &params).await;

        let audit = OperationParams {
            options,
            rename_shards: shards.clone(),
            merge_shards: Vec::new(),
        };
        self.audit(AuditAction::Rename, &performer, &params, &audit)
            .await?;

        let first_job = enqueued?;
        info!(old = %old_name, new = %new_name, shards = shards.len(), "global rename started");
        Ok(RenameTicket {
            old_name,
            new_name,
            shards,
            first_job,
        })
    }

    pub async fn merge(&self, request: MergeRequest) -> Result<MergeTicket, RenameError> {
        let MergeRequest {
            old_name,
            new_name,
            performer,
            options,
        } = request;
        self.validator.validate_merge(&old_name, &new_name).await?;

        let old_attached = self.registry.attached_shards(&old_name).await?;
        let new_attached = self.registry.attached_shards(&new_name).await?;
        let (merge_shards, rename_shards) = merge_partition(&old_attached, &new_attached);
        let claimed: Vec<ShardId> = old_attached.into_iter().collect();
        self.claim(&old_name, &new_name, &claimed).await?;

        if let Err(err) = self
            .registry
            .fold_into(&old_name, &new_name, &merge_shards, &rename_shards, "merge")
            .await
        {
            self.abandon_claim(&old_name, &new_name, &performer, &claimed, &err)
                .await;
            return Err(err.into());
        }
        self.registry.invalidate_cache(&old_name).await;
        self.registry.invalidate_cache(&new_name).await;

        let base = ShardJobParams {
            from: old_name.clone(),
            to: new_name.clone(),
            renamer: performer.clone(),
            reason: options.reason.clone(),
            options: options.clone(),
            chain: Vec::new(),
        };
        let merge_params = ShardJobParams {
            chain: merge_shards.clone(),
            ..base.clone()
        };
        let rename_params = ShardJobParams {
            chain: rename_shards.clone(),
            ..base
        };
        let merge_job = self.start_chain(JobKind::LocalMerge, &merge_params).await;
        let rename_job = self.start_chain(JobKind::LocalRename, &rename_params).await;

        let audit = OperationParams {
            options,
            rename_shards: rename_shards.clone(),
            merge_shards: merge_shards.clone(),
        };
        self.audit(AuditAction::Merge, &performer, &merge_params, &audit)
            .await?;

        let jobs = [merge_job?, rename_job?].into_iter().flatten().collect();
        info!(
            old = %old_name,
            new = %new_name,
            merge_shards = merge_shards.len(),
            rename_shards = rename_shards.len(),
            "global merge started"
        );
        Ok(MergeTicket {
            old_name,
            new_name,
            merge_shards,
            rename_shards,
            jobs,
        })
    }

    async fn claim(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
        shards: &[ShardId],
    ) -> Result<(), RenameError> {
        let inserted = self.store.claim(old_name, new_name, shards).await?;
        if inserted < shards.len() {
            metrics::counter!("concord_claims_total", "outcome" => "contended").increment(1);
            warn!(old = %old_name, new = %new_name, inserted, requested = shards.len(), "claim lost");
            return Err(RenameError::AlreadyInProgress(new_name.clone()));
        }
        metrics::counter!("concord_claims_total", "outcome" => "claimed").increment(1);
        info!(old = %old_name, new = %new_name, shards = shards.len(), "status rows claimed");
        Ok(())
    }

    // Rows claimed for an operation that never started must not stay pending,
    // and the abandon entry keeps them from ever being resumed.
    async fn abandon_claim(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
        performer: &AccountName,
        shards: &[ShardId],
        cause: &RegistryError,
    ) {
        for shard in shards {
            if let Err(err) = self
                .store
                .update_status(new_name, shard, RenameStatus::Failed)
                .await
            {
                error!(new = %new_name, %shard, error = %err, "could not release claimed row");
            }
        }
        metrics::counter!("concord_claims_total", "outcome" => "abandoned").increment(1);
        let entry = NewAuditEntry {
            action: AuditAction::Abandon,
            performer: performer.clone(),
            old_name: old_name.clone(),
            new_name: new_name.clone(),
            reason: cause.to_string(),
            params: serde_json::json!({ "shards": shards }),
        };
        if let Err(err) = self.store.append_audit(entry).await {
            error!(old = %old_name, new = %new_name, error = %err, "could not record abandoned claim");
        }
        warn!(old = %old_name, new = %new_name, error = %cause, "claim abandoned");
    }

    async fn start_chain(
        &self,
        kind: JobKind,
        params: &ShardJobParams,
    ) -> Result<Option<JobId>, RenameError> {
        let Some(first) = params.chain.first() else {
            return Ok(None);
        };
        let payload = serde_json::to_value(params)?;
        let job = self.queue.enqueue(kind.as_str(), first, payload).await?;
        info!(kind = kind.as_str(), shard = %first, %job, "chain started");
        Ok(Some(job))
    }

    async fn audit(
        &self,
        action: AuditAction,
        performer: &AccountName,
        params: &ShardJobParams,
        operation: &OperationParams,
    ) -> Result<(), RenameError> {
        self.store
            .append_audit(NewAuditEntry {
                action,
                performer: performer.clone(),
                old_name: params.from.clone(),
                new_name: params.to.clone(),
                reason: params.reason.clone(),
                params: serde_json::to_value(operation)?,
            })
            .await?;
        Ok(())
    }
}

/// Options used when an approved self-service request becomes a rename.
pub fn approved_request_options(reason: &str) -> RenameOptions {
    RenameOptions {
        move_local_pages: true,
        reason: reason.to_string(),
        ..RenameOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalIdentity, ReadConsistency};
    use crate::recovery::{RecoveryError, RecoveryService};
    use crate::registry::{InMemoryRegistry, RegistryResult};
    use crate::store::memory::InMemoryStore;
    use crate::store::{AuditStore, RenameStatusStore};
    use async_trait::async_trait;
    use concord_queue::InMemoryJobQueue;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn shards(ids: &[&str]) -> BTreeSet<ShardId> {
        ids.iter().map(|id| ShardId::new(*id).expect("shard")).collect()
    }

    fn name(value: &str) -> AccountName {
        AccountName::parse(value).expect("name")
    }

    /// Registry whose claim-time mutations can be made to fail.
    struct FlakyRegistry {
        inner: InMemoryRegistry,
        fail_rewrite: AtomicBool,
        fail_fold: AtomicBool,
    }

    fn refused() -> RegistryError {
        RegistryError::Conflict("registry unavailable".to_string())
    }

    #[async_trait]
    impl IdentityRegistry for FlakyRegistry {
        async fn identity(&self, name: &AccountName) -> RegistryResult<Option<GlobalIdentity>> {
            self.inner.identity(name).await
        }

        async fn attached_shards(&self, name: &AccountName) -> RegistryResult<BTreeSet<ShardId>> {
            self.inner.attached_shards(name).await
        }

        async fn unattached_shards(
            &self,
            name: &AccountName,
        ) -> RegistryResult<BTreeSet<ShardId>> {
            self.inner.unattached_shards(name).await
        }

        async fn attach(
            &self,
            name: &AccountName,
            shard: &ShardId,
            method: &str,
        ) -> RegistryResult<()> {
            self.inner.attach(name, shard, method).await
        }

        async fn detach(&self, name: &AccountName, shard: &ShardId) -> RegistryResult<()> {
            self.inner.detach(name, shard).await
        }

        async fn rewrite_name(&self, old: &AccountName, new: &AccountName) -> RegistryResult<()> {
            if self.fail_rewrite.load(Ordering::SeqCst) {
                return Err(refused());
            }
            self.inner.rewrite_name(old, new).await
        }

        async fn retire(&self, name: &AccountName) -> RegistryResult<()> {
            self.inner.retire(name).await
        }

        async fn fold_into(
            &self,
            old: &AccountName,
            new: &AccountName,
            merge_shards: &[ShardId],
            rename_shards: &[ShardId],
            method: &str,
        ) -> RegistryResult<()> {
            if self.fail_fold.load(Ordering::SeqCst) {
                return Err(refused());
            }
            self.inner
                .fold_into(old, new, merge_shards, rename_shards, method)
                .await
        }

        async fn invalidate_cache(&self, name: &AccountName) {
            self.inner.invalidate_cache(name).await
        }

        async fn rename_in_progress(&self, name: &AccountName) -> RegistryResult<bool> {
            self.inner.rename_in_progress(name).await
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        registry: Arc<FlakyRegistry>,
        queue: Arc<InMemoryJobQueue>,
        orchestrator: RenameOrchestrator,
        recovery: RecoveryService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(FlakyRegistry {
            inner: InMemoryRegistry::new(store.clone()),
            fail_rewrite: AtomicBool::new(false),
            fail_fold: AtomicBool::new(false),
        });
        let queue = Arc::new(InMemoryJobQueue::with_shards(shards(&[
            "wikia", "wikib", "wikic",
        ])));
        let orchestrator = RenameOrchestrator::new(store.clone(), registry.clone(), queue.clone());
        let recovery = RecoveryService::new(store.clone(), queue.clone());
        Fixture {
            store,
            registry,
            queue,
            orchestrator,
            recovery,
        }
    }

    fn request(old: &str, new: &str) -> RenameRequest {
        RenameRequest {
            old_name: name(old),
            new_name: name(new),
            performer: name("Steward"),
            options: RenameOptions::default(),
        }
    }

    async fn latest(f: &Fixture, new: &str) -> Vec<RenameStatus> {
        f.store
            .statuses(&name(new), ReadConsistency::Latest)
            .await
            .expect("statuses")
            .into_values()
            .collect()
    }

    #[tokio::test]
    async fn failed_rewrite_releases_the_claim() {
        let f = fixture();
        f.registry
            .inner
            .create_identity(&name("Alice"), shards(&["wikia", "wikib"]))
            .await
            .expect("alice");
        f.registry.fail_rewrite.store(true, Ordering::SeqCst);

        let err = f
            .orchestrator
            .rename(request("Alice", "Bob"))
            .await
            .expect_err("rewrite refused");
        assert!(matches!(err, RenameError::Registry(_)));
        assert_eq!(latest(&f, "Bob").await, vec![RenameStatus::Failed; 2]);
        assert_eq!(f.queue.enqueued_total().await, 0);
        assert!(!f.registry.rename_in_progress(&name("Bob")).await.expect("idle"));

        let entries = f.store.audit_for(&name("Bob")).await.expect("audit");
        assert!(entries.iter().all(|entry| !entry.action.starts_chain()));
        assert_eq!(
            entries.iter().map(|entry| entry.action).collect::<Vec<_>>(),
            vec![AuditAction::Abandon]
        );
        let err = f
            .recovery
            .resume(&name("Bob"), None, &name("Steward"))
            .await
            .expect_err("abandoned");
        assert!(matches!(err, RecoveryError::Abandoned { .. }));
        assert_eq!(f.queue.enqueued_total().await, 0);

        f.registry.fail_rewrite.store(false, Ordering::SeqCst);
        let ticket = f
            .orchestrator
            .rename(request("Alice", "Bob"))
            .await
            .expect("name is free again");
        assert!(ticket.first_job.is_some());
        assert_eq!(latest(&f, "Bob").await, vec![RenameStatus::Queued; 2]);
    }

    #[tokio::test]
    async fn failed_fold_leaves_the_registry_and_frees_the_name() {
        let f = fixture();
        f.registry
            .inner
            .create_identity(&name("Alice"), shards(&["wikia", "wikib"]))
            .await
            .expect("alice");
        f.registry
            .inner
            .create_identity(&name("Bob"), shards(&["wikib", "wikic"]))
            .await
            .expect("bob");
        f.registry.fail_fold.store(true, Ordering::SeqCst);
        let merge = MergeRequest {
            old_name: name("Alice"),
            new_name: name("Bob"),
            performer: name("Steward"),
            options: RenameOptions::default(),
        };

        let err = f
            .orchestrator
            .merge(merge.clone())
            .await
            .expect_err("fold refused");
        assert!(matches!(err, RenameError::Registry(_)));
        assert_eq!(latest(&f, "Bob").await, vec![RenameStatus::Failed; 2]);
        assert_eq!(f.queue.enqueued_total().await, 0);
        assert_eq!(
            f.registry.attached_shards(&name("Alice")).await.expect("alice"),
            shards(&["wikia", "wikib"])
        );
        assert_eq!(
            f.registry.attached_shards(&name("Bob")).await.expect("bob"),
            shards(&["wikib", "wikic"])
        );

        f.registry.fail_fold.store(false, Ordering::SeqCst);
        let ticket = f.orchestrator.merge(merge).await.expect("merge");
        assert_eq!(ticket.jobs.len(), 2);
    }

    #[test]
    fn partition_splits_shared_and_old_only_shards() {
        let (merge, rename) =
            merge_partition(&shards(&["wikia", "wikib"]), &shards(&["wikib", "wikic"]));
        assert_eq!(merge, shards(&["wikib"]).into_iter().collect::<Vec<_>>());
        assert_eq!(rename, shards(&["wikia"]).into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn partition_of_disjoint_sets_is_all_rename() {
        let (merge, rename) = merge_partition(&shards(&["wikia"]), &shards(&["wikic"]));
        assert!(merge.is_empty());
        assert_eq!(rename.len(), 1);
    }

    #[test]
    fn approved_requests_move_pages() {
        let options = approved_request_options("typo");
        assert!(options.move_local_pages);
        assert!(!options.promote_to_global);
        assert_eq!(options.reason, "typo");
    }
}
