//! Self-service rename requests awaiting human approval.
//!
//! # Purpose
//! A user asks for a new name; a steward approves or rejects the request.
//! Approval starts an ordinary global rename. Requests are decided exactly once
//! and are never deleted.
use crate::model::{
    AuditAction, NewAuditEntry, NewRenameRequest, PendingRenameRequest, RenameRequest,
    RequestDecision, RequestStatus,
};
use crate::orchestrator::{RenameError, RenameOrchestrator, RenameTicket, approved_request_options};
use crate::registry::{IdentityRegistry, RegistryError};
use crate::store::{FederationStore, StoreError};
use concord_common::{AccountName, ShardId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    InvalidName(#[from] concord_common::Error),
    #[error("{0} is already taken")]
    NameTaken(AccountName),
    #[error("rename request {0} was already decided")]
    AlreadyDecided(i64),
    #[error(transparent)]
    Rename(#[from] RenameError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct RenameRequestService {
    store: Arc<dyn FederationStore>,
    registry: Arc<dyn IdentityRegistry>,
    orchestrator: RenameOrchestrator,
}

impl RenameRequestService {
    pub fn new(
        store: Arc<dyn FederationStore>,
        registry: Arc<dyn IdentityRegistry>,
        orchestrator: RenameOrchestrator,
    ) -> Self {
        Self {
            store,
            registry,
            orchestrator,
        }
    }

    pub async fn submit(
        &self,
        requester: AccountName,
        requested_on: ShardId,
        new_name: &str,
        reason: String,
    ) -> Result<PendingRenameRequest, ApprovalError> {
        let new_name = AccountName::parse_creatable(new_name)?;
        if self.registry.identity(&new_name).await?.is_some()
            || self.registry.rename_in_progress(&new_name).await?
        {
            return Err(ApprovalError::NameTaken(new_name));
        }
        let request = self
            .store
            .create_request(NewRenameRequest {
                requester,
                requested_on,
                new_name,
                reason,
            })
            .await?;
        record(RequestStatus::Pending);
        info!(id = request.id, requester = %request.requester, new = %request.new_name, "rename request submitted");
        Ok(request)
    }

    pub async fn list(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<PendingRenameRequest>, ApprovalError> {
        Ok(self.store.list_requests(status).await?)
    }

    pub async fn get(&self, id: i64) -> Result<PendingRenameRequest, ApprovalError> {
        Ok(self.store.get_request(id).await?)
    }

    /// Start the rename, then mark the request approved.
    ///
    /// Once the rename has started it cannot be taken back, so a failed write of
    /// the decision is retried once before the error is reported.
    pub async fn approve(
        &self,
        id: i64,
        performer: AccountName,
        comment: String,
    ) -> Result<(PendingRenameRequest, RenameTicket), ApprovalError> {
        let request = self.pending(id).await?;
        let ticket = self
            .orchestrator
            .rename(RenameRequest {
                old_name: request.requester.clone(),
                new_name: request.new_name.clone(),
                performer: performer.clone(),
                options: approved_request_options(&request.reason),
            })
            .await?;
        let decision = RequestDecision {
            status: RequestStatus::Approved,
            performer,
            comment,
        };
        let decided = match self.mark(id, decision.clone()).await {
            Err(ApprovalError::Store(err)) => {
                warn!(id, error = %err, "approval not recorded, retrying");
                self.mark(id, decision.clone()).await
            }
            other => other,
        };
        let decided = decided.map_err(|err| {
            error!(
                id,
                old = %ticket.old_name,
                new = %ticket.new_name,
                error = %err,
                "rename started but its request is still pending"
            );
            err
        })?;
        self.audit_decision(&decided, decision).await?;
        Ok((decided, ticket))
    }

    pub async fn reject(
        &self,
        id: i64,
        performer: AccountName,
        comment: String,
    ) -> Result<PendingRenameRequest, ApprovalError> {
        self.pending(id).await?;
        let decision = RequestDecision {
            status: RequestStatus::Rejected,
            performer,
            comment,
        };
        let decided = self.mark(id, decision.clone()).await?;
        self.audit_decision(&decided, decision).await?;
        Ok(decided)
    }

    async fn pending(&self, id: i64) -> Result<PendingRenameRequest, ApprovalError> {
        let request = self.store.get_request(id).await?;
        if request.status != RequestStatus::Pending {
            return Err(ApprovalError::AlreadyDecided(id));
        }
        Ok(request)
    }

    async fn mark(
        &self,
        id: i64,
        decision: RequestDecision,
    ) -> Result<PendingRenameRequest, ApprovalError> {
        self.store
            .decide_request(id, decision)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => ApprovalError::AlreadyDecided(id),
                other => other.into(),
            })
    }

    async fn audit_decision(
        &self,
        decided: &PendingRenameRequest,
        decision: RequestDecision,
    ) -> Result<(), ApprovalError> {
        let action = match decision.status {
            RequestStatus::Approved => AuditAction::RequestApproved,
            _ => AuditAction::RequestRejected,
        };
        self.store
            .append_audit(NewAuditEntry {
                action,
                performer: decision.performer,
                old_name: decided.requester.clone(),
                new_name: decided.new_name.clone(),
                reason: decision.comment,
                params: serde_json::json!({ "request_id": decided.id }),
            })
            .await?;
        record(decision.status);
        info!(id = decided.id, status = decision.status.as_str(), "rename request decided");
        Ok(())
    }
}

fn record(status: RequestStatus) {
    metrics::counter!("concord_rename_requests_total", "status" => status.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AuditEntry, ReadConsistency, RenameProgress, RenameStatus, ShardRenameStatus,
    };
    use crate::registry::InMemoryRegistry;
    use crate::store::memory::InMemoryStore;
    use crate::store::{AuditStore, RenameRequestStore, RenameStatusStore, StoreResult};
    use async_trait::async_trait;
    use concord_queue::InMemoryJobQueue;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store whose next `failures` decision writes fail.
    struct FlakyDecisions {
        inner: InMemoryStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl RenameStatusStore for FlakyDecisions {
        async fn claim(
            &self,
            old_name: &AccountName,
            new_name: &AccountName,
            shards: &[ShardId],
        ) -> StoreResult<usize> {
            self.inner.claim(old_name, new_name, shards).await
        }

        async fn update_status(
            &self,
            new_name: &AccountName,
            shard: &ShardId,
            status: RenameStatus,
        ) -> StoreResult<()> {
            self.inner.update_status(new_name, shard, status).await
        }

        async fn statuses(
            &self,
            new_name: &AccountName,
            consistency: ReadConsistency,
        ) -> StoreResult<BTreeMap<ShardId, RenameStatus>> {
            self.inner.statuses(new_name, consistency).await
        }

        async fn names_in_progress(
            &self,
            name: &AccountName,
        ) -> StoreResult<Option<(AccountName, AccountName)>> {
            self.inner.names_in_progress(name).await
        }

        async fn in_progress_renames(&self) -> StoreResult<Vec<RenameProgress>> {
            self.inner.in_progress_renames().await
        }

        async fn history(&self, new_name: &AccountName) -> StoreResult<Vec<ShardRenameStatus>> {
            self.inner.history(new_name).await
        }
    }

    #[async_trait]
    impl RenameRequestStore for FlakyDecisions {
        async fn create_request(
            &self,
            request: NewRenameRequest,
        ) -> StoreResult<PendingRenameRequest> {
            self.inner.create_request(request).await
        }

        async fn get_request(&self, id: i64) -> StoreResult<PendingRenameRequest> {
            self.inner.get_request(id).await
        }

        async fn list_requests(
            &self,
            status: Option<RequestStatus>,
        ) -> StoreResult<Vec<PendingRenameRequest>> {
            self.inner.list_requests(status).await
        }

        async fn decide_request(
            &self,
            id: i64,
            decision: RequestDecision,
        ) -> StoreResult<PendingRenameRequest> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unexpected(anyhow::anyhow!("connection reset")));
            }
            self.inner.decide_request(id, decision).await
        }
    }

    #[async_trait]
    impl AuditStore for FlakyDecisions {
        async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
            self.inner.append_audit(entry).await
        }

        async fn audit_for(&self, name: &AccountName) -> StoreResult<Vec<AuditEntry>> {
            self.inner.audit_for(name).await
        }

        async fn latest_operation(
            &self,
            old_name: &AccountName,
            new_name: &AccountName,
        ) -> StoreResult<Option<AuditEntry>> {
            self.inner.latest_operation(old_name, new_name).await
        }
    }

    #[async_trait]
    impl FederationStore for FlakyDecisions {
        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }

        fn is_durable(&self) -> bool {
            false
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn name(value: &str) -> AccountName {
        AccountName::parse(value).expect("name")
    }

    fn shard(value: &str) -> ShardId {
        ShardId::new(value).expect("shard")
    }

    async fn service(failures: usize) -> (Arc<FlakyDecisions>, RenameRequestService, i64) {
        let store = Arc::new(FlakyDecisions {
            inner: InMemoryStore::new(),
            failures: AtomicUsize::new(failures),
        });
        let registry = Arc::new(InMemoryRegistry::new(store.clone()));
        registry
            .create_identity(&name("Alice"), [shard("wikia")])
            .await
            .expect("alice");
        let queue = Arc::new(InMemoryJobQueue::with_shards([shard("wikia")]));
        let orchestrator = RenameOrchestrator::new(store.clone(), registry.clone(), queue);
        let service = RenameRequestService::new(store.clone(), registry, orchestrator);
        let request = service
            .submit(name("Alice"), shard("wikia"), "Bob", "typo".to_string())
            .await
            .expect("submit");
        (store, service, request.id)
    }

    #[tokio::test]
    async fn approval_survives_one_failed_decision_write() {
        let (store, service, id) = service(1).await;
        let (decided, ticket) = service
            .approve(id, name("Steward"), String::new())
            .await
            .expect("approve");
        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(ticket.new_name, name("Bob"));
        let actions: Vec<_> = store
            .audit_for(&name("Bob"))
            .await
            .expect("audit")
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Rename, AuditAction::RequestApproved]);
    }

    #[tokio::test]
    async fn approval_that_cannot_be_recorded_is_reported() {
        let (store, service, id) = service(2).await;
        let err = service
            .approve(id, name("Steward"), String::new())
            .await
            .expect_err("decision lost");
        assert!(matches!(err, ApprovalError::Store(_)));
        // The rename itself was already claimed and queued.
        let rows = store
            .statuses(&name("Bob"), ReadConsistency::Latest)
            .await
            .expect("statuses");
        assert_eq!(rows.get(&shard("wikia")), Some(&RenameStatus::Queued));
        assert_eq!(
            store.get_request(id).await.expect("request").status,
            RequestStatus::Pending
        );
    }
}
