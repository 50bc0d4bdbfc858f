//! In-memory implementation of the federation store.
//!
//! # Purpose
//! Implements the store traits with plain collections guarded by
//! `tokio::sync::RwLock`. It backs tests and single-process deployments where
//! losing in-flight renames on restart is acceptable.
//!
//! # Consistency
//! - **Not durable**: all rows are lost on restart.
//! - The claim runs entirely under the status table's write lock, so two claims
//!   for the same target are serialised and the second one observes the first.
//! - A locking read takes the write lock once before reading. That waits out any
//!   writer currently holding the table, which is the in-process equivalent of
//!   waiting for the enqueuing transaction to become visible.
use super::{
    AuditStore, FederationStore, RenameRequestStore, RenameStatusStore, StoreError, StoreResult,
    latest_per_shard,
};
use crate::model::{
    AuditEntry, NewAuditEntry, NewRenameRequest, PendingRenameRequest, ReadConsistency,
    RenameProgress, RenameStatus, RequestDecision, RequestStatus, ShardRenameStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use concord_common::{AccountName, ShardId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StatusTable {
    next_id: i64,
    rows: Vec<ShardRenameStatus>,
}

impl StatusTable {
    fn has_pending(&self, new_name: &AccountName) -> bool {
        self.rows
            .iter()
            .any(|row| &row.new_name == new_name && row.status.is_pending())
    }
}

#[derive(Debug, Default)]
struct RequestTable {
    next_id: i64,
    rows: BTreeMap<i64, PendingRenameRequest>,
}

#[derive(Debug, Default)]
struct AuditTable {
    next_id: i64,
    rows: Vec<AuditEntry>,
}

/// In-memory federation store.
///
/// Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    statuses: Arc<RwLock<StatusTable>>,
    requests: Arc<RwLock<RequestTable>>,
    audit: Arc<RwLock<AuditTable>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RenameStatusStore for InMemoryStore {
    async fn claim(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
        shards: &[ShardId],
    ) -> StoreResult<usize> {
        let mut table = self.statuses.write().await;
        if table.has_pending(new_name) {
            return Ok(0);
        }
        let mut seen = BTreeSet::new();
        let mut batch = Vec::with_capacity(shards.len());
        for shard in shards {
            if !seen.insert(shard) {
                continue;
            }
            table.next_id += 1;
            batch.push(ShardRenameStatus {
                id: table.next_id,
                old_name: old_name.clone(),
                new_name: new_name.clone(),
                shard: shard.clone(),
                status: RenameStatus::Queued,
            });
        }
        let inserted = batch.len();
        // A short batch is reported but not kept.
        if inserted == shards.len() {
            table.rows.extend(batch);
        }
        Ok(inserted)
    }

    async fn update_status(
        &self,
        new_name: &AccountName,
        shard: &ShardId,
        status: RenameStatus,
    ) -> StoreResult<()> {
        let mut table = self.statuses.write().await;
        let row = table
            .rows
            .iter_mut()
            .rev()
            .find(|row| &row.new_name == new_name && &row.shard == shard)
            .ok_or_else(|| StoreError::NotFound(format!("rename status {new_name}@{shard}")))?;
        row.status = status;
        Ok(())
    }

    async fn statuses(
        &self,
        new_name: &AccountName,
        consistency: ReadConsistency,
    ) -> StoreResult<BTreeMap<ShardId, RenameStatus>> {
        if consistency == ReadConsistency::Locking {
            drop(self.statuses.write().await);
        }
        let table = self.statuses.read().await;
        Ok(latest_per_shard(
            table.rows.iter().filter(|row| &row.new_name == new_name),
        ))
    }

    async fn names_in_progress(
        &self,
        name: &AccountName,
    ) -> StoreResult<Option<(AccountName, AccountName)>> {
        let table = self.statuses.read().await;
        Ok(table
            .rows
            .iter()
            .find(|row| row.status.is_pending() && (&row.old_name == name || &row.new_name == name))
            .map(|row| (row.old_name.clone(), row.new_name.clone())))
    }

    async fn in_progress_renames(&self) -> StoreResult<Vec<RenameProgress>> {
        let table = self.statuses.read().await;
        let pairs: BTreeSet<(AccountName, AccountName)> = table
            .rows
            .iter()
            .filter(|row| row.status.is_pending())
            .map(|row| (row.old_name.clone(), row.new_name.clone()))
            .collect();
        Ok(pairs
            .into_iter()
            .map(|(old_name, new_name)| {
                let shards = latest_per_shard(
                    table
                        .rows
                        .iter()
                        .filter(|row| row.old_name == old_name && row.new_name == new_name),
                );
                RenameProgress {
                    old_name,
                    new_name,
                    shards,
                }
            })
            .collect())
    }

    async fn history(&self, new_name: &AccountName) -> StoreResult<Vec<ShardRenameStatus>> {
        let table = self.statuses.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|row| &row.new_name == new_name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RenameRequestStore for InMemoryStore {
    async fn create_request(
        &self,
        request: NewRenameRequest,
    ) -> StoreResult<PendingRenameRequest> {
        let mut table = self.requests.write().await;
        let pending = table
            .rows
            .values()
            .filter(|row| row.status == RequestStatus::Pending);
        for row in pending {
            if row.new_name == request.new_name {
                return Err(StoreError::Conflict(format!(
                    "pending request for {} exists",
                    request.new_name
                )));
            }
            if row.requester == request.requester && row.requested_on == request.requested_on {
                return Err(StoreError::Conflict(format!(
                    "{} already has a pending request on {}",
                    request.requester, request.requested_on
                )));
            }
        }
        table.next_id += 1;
        let created = PendingRenameRequest {
            id: table.next_id,
            requester: request.requester,
            requested_on: request.requested_on,
            new_name: request.new_name,
            reason: request.reason,
            status: RequestStatus::Pending,
            requested_at: Utc::now(),
            performer: None,
            comment: None,
            completed_at: None,
        };
        table.rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_request(&self, id: i64) -> StoreResult<PendingRenameRequest> {
        self.requests
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("rename request {id}")))
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> StoreResult<Vec<PendingRenameRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .rows
            .values()
            .filter(|row| status.is_none_or(|status| row.status == status))
            .cloned()
            .collect())
    }

    async fn decide_request(
        &self,
        id: i64,
        decision: RequestDecision,
    ) -> StoreResult<PendingRenameRequest> {
        let mut table = self.requests.write().await;
        let row = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("rename request {id}")))?;
        if row.status != RequestStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "rename request {id} already {}",
                row.status.as_str()
            )));
        }
        row.status = decision.status;
        row.performer = Some(decision.performer);
        row.comment = Some(decision.comment);
        row.completed_at = Some(Utc::now());
        Ok(row.clone())
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut table = self.audit.write().await;
        table.next_id += 1;
        let stored = AuditEntry {
            id: table.next_id,
            action: entry.action,
            performer: entry.performer,
            old_name: entry.old_name,
            new_name: entry.new_name,
            reason: entry.reason,
            params: entry.params,
            created_at: Utc::now(),
        };
        table.rows.push(stored.clone());
        Ok(stored)
    }

    async fn audit_for(&self, name: &AccountName) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .audit
            .read()
            .await
            .rows
            .iter()
            .filter(|entry| &entry.old_name == name || &entry.new_name == name)
            .cloned()
            .collect())
    }

    async fn latest_operation(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
    ) -> StoreResult<Option<AuditEntry>> {
        Ok(self
            .audit
            .read()
            .await
            .rows
            .iter()
            .rev()
            .find(|entry| {
                entry.action.records_operation()
                    && &entry.old_name == old_name
                    && &entry.new_name == new_name
            })
            .cloned())
    }
}

#[async_trait]
impl FederationStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditAction;

    fn name(value: &str) -> AccountName {
        AccountName::parse(value).expect("name")
    }

    fn shards(ids: &[&str]) -> Vec<ShardId> {
        ids.iter().map(|id| ShardId::new(*id).expect("shard")).collect()
    }

    #[tokio::test]
    async fn claim_creates_queued_rows() {
        let store = InMemoryStore::new();
        let wikis = shards(&["wikia", "wikib", "wikic"]);
        let inserted = store
            .claim(&name("Alice"), &name("Bob"), &wikis)
            .await
            .expect("claim");
        assert_eq!(inserted, 3);

        let statuses = store
            .statuses(&name("Bob"), ReadConsistency::Locking)
            .await
            .expect("statuses");
        assert_eq!(statuses.len(), 3);
        assert!(statuses.values().all(|s| *s == RenameStatus::Queued));
    }

    #[tokio::test]
    async fn second_claim_on_same_target_inserts_nothing() {
        let store = InMemoryStore::new();
        let wikis = shards(&["wikia", "wikib"]);
        store
            .claim(&name("Alice"), &name("Bob"), &wikis)
            .await
            .expect("claim");
        let again = store
            .claim(&name("Carol"), &name("Bob"), &shards(&["wikic"]))
            .await
            .expect("claim");
        assert_eq!(again, 0);
        assert_eq!(store.history(&name("Bob")).await.expect("history").len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = InMemoryStore::new();
        let wikis = shards(&["wikia", "wikib", "wikic"]);
        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                let wikis = wikis.clone();
                tokio::spawn(async move { store.claim(&name("Alice"), &name("Bob"), &wikis).await })
            },
            {
                let store = store.clone();
                let wikis = wikis.clone();
                tokio::spawn(async move { store.claim(&name("Alice"), &name("Bob"), &wikis).await })
            }
        );
        let mut counts = vec![
            a.expect("join").expect("claim"),
            b.expect("join").expect("claim"),
        ];
        counts.sort();
        assert_eq!(counts, vec![0, 3]);
        assert_eq!(store.history(&name("Bob")).await.expect("history").len(), 3);
    }

    #[tokio::test]
    async fn short_batch_is_not_kept() {
        let store = InMemoryStore::new();
        let wikis = shards(&["wikia", "wikia"]);
        let inserted = store
            .claim(&name("Alice"), &name("Bob"), &wikis)
            .await
            .expect("claim");
        assert_eq!(inserted, 1);
        assert!(store.history(&name("Bob")).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn terminal_rows_allow_a_new_claim_and_reads_see_the_latest_attempt() {
        let store = InMemoryStore::new();
        let wikia = shards(&["wikia"]);
        store
            .claim(&name("Alice"), &name("Bob"), &wikia)
            .await
            .expect("claim");
        store
            .update_status(&name("Bob"), &wikia[0], RenameStatus::Failed)
            .await
            .expect("update");

        let inserted = store
            .claim(&name("Carol"), &name("Bob"), &wikia)
            .await
            .expect("claim");
        assert_eq!(inserted, 1);
        let statuses = store
            .statuses(&name("Bob"), ReadConsistency::Latest)
            .await
            .expect("statuses");
        assert_eq!(statuses.get(&wikia[0]), Some(&RenameStatus::Queued));
        assert_eq!(store.history(&name("Bob")).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn names_in_progress_matches_old_and_new_until_terminal() {
        let store = InMemoryStore::new();
        let wikia = shards(&["wikia"]);
        store
            .claim(&name("Alice"), &name("Bob"), &wikia)
            .await
            .expect("claim");
        let pair = Some((name("Alice"), name("Bob")));
        assert_eq!(store.names_in_progress(&name("Alice")).await.expect("old"), pair);
        assert_eq!(store.names_in_progress(&name("Bob")).await.expect("new"), pair);
        assert_eq!(store.in_progress_renames().await.expect("list").len(), 1);

        store
            .update_status(&name("Bob"), &wikia[0], RenameStatus::Done)
            .await
            .expect("update");
        assert!(store.names_in_progress(&name("Alice")).await.expect("old").is_none());
        assert!(store.in_progress_renames().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn update_status_without_a_row_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .update_status(&name("Bob"), &shards(&["wikia"])[0], RenameStatus::Done)
            .await
            .expect_err("missing row");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    fn request(requester: &str, shard: &str, new_name: &str) -> NewRenameRequest {
        NewRenameRequest {
            requester: name(requester),
            requested_on: ShardId::new(shard).expect("shard"),
            new_name: name(new_name),
            reason: "please".to_string(),
        }
    }

    #[tokio::test]
    async fn pending_requests_are_unique_per_target_and_per_requester_shard() {
        let store = InMemoryStore::new();
        store
            .create_request(request("Alice", "wikia", "Bob"))
            .await
            .expect("create");
        let same_target = store
            .create_request(request("Carol", "wikib", "Bob"))
            .await
            .expect_err("target conflict");
        assert!(matches!(same_target, StoreError::Conflict(_)));
        let same_requester = store
            .create_request(request("Alice", "wikia", "Dave"))
            .await
            .expect_err("requester conflict");
        assert!(matches!(same_requester, StoreError::Conflict(_)));
        store
            .create_request(request("Alice", "wikib", "Dave"))
            .await
            .expect("other shard is fine");
    }

    #[tokio::test]
    async fn requests_are_decided_exactly_once_and_kept() {
        let store = InMemoryStore::new();
        let created = store
            .create_request(request("Alice", "wikia", "Bob"))
            .await
            .expect("create");
        let decided = store
            .decide_request(
                created.id,
                RequestDecision {
                    status: RequestStatus::Rejected,
                    performer: name("Steward"),
                    comment: "no".to_string(),
                },
            )
            .await
            .expect("decide");
        assert_eq!(decided.status, RequestStatus::Rejected);
        assert!(decided.completed_at.is_some());

        let again = store
            .decide_request(
                created.id,
                RequestDecision {
                    status: RequestStatus::Approved,
                    performer: name("Steward"),
                    comment: "yes".to_string(),
                },
            )
            .await
            .expect_err("already decided");
        assert!(matches!(again, StoreError::Conflict(_)));
        assert_eq!(store.list_requests(None).await.expect("list").len(), 1);
        assert!(
            store
                .list_requests(Some(RequestStatus::Pending))
                .await
                .expect("list")
                .is_empty()
        );
        store
            .create_request(request("Carol", "wikib", "Bob"))
            .await
            .expect("target free again once decided");
    }

    #[tokio::test]
    async fn latest_operation_skips_non_chain_entries() {
        let store = InMemoryStore::new();
        for action in [AuditAction::Rename, AuditAction::Resume] {
            store
                .append_audit(NewAuditEntry {
                    action,
                    performer: name("Steward"),
                    old_name: name("Alice"),
                    new_name: name("Bob"),
                    reason: String::new(),
                    params: serde_json::json!({}),
                })
                .await
                .expect("append");
        }
        let latest = store
            .latest_operation(&name("Alice"), &name("Bob"))
            .await
            .expect("latest")
            .expect("entry");
        assert_eq!(latest.action, AuditAction::Rename);
        assert_eq!(store.audit_for(&name("Alice")).await.expect("audit").len(), 2);
    }

    #[tokio::test]
    async fn latest_operation_is_scoped_to_the_name_pair() {
        let store = InMemoryStore::new();
        for (action, old) in [
            (AuditAction::Rename, "Alice"),
            (AuditAction::Abandon, "Dave"),
        ] {
            store
                .append_audit(NewAuditEntry {
                    action,
                    performer: name("Steward"),
                    old_name: name(old),
                    new_name: name("Bob"),
                    reason: String::new(),
                    params: serde_json::json!({}),
                })
                .await
                .expect("append");
        }
        let alice = store
            .latest_operation(&name("Alice"), &name("Bob"))
            .await
            .expect("latest")
            .expect("entry");
        assert_eq!(alice.action, AuditAction::Rename);
        let dave = store
            .latest_operation(&name("Dave"), &name("Bob"))
            .await
            .expect("latest")
            .expect("entry");
        assert_eq!(dave.action, AuditAction::Abandon);
        assert!(
            store
                .latest_operation(&name("Carol"), &name("Bob"))
                .await
                .expect("latest")
                .is_none()
        );
    }
}
