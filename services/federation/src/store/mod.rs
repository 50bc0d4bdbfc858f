//! Persistence for rename status rows, approval requests and the audit log.
//!
//! # Purpose
//! [`RenameStatusStore::claim`] is the only concurrency-control primitive of the
//! rename engine: a batch of `queued` rows is created only when no non-terminal
//! row exists for the target name, and a partial batch is never kept.
//!
//! # Notes
//! Two backends implement the trait family: [`memory::InMemoryStore`] for tests
//! and single-process deployments, [`postgres::PostgresStore`] for durable ones.
use crate::model::{
    AuditEntry, NewAuditEntry, NewRenameRequest, PendingRenameRequest, ReadConsistency,
    RenameProgress, RenameStatus, RequestDecision, RequestStatus, ShardRenameStatus,
};
use async_trait::async_trait;
use concord_common::{AccountName, ShardId};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RenameStatusStore: Send + Sync {
    /// Insert one `queued` row per shard; returns how many rows were created.
    ///
    /// Anything short of `shards.len()` means another operation holds the target
    /// and nothing from this batch was kept.
    async fn claim(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
        shards: &[ShardId],
    ) -> StoreResult<usize>;

    /// Set the status of the latest row for (new name, shard).
    async fn update_status(
        &self,
        new_name: &AccountName,
        shard: &ShardId,
        status: RenameStatus,
    ) -> StoreResult<()>;

    /// Latest status per shard for a target name.
    async fn statuses(
        &self,
        new_name: &AccountName,
        consistency: ReadConsistency,
    ) -> StoreResult<BTreeMap<ShardId, RenameStatus>>;

    /// The (old, new) pair of a non-terminal operation involving `name` on either side.
    async fn names_in_progress(
        &self,
        name: &AccountName,
    ) -> StoreResult<Option<(AccountName, AccountName)>>;

    async fn in_progress_renames(&self) -> StoreResult<Vec<RenameProgress>>;

    /// Every row ever written for a target name, oldest first.
    async fn history(&self, new_name: &AccountName) -> StoreResult<Vec<ShardRenameStatus>>;
}

#[async_trait]
pub trait RenameRequestStore: Send + Sync {
    /// Fails with `Conflict` when a pending request already targets the new name,
    /// or the requester already has one pending on the same shard.
    async fn create_request(&self, request: NewRenameRequest)
    -> StoreResult<PendingRenameRequest>;
    async fn get_request(&self, id: i64) -> StoreResult<PendingRenameRequest>;
    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> StoreResult<Vec<PendingRenameRequest>>;
    /// Move a pending request to its terminal status; `Conflict` if already decided.
    async fn decide_request(
        &self,
        id: i64,
        decision: RequestDecision,
    ) -> StoreResult<PendingRenameRequest>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry>;
    /// Entries where `name` is the old or the new name, oldest first.
    async fn audit_for(&self, name: &AccountName) -> StoreResult<Vec<AuditEntry>>;
    /// Latest rename, merge or abandon entry for the `old_name` -> `new_name` pair.
    async fn latest_operation(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
    ) -> StoreResult<Option<AuditEntry>>;
}

#[async_trait]
pub trait FederationStore: RenameStatusStore + RenameRequestStore + AuditStore {
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Reduce a row list to the latest status per shard.
pub(crate) fn latest_per_shard<'a>(
    rows: impl IntoIterator<Item = &'a ShardRenameStatus>,
) -> BTreeMap<ShardId, RenameStatus> {
    let mut latest: BTreeMap<ShardId, (i64, RenameStatus)> = BTreeMap::new();
    for row in rows {
        let entry = latest
            .entry(row.shard.clone())
            .or_insert((row.id, row.status));
        if row.id >= entry.0 {
            *entry = (row.id, row.status);
        }
    }
    latest
        .into_iter()
        .map(|(shard, (_, status))| (shard, status))
        .collect()
}
