//! Global-identity registry boundary.
//!
//! # Purpose
//! The rename engine does not own the registry of global identities; it only
//! needs the slice declared by [`IdentityRegistry`]: the attachment set, a few
//! mutations used at claim time, cache invalidation and the rename-in-progress
//! predicate.
//!
//! # Notes
//! `rename_in_progress` is derived from the status store rather than stored on
//! the identity, so it flips back as soon as every shard row is terminal.
use crate::model::GlobalIdentity;
use crate::store::StoreError;
use async_trait::async_trait;
use concord_common::{AccountName, ShardId};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("registry conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    async fn identity(&self, name: &AccountName) -> RegistryResult<Option<GlobalIdentity>>;

    /// Shards attached to the identity; empty when it does not exist.
    async fn attached_shards(&self, name: &AccountName) -> RegistryResult<BTreeSet<ShardId>>;

    /// Shards holding a local account of this name that is not attached to it.
    async fn unattached_shards(&self, name: &AccountName) -> RegistryResult<BTreeSet<ShardId>>;

    /// Attach the local account on `shard`; `method` records how (login, admin, promotion...).
    async fn attach(&self, name: &AccountName, shard: &ShardId, method: &str)
    -> RegistryResult<()>;

    async fn detach(&self, name: &AccountName, shard: &ShardId) -> RegistryResult<()>;

    /// Rename the global row and the per-shard index rows of its attached accounts.
    async fn rewrite_name(&self, old: &AccountName, new: &AccountName) -> RegistryResult<()>;

    /// Drop an identity left with no attachments.
    async fn retire(&self, name: &AccountName) -> RegistryResult<()>;

    /// Fold `old` into `new` in one step: detach every shard of `old`, attach the
    /// `rename_shards` to `new` with `method`, then retire `old`. Either all of it
    /// applies or nothing does.
    async fn fold_into(
        &self,
        old: &AccountName,
        new: &AccountName,
        merge_shards: &[ShardId],
        rename_shards: &[ShardId],
        method: &str,
    ) -> RegistryResult<()>;

    async fn invalidate_cache(&self, name: &AccountName);

    async fn rename_in_progress(&self, name: &AccountName) -> RegistryResult<bool>;
}
