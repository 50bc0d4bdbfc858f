//! Shard-local database boundary.
//!
//! # Purpose
//! Each shard owns its local account table and its pages. The per-shard jobs
//! reach them only through [`ShardDatabase`], resolved by [`ShardDirectory`].
//!
//! # Notes
//! Every call is all-or-nothing: a failed call leaves the shard exactly as it
//! was, which is what lets a failed job roll back its local transaction.
use async_trait::async_trait;
use concord_common::{AccountName, PageNamespace, PageTitle, ShardId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::{InMemoryFarm, InMemoryShard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccount {
    pub user_id: u64,
    pub name: AccountName,
    pub edit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub title: PageTitle,
    /// Local user id of the last editor; rewritten when accounts merge.
    pub last_editor_id: u64,
    pub redirect_to: Option<PageTitle>,
}

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("not found on {shard}: {what}")]
    NotFound { shard: ShardId, what: String },
    #[error("conflict on {shard}: {what}")]
    Conflict { shard: ShardId, what: String },
    #[error("shard {0} unavailable")]
    Unavailable(ShardId),
    #[error("unknown shard {0}")]
    UnknownShard(ShardId),
}

pub type ShardResult<T> = Result<T, ShardError>;

#[async_trait]
pub trait ShardDatabase: Send + Sync {
    fn shard(&self) -> &ShardId;

    async fn account(&self, name: &AccountName) -> ShardResult<Option<LocalAccount>>;

    /// Rename the local account in place, keeping its user id and history.
    async fn rename_account(&self, old: &AccountName, new: &AccountName) -> ShardResult<()>;

    /// Fold `from` into the existing account `into` and delete `from`.
    async fn merge_account(&self, from: &AccountName, into: &AccountName) -> ShardResult<()>;

    /// Root page and subpages of `name` in `namespace`.
    async fn pages_with_prefix(
        &self,
        namespace: PageNamespace,
        name: &AccountName,
    ) -> ShardResult<Vec<PageTitle>>;

    async fn page_exists(&self, title: &PageTitle) -> ShardResult<bool>;

    async fn move_page(
        &self,
        from: &PageTitle,
        to: &PageTitle,
        performer: &AccountName,
        suppress_redirect: bool,
    ) -> ShardResult<()>;
}

pub trait ShardDirectory: Send + Sync {
    fn database(&self, shard: &ShardId) -> ShardResult<Arc<dyn ShardDatabase>>;
}
