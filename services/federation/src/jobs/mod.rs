//! Per-shard job family.
//!
//! # Purpose
//! A rename or merge is carried out as a chain of jobs, one per shard, each run
//! on that shard's own worker. The [`runner::ShardJobRunner`] owns the shared
//! state machine (idempotency guard, status transitions, chain continuation);
//! [`rename::LocalRenameMutation`] and [`merge::LocalMergeMutation`] supply the
//! local mutation. Page moves fan out as independent best-effort jobs from a
//! successful local rename.
//!
//! # Notes
//! Jobs travel through the queue as JSON payloads tagged with a [`JobKind`].
use crate::model::RenameOptions;
use crate::registry::RegistryError;
use crate::shard::ShardError;
use crate::store::StoreError;
use concord_common::{AccountName, PageTitle, ShardId};
use concord_queue::QueueError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod dispatch;
pub mod merge;
pub mod page_move;
pub mod rename;
pub mod runner;

pub use dispatch::FederationJobHandler;
pub use merge::LocalMergeMutation;
pub use page_move::{PageMigrationFanout, PageMoveJob, PageMoveOutcome};
pub use rename::LocalRenameMutation;
pub use runner::{JobOutcome, MutationOutcome, ShardJobRunner, ShardMutation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "local_rename_user")]
    LocalRename,
    #[serde(rename = "local_user_merge")]
    LocalMerge,
    #[serde(rename = "local_page_move")]
    PageMove,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::LocalRename => "local_rename_user",
            JobKind::LocalMerge => "local_user_merge",
            JobKind::PageMove => "local_page_move",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local_rename_user" => Some(JobKind::LocalRename),
            "local_user_merge" => Some(JobKind::LocalMerge),
            "local_page_move" => Some(JobKind::PageMove),
            _ => None,
        }
    }
}

/// Parameters shared by every job of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardJobParams {
    pub from: AccountName,
    pub to: AccountName,
    pub renamer: AccountName,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub options: RenameOptions,
    /// Shards of this chain in the order they are visited.
    pub chain: Vec<ShardId>,
}

impl ShardJobParams {
    /// Who follow-up work such as page moves is attributed to.
    ///
    /// A user renaming themselves no longer exists under the old name once the
    /// local rename committed.
    pub fn follow_up_performer(&self) -> &AccountName {
        if self.renamer == self.from {
            &self.to
        } else {
            &self.renamer
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMoveParams {
    pub from_title: PageTitle,
    pub to_title: PageTitle,
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub renamer: AccountName,
    #[serde(default)]
    pub suppress_redirects: bool,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown job kind {0:?}")]
    UnknownKind(String),
    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("local mutation on {shard} failed: {reason}")]
    MutationFailed { shard: ShardId, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Shard(#[from] ShardError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}
