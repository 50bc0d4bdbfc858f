//! Operator-driven resumption of stalled chains.
//!
//! # Purpose
//! A chain stops at a failed shard, or hangs when a worker died mid-job. There
//! is no automatic retry: an operator inspects the status rows and asks for one
//! shard to be run again. This module rebuilds that shard's job from the audit
//! log and enqueues it; the chain then continues on its own.
//!
//! # Notes
//! Resumption never claims. It only works on rows that already exist, and only
//! with the audit entry of the (old, new) pair written on the resumed row. A
//! claim abandoned before its chain started is never resumed.
use crate::jobs::{JobKind, ShardJobParams};
use crate::model::{
    AuditAction, NewAuditEntry, OperationParams, ReadConsistency, RenameStatus,
};
use crate::store::{FederationStore, StoreError};
use concord_common::{AccountName, ShardId};
use concord_queue::{JobId, JobQueue, QueueError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("nothing to resume for {0}")]
    NothingToResume(AccountName),
    #[error("{new_name} has no status row on {shard}")]
    UnknownShard { new_name: AccountName, shard: ShardId },
    #[error("{new_name} is already done on {shard}")]
    AlreadyDone { new_name: AccountName, shard: ShardId },
    #[error("no rename or merge recorded for {old_name} -> {new_name}")]
    NoOperation {
        old_name: AccountName,
        new_name: AccountName,
    },
    #[error("claim for {old_name} -> {new_name} was abandoned before its chain started")]
    Abandoned {
        old_name: AccountName,
        new_name: AccountName,
    },
    #[error("recorded parameters unreadable: {0}")]
    Params(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeTicket {
    pub new_name: AccountName,
    pub shard: ShardId,
    pub kind: JobKind,
    pub previous: RenameStatus,
    pub job: JobId,
}

#[derive(Clone)]
pub struct RecoveryService {
    store: Arc<dyn FederationStore>,
    queue: Arc<dyn JobQueue>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn FederationStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Re-enqueue the job for `shard`, or for the first unfinished shard.
    pub async fn resume(
        &self,
        new_name: &AccountName,
        shard: Option<&ShardId>,
        performer: &AccountName,
    ) -> Result<ResumeTicket, RecoveryError> {
        let statuses = self
            .store
            .statuses(new_name, ReadConsistency::Locking)
            .await?;
        let (target, previous) = match shard {
            Some(shard) => {
                let status =
                    statuses
                        .get(shard)
                        .copied()
                        .ok_or_else(|| RecoveryError::UnknownShard {
                            new_name: new_name.clone(),
                            shard: shard.clone(),
                        })?;
                if status == RenameStatus::Done {
                    return Err(RecoveryError::AlreadyDone {
                        new_name: new_name.clone(),
                        shard: shard.clone(),
                    });
                }
                (shard.clone(), status)
            }
            None => statuses
                .iter()
                .find(|(_, status)| **status != RenameStatus::Done)
                .map(|(shard, status)| (shard.clone(), *status))
                .ok_or_else(|| RecoveryError::NothingToResume(new_name.clone()))?,
        };

        let old_name = self
            .store
            .history(new_name)
            .await?
            .into_iter()
            .rev()
            .find(|row| row.shard == target)
            .map(|row| row.old_name)
            .ok_or_else(|| RecoveryError::UnknownShard {
                new_name: new_name.clone(),
                shard: target.clone(),
            })?;
        let entry = self
            .store
            .latest_operation(&old_name, new_name)
            .await?
            .ok_or_else(|| RecoveryError::NoOperation {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
            })?;
        if !entry.action.starts_chain() {
            return Err(RecoveryError::Abandoned {
                old_name,
                new_name: new_name.clone(),
            });
        }
        let operation: OperationParams = serde_json::from_value(entry.params.clone())?;
        let (kind, chain) = if operation.merge_shards.contains(&target) {
            (JobKind::LocalMerge, operation.merge_shards)
        } else if operation.rename_shards.contains(&target) {
            (JobKind::LocalRename, operation.rename_shards)
        } else {
            return Err(RecoveryError::UnknownShard {
                new_name: new_name.clone(),
                shard: target,
            });
        };

        // A worker died mid-job; make the row runnable again.
        if previous == RenameStatus::InProgress {
            self.store
                .update_status(new_name, &target, RenameStatus::Queued)
                .await?;
        }

        let params = ShardJobParams {
            from: entry.old_name.clone(),
            to: entry.new_name.clone(),
            renamer: entry.performer.clone(),
            reason: entry.reason.clone(),
            options: operation.options,
            chain,
        };
        let job = self
            .queue
            .enqueue(kind.as_str(), &target, serde_json::to_value(&params)?)
            .await?;

        self.store
            .append_audit(NewAuditEntry {
                action: AuditAction::Resume,
                performer: performer.clone(),
                old_name: entry.old_name,
                new_name: entry.new_name,
                reason: format!("resumed on {target}"),
                params: serde_json::json!({
                    "shard": target,
                    "previous": previous,
                    "kind": kind,
                }),
            })
            .await?;
        info!(new = %new_name, shard = %target, %previous, %job, "chain resumed by operator");

        Ok(ResumeTicket {
            new_name: new_name.clone(),
            shard: target,
            kind,
            previous,
            job,
        })
    }
}
