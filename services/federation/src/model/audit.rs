//! Audit log entries.
//!
//! # Purpose
//! One entry per rename, merge, operator resumption and approval decision. The
//! rename/merge entries also carry the parameters needed to rebuild a chain job
//! when an operator resumes a stalled operation. A claim released before its
//! chain started is recorded as `abandon` so it is never resumed.
use super::RenameOptions;
use chrono::{DateTime, Utc};
use concord_common::{AccountName, ShardId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Rename,
    Merge,
    Abandon,
    Resume,
    RequestApproved,
    RequestRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Rename => "rename",
            AuditAction::Merge => "merge",
            AuditAction::Abandon => "abandon",
            AuditAction::Resume => "resume",
            AuditAction::RequestApproved => "request-approved",
            AuditAction::RequestRejected => "request-rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rename" => Some(AuditAction::Rename),
            "merge" => Some(AuditAction::Merge),
            "abandon" => Some(AuditAction::Abandon),
            "resume" => Some(AuditAction::Resume),
            "request-approved" => Some(AuditAction::RequestApproved),
            "request-rejected" => Some(AuditAction::RequestRejected),
            _ => None,
        }
    }

    /// Actions that start a chain and can therefore be resumed.
    pub fn starts_chain(&self) -> bool {
        matches!(self, AuditAction::Rename | AuditAction::Merge)
    }

    /// Actions that decide what the status rows of an (old, new) pair belong to.
    pub fn records_operation(&self) -> bool {
        matches!(
            self,
            AuditAction::Rename | AuditAction::Merge | AuditAction::Abandon
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: AuditAction,
    pub performer: AccountName,
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub reason: String,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub performer: AccountName,
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub reason: String,
    pub params: serde_json::Value,
}

/// Parameters recorded with rename and merge entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationParams {
    pub options: RenameOptions,
    /// Shards whose local account is renamed (every shard, for a plain rename).
    pub rename_shards: Vec<ShardId>,
    /// Shards where the old local account is folded into an existing new one.
    #[serde(default)]
    pub merge_shards: Vec<ShardId>,
}
