//! Rename and merge requests.
//!
//! These are never persisted as such: they are built from an API call or an
//! approved request and consumed once by the orchestrator.
use concord_common::{AccountName, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOptions {
    /// Move user and user-talk pages (and subpages) to the new name.
    #[serde(default)]
    pub move_local_pages: bool,
    /// Do not leave redirects behind when moving pages.
    #[serde(default)]
    pub suppress_redirects: bool,
    /// Attach each renamed local account to the new global identity.
    #[serde(default)]
    pub promote_to_global: bool,
    /// Attachment method to record per shard when promoting.
    #[serde(default)]
    pub reattach_info_by_shard: BTreeMap<ShardId, String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub performer: AccountName,
    #[serde(default)]
    pub options: RenameOptions,
}

/// Fold `old_name` into the existing identity `new_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub performer: AccountName,
    #[serde(default)]
    pub options: RenameOptions,
}
