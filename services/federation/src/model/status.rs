//! Per-(new name, shard) status rows.
//!
//! # Purpose
//! Defines the rows written by the claim and updated by the per-shard jobs, and
//! the read modes used when consulting them.
use concord_common::{AccountName, RenameStatus, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRenameStatus {
    /// Surrogate id; later attempts for the same (new name, shard) get larger ids.
    pub id: i64,
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub shard: ShardId,
    pub status: RenameStatus,
}

/// How a status read is allowed to be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Wait for in-flight writers on the rows, then release so later reads see fresh data.
    /// Used right after a job is dequeued.
    Locking,
    /// Plain read of the latest committed rows.
    Latest,
}

/// A rename or merge with at least one non-terminal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameProgress {
    pub old_name: AccountName,
    pub new_name: AccountName,
    pub shards: BTreeMap<ShardId, RenameStatus>,
}
