use concord_common::{AccountName, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The slice of a registry identity the rename engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdentity {
    pub id: u64,
    pub name: AccountName,
    pub attached: BTreeSet<ShardId>,
    pub home_shard: Option<ShardId>,
    pub locked: bool,
    pub hidden: bool,
}
