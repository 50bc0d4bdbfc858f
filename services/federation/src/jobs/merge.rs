//! Local account merge, the merge-kind chain job.
//!
//! Folds the source account's edits and page attribution into the destination
//! account on the same shard, then deletes the source.
use super::runner::{MutationOutcome, ShardMutation};
use super::{JobKind, ShardJobParams};
use crate::shard::ShardDatabase;
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMergeMutation;

#[async_trait]
impl ShardMutation for LocalMergeMutation {
    fn kind(&self) -> JobKind {
        JobKind::LocalMerge
    }

    async fn perform_shard_mutation(
        &self,
        db: &dyn ShardDatabase,
        params: &ShardJobParams,
    ) -> MutationOutcome {
        let target = match db.account(&params.to).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                return MutationOutcome::Failed(format!(
                    "merge target {} has no local account on {}",
                    params.to,
                    db.shard()
                ));
            }
            Err(err) => return MutationOutcome::Failed(err.to_string()),
        };
        match db.account(&params.from).await {
            Ok(Some(_)) => match db.merge_account(&params.from, &params.to).await {
                Ok(()) => MutationOutcome::Done,
                Err(err) => MutationOutcome::Failed(err.to_string()),
            },
            Ok(None) => {
                debug!(shard = %db.shard(), into = %target.name, "source account already merged");
                MutationOutcome::Done
            }
            Err(err) => MutationOutcome::Failed(err.to_string()),
        }
    }
}
