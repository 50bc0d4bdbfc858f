//! Local account rename, the rename-kind chain job.
use super::page_move::PageMigrationFanout;
use super::runner::{MutationOutcome, ShardMutation};
use super::{JobError, JobKind, ShardJobParams};
use crate::registry::IdentityRegistry;
use crate::shard::ShardDatabase;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_ATTACH_METHOD: &str = "promotion";

pub struct LocalRenameMutation {
    registry: Arc<dyn IdentityRegistry>,
    fanout: PageMigrationFanout,
}

impl LocalRenameMutation {
    pub fn new(registry: Arc<dyn IdentityRegistry>, fanout: PageMigrationFanout) -> Self {
        Self { registry, fanout }
    }
}

#[async_trait]
impl ShardMutation for LocalRenameMutation {
    fn kind(&self) -> JobKind {
        JobKind::LocalRename
    }

    async fn perform_shard_mutation(
        &self,
        db: &dyn ShardDatabase,
        params: &ShardJobParams,
    ) -> MutationOutcome {
        match db.account(&params.from).await {
            Ok(Some(_)) => match db.rename_account(&params.from, &params.to).await {
                Ok(()) => MutationOutcome::Done,
                Err(err) => MutationOutcome::Failed(err.to_string()),
            },
            // An earlier attempt renamed the account but died before recording it.
            Ok(None) => match db.account(&params.to).await {
                Ok(Some(_)) => {
                    debug!(shard = %db.shard(), to = %params.to, "local account already renamed");
                    MutationOutcome::Done
                }
                Ok(None) => MutationOutcome::Failed(format!(
                    "no local account {} on {}",
                    params.from,
                    db.shard()
                )),
                Err(err) => MutationOutcome::Failed(err.to_string()),
            },
            Err(err) => MutationOutcome::Failed(err.to_string()),
        }
    }

    async fn after_commit(
        &self,
        db: &dyn ShardDatabase,
        params: &ShardJobParams,
    ) -> Result<(), JobError> {
        if params.options.promote_to_global {
            let method = params
                .options
                .reattach_info_by_shard
                .get(db.shard())
                .map(String::as_str)
                .unwrap_or(DEFAULT_ATTACH_METHOD);
            self.registry.attach(&params.to, db.shard(), method).await?;
            info!(shard = %db.shard(), identity = %params.to, method, "attached renamed account");
        }
        if params.options.move_local_pages {
            self.fanout.fan_out(db, params).await?;
        }
        Ok(())
    }
}
