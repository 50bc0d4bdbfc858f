//! Page migration after a local rename.
//!
//! # Purpose
//! [`PageMigrationFanout`] turns one successful local rename into one
//! independent job per user or user-talk page owned by the old name.
//! [`PageMoveJob`] executes a single move.
//!
//! # Notes
//! Page moves are best effort. A move that is blocked or fails is logged and
//! counted; it is never retried and never affects the shard's status row or
//! sibling moves.
use super::{JobError, JobKind, PageMoveParams, ShardJobParams};
use crate::shard::{ShardDatabase, ShardDirectory};
use concord_common::{PageNamespace, ShardId};
use concord_queue::JobQueue;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct PageMigrationFanout {
    queue: Arc<dyn JobQueue>,
}

impl PageMigrationFanout {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue one move per page owned by the old name; returns how many.
    pub async fn fan_out(
        &self,
        db: &dyn ShardDatabase,
        params: &ShardJobParams,
    ) -> Result<usize, JobError> {
        let mut enqueued = 0;
        for namespace in [PageNamespace::User, PageNamespace::UserTalk] {
            for from_title in db.pages_with_prefix(namespace, &params.from).await? {
                let Some(to_title) = from_title.renamed(&params.from, &params.to) else {
                    continue;
                };
                let move_params = PageMoveParams {
                    from_title,
                    to_title,
                    old_name: params.from.clone(),
                    new_name: params.to.clone(),
                    renamer: params.follow_up_performer().clone(),
                    suppress_redirects: params.options.suppress_redirects,
                };
                self.queue
                    .enqueue(
                        JobKind::PageMove.as_str(),
                        db.shard(),
                        serde_json::to_value(&move_params)?,
                    )
                    .await?;
                enqueued += 1;
            }
        }
        debug!(shard = %db.shard(), from = %params.from, pages = enqueued, "page moves enqueued");
        Ok(enqueued)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMoveOutcome {
    Moved,
    /// The move is not currently legal (source gone, destination taken).
    Blocked(String),
    Failed(String),
}

impl PageMoveOutcome {
    fn label(&self) -> &'static str {
        match self {
            PageMoveOutcome::Moved => "moved",
            PageMoveOutcome::Blocked(_) => "blocked",
            PageMoveOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct PageMoveJob {
    shards: Arc<dyn ShardDirectory>,
}

impl PageMoveJob {
    pub fn new(shards: Arc<dyn ShardDirectory>) -> Self {
        Self { shards }
    }

    pub async fn run(&self, shard: &ShardId, params: &PageMoveParams) -> PageMoveOutcome {
        let outcome = self.try_move(shard, params).await;
        metrics::counter!("concord_page_moves_total", "outcome" => outcome.label()).increment(1);
        match &outcome {
            PageMoveOutcome::Moved => {
                info!(%shard, from = %params.from_title, to = %params.to_title, "page moved")
            }
            PageMoveOutcome::Blocked(reason) | PageMoveOutcome::Failed(reason) => warn!(
                %shard,
                from = %params.from_title,
                to = %params.to_title,
                %reason,
                "page move skipped"
            ),
        }
        outcome
    }

    async fn try_move(&self, shard: &ShardId, params: &PageMoveParams) -> PageMoveOutcome {
        let db = match self.shards.database(shard) {
            Ok(db) => db,
            Err(err) => return PageMoveOutcome::Failed(err.to_string()),
        };
        match db.page_exists(&params.from_title).await {
            Ok(true) => {}
            Ok(false) => return PageMoveOutcome::Blocked("source page is gone".to_string()),
            Err(err) => return PageMoveOutcome::Failed(err.to_string()),
        }
        match db.page_exists(&params.to_title).await {
            Ok(false) => {}
            Ok(true) => return PageMoveOutcome::Blocked("destination page exists".to_string()),
            Err(err) => return PageMoveOutcome::Failed(err.to_string()),
        }
        match db
            .move_page(
                &params.from_title,
                &params.to_title,
                &params.renamer,
                params.suppress_redirects,
            )
            .await
        {
            Ok(()) => PageMoveOutcome::Moved,
            Err(err) => PageMoveOutcome::Failed(err.to_string()),
        }
    }
}
