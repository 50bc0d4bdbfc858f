//! Postgres-backed implementation of the federation store.
//!
//! # Purpose
//! Durable storage for rename status rows, approval requests and the audit log,
//! shared by every federation process in a deployment.
//!
//! # Key invariants
//! - `shard_rename_status` carries a partial unique index on `(new_name, shard)`
//!   restricted to `queued`/`inprogress` rows. The claim inserts with
//!   `ON CONFLICT ... DO NOTHING` against it, so two concurrent claims for the
//!   same target cannot both create their full batch.
//! - Status rows are append-only history: a later attempt adds a row with a
//!   larger `id` and every read reports the highest `id` per shard.
//! - Pending approval requests are unique per target name and per
//!   (requester, shard) through partial unique indexes.
//!
//! # Consistency
//! - The claim is one transaction holding an advisory lock on the target name.
//!   When fewer rows than shards were inserted the transaction is rolled back,
//!   so a losing batch never persists.
//! - [`ReadConsistency::Locking`] reads with `SELECT ... FOR UPDATE` in a short
//!   transaction that commits right away. That waits out the transaction which
//!   enqueued the job without pinning later reads to an old snapshot.
//!
//! # Operational notes
//! - Migrations run at startup via `sqlx::migrate!("./migrations")`.
//! - Database URLs may contain credentials; never log them.
use super::{
    AuditStore, FederationStore, RenameRequestStore, RenameStatusStore, StoreError, StoreResult,
    latest_per_shard,
};
use crate::config::PostgresConfig;
use crate::model::{
    AuditAction, AuditEntry, NewAuditEntry, NewRenameRequest, PendingRenameRequest,
    ReadConsistency, RenameProgress, RenameStatus, RequestDecision, RequestStatus,
    ShardRenameStatus,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concord_common::{AccountName, ShardId};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;

const PENDING_STATUSES: &str = "('queued', 'inprogress')";

/// Durable federation store backed by Postgres.
///
/// # Errors
/// Connection and query failures surface as [`StoreError::Database`]; rows that
/// no longer parse into domain types surface as [`StoreError::Unexpected`].
///
/// # Example
/// ```rust,no_run
/// use federation::config::PostgresConfig;
/// use federation::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbStatus {
    id: i64,
    old_name: String,
    new_name: String,
    shard: String,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbRequest {
    id: i64,
    requester: String,
    requested_on: String,
    new_name: String,
    reason: String,
    status: String,
    requested_at: DateTime<Utc>,
    performer: Option<String>,
    comment: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbAudit {
    id: i64,
    action: String,
    performer: String,
    old_name: String,
    new_name: String,
    reason: String,
    params: Value,
    created_at: DateTime<Utc>,
}

impl PostgresStore {
    /// Open a pool and apply the embedded migrations.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Open a pool against a schema managed elsewhere.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await?;

        if run_migrations {
            // Handlers assume the schema exists; fail startup rather than serve half a store.
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|err| StoreError::Unexpected(err.into()))?;
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn status_rows(
        &self,
        new_name: &AccountName,
        consistency: ReadConsistency,
    ) -> StoreResult<Vec<DbStatus>> {
        match consistency {
            ReadConsistency::Locking => {
                let mut tx = self.pool.begin().await?;
                let rows = sqlx::query_as::<_, DbStatus>(
                    r#"SELECT id, old_name, new_name, shard, status
                       FROM shard_rename_status
                       WHERE new_name = $1
                       ORDER BY id
                       FOR UPDATE"#,
                )
                .bind(new_name.as_str())
                .fetch_all(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(rows)
            }
            ReadConsistency::Latest => Ok(sqlx::query_as::<_, DbStatus>(
                r#"SELECT id, old_name, new_name, shard, status
                   FROM shard_rename_status
                   WHERE new_name = $1
                   ORDER BY id"#,
            )
            .bind(new_name.as_str())
            .fetch_all(&self.pool)
            .await?),
        }
    }
}

#[async_trait]
impl RenameStatusStore for PostgresStore {
    async fn claim(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
        shards: &[ShardId],
    ) -> StoreResult<usize> {
        // Sorted so concurrent claims take index locks in the same order.
        let mut ordered: Vec<String> = shards.iter().map(|s| s.as_str().to_string()).collect();
        ordered.sort();

        let mut tx = self.pool.begin().await?;
        // Claims for one target name are serialised so disjoint shard sets cannot both win.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(new_name.as_str())
            .execute(&mut *tx)
            .await?;
        let sql = format!(
            r#"INSERT INTO shard_rename_status (old_name, new_name, shard, status)
               SELECT $1, $2, batch.shard, 'queued'
               FROM UNNEST($3::text[]) AS batch(shard)
               WHERE NOT EXISTS (
                   SELECT 1 FROM shard_rename_status
                   WHERE new_name = $2 AND status IN {PENDING_STATUSES}
               )
               ON CONFLICT (new_name, shard) WHERE status IN {PENDING_STATUSES} DO NOTHING"#
        );
        let inserted = sqlx::query(&sql)
            .bind(old_name.as_str())
            .bind(new_name.as_str())
            .bind(&ordered)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        if inserted == shards.len() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(inserted)
    }

    async fn update_status(
        &self,
        new_name: &AccountName,
        shard: &ShardId,
        status: RenameStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE shard_rename_status
               SET status = $3, updated_at = now()
               WHERE id = (
                   SELECT MAX(id) FROM shard_rename_status
                   WHERE new_name = $1 AND shard = $2
               )"#,
        )
        .bind(new_name.as_str())
        .bind(shard.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await;
        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound(format!(
                "rename status {new_name}@{shard}"
            ))),
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(format!(
                "another operation holds {new_name}@{shard}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn statuses(
        &self,
        new_name: &AccountName,
        consistency: ReadConsistency,
    ) -> StoreResult<BTreeMap<ShardId, RenameStatus>> {
        let rows = self
            .status_rows(new_name, consistency)
            .await?
            .into_iter()
            .map(status_from_db)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(latest_per_shard(&rows))
    }

    async fn names_in_progress(
        &self,
        name: &AccountName,
    ) -> StoreResult<Option<(AccountName, AccountName)>> {
        let sql = format!(
            r#"SELECT old_name, new_name FROM shard_rename_status
               WHERE status IN {PENDING_STATUSES} AND (old_name = $1 OR new_name = $1)
               ORDER BY id
               LIMIT 1"#
        );
        let row: Option<(String, String)> = sqlx::query_as(&sql)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(old_name, new_name)| Ok((parse_name(&old_name)?, parse_name(&new_name)?)))
            .transpose()
    }

    async fn in_progress_renames(&self) -> StoreResult<Vec<RenameProgress>> {
        let sql = format!(
            r#"SELECT id, old_name, new_name, shard, status
               FROM shard_rename_status
               WHERE (old_name, new_name) IN (
                   SELECT old_name, new_name FROM shard_rename_status
                   WHERE status IN {PENDING_STATUSES}
               )
               ORDER BY id"#
        );
        let rows = sqlx::query_as::<_, DbStatus>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(status_from_db)
            .collect::<StoreResult<Vec<_>>>()?;

        let pairs: BTreeSet<(AccountName, AccountName)> = rows
            .iter()
            .map(|row| (row.old_name.clone(), row.new_name.clone()))
            .collect();
        Ok(pairs
            .into_iter()
            .map(|(old_name, new_name)| {
                let shards = latest_per_shard(
                    rows.iter()
                        .filter(|row| row.old_name == old_name && row.new_name == new_name),
                );
                RenameProgress {
                    old_name,
                    new_name,
                    shards,
                }
            })
            .collect())
    }

    async fn history(&self, new_name: &AccountName) -> StoreResult<Vec<ShardRenameStatus>> {
        self.status_rows(new_name, ReadConsistency::Latest)
            .await?
            .into_iter()
            .map(status_from_db)
            .collect()
    }
}

#[async_trait]
impl RenameRequestStore for PostgresStore {
    async fn create_request(
        &self,
        request: NewRenameRequest,
    ) -> StoreResult<PendingRenameRequest> {
        let inserted = sqlx::query_as::<_, DbRequest>(
            r#"INSERT INTO rename_requests (requester, requested_on, new_name, reason, status)
               VALUES ($1, $2, $3, $4, 'pending')
               RETURNING id, requester, requested_on, new_name, reason, status,
                         requested_at, performer, comment, completed_at"#,
        )
        .bind(request.requester.as_str())
        .bind(request.requested_on.as_str())
        .bind(request.new_name.as_str())
        .bind(&request.reason)
        .fetch_one(&self.pool)
        .await;
        match inserted {
            Ok(row) => request_from_db(row),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(format!(
                "a pending request already involves {} or {}@{}",
                request.new_name, request.requester, request.requested_on
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_request(&self, id: i64) -> StoreResult<PendingRenameRequest> {
        let row = sqlx::query_as::<_, DbRequest>(
            r#"SELECT id, requester, requested_on, new_name, reason, status,
                      requested_at, performer, comment, completed_at
               FROM rename_requests WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("rename request {id}")))?;
        request_from_db(row)
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> StoreResult<Vec<PendingRenameRequest>> {
        sqlx::query_as::<_, DbRequest>(
            r#"SELECT id, requester, requested_on, new_name, reason, status,
                      requested_at, performer, comment, completed_at
               FROM rename_requests
               WHERE $1::text IS NULL OR status = $1
               ORDER BY id"#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(request_from_db)
        .collect()
    }

    async fn decide_request(
        &self,
        id: i64,
        decision: RequestDecision,
    ) -> StoreResult<PendingRenameRequest> {
        let row = sqlx::query_as::<_, DbRequest>(
            r#"UPDATE rename_requests
               SET status = $2, performer = $3, comment = $4, completed_at = now()
               WHERE id = $1 AND status = 'pending'
               RETURNING id, requester, requested_on, new_name, reason, status,
                         requested_at, performer, comment, completed_at"#,
        )
        .bind(id)
        .bind(decision.status.as_str())
        .bind(decision.performer.as_str())
        .bind(&decision.comment)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => request_from_db(row),
            None => {
                let existing = self.get_request(id).await?;
                Err(StoreError::Conflict(format!(
                    "rename request {id} already {}",
                    existing.status.as_str()
                )))
            }
        }
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditEntry> {
        let row = sqlx::query_as::<_, DbAudit>(
            r#"INSERT INTO rename_audit_log (action, performer, old_name, new_name, reason, params)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, action, performer, old_name, new_name, reason, params, created_at"#,
        )
        .bind(entry.action.as_str())
        .bind(entry.performer.as_str())
        .bind(entry.old_name.as_str())
        .bind(entry.new_name.as_str())
        .bind(&entry.reason)
        .bind(&entry.params)
        .fetch_one(&self.pool)
        .await?;
        audit_from_db(row)
    }

    async fn audit_for(&self, name: &AccountName) -> StoreResult<Vec<AuditEntry>> {
        sqlx::query_as::<_, DbAudit>(
            r#"SELECT id, action, performer, old_name, new_name, reason, params, created_at
               FROM rename_audit_log
               WHERE old_name = $1 OR new_name = $1
               ORDER BY id"#,
        )
        .bind(name.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(audit_from_db)
        .collect()
    }

    async fn latest_operation(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
    ) -> StoreResult<Option<AuditEntry>> {
        sqlx::query_as::<_, DbAudit>(
            r#"SELECT id, action, performer, old_name, new_name, reason, params, created_at
               FROM rename_audit_log
               WHERE old_name = $1 AND new_name = $2 AND action IN ('rename', 'merge', 'abandon')
               ORDER BY id DESC
               LIMIT 1"#,
        )
        .bind(old_name.as_str())
        .bind(new_name.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(audit_from_db)
        .transpose()
    }
}

#[async_trait]
impl FederationStore for PostgresStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn parse_name(value: &str) -> StoreResult<AccountName> {
    AccountName::parse(value)
        .map_err(|err| StoreError::Unexpected(anyhow!("stored account name {value:?}: {err}")))
}

fn parse_shard(value: &str) -> StoreResult<ShardId> {
    ShardId::new(value)
        .map_err(|err| StoreError::Unexpected(anyhow!("stored shard id {value:?}: {err}")))
}

fn status_from_db(row: DbStatus) -> StoreResult<ShardRenameStatus> {
    Ok(ShardRenameStatus {
        id: row.id,
        old_name: parse_name(&row.old_name)?,
        new_name: parse_name(&row.new_name)?,
        shard: parse_shard(&row.shard)?,
        status: RenameStatus::from_str(&row.status).map_err(|err| {
            StoreError::Unexpected(anyhow!("stored rename status {:?}: {err}", row.status))
        })?,
    })
}

fn request_from_db(row: DbRequest) -> StoreResult<PendingRenameRequest> {
    Ok(PendingRenameRequest {
        id: row.id,
        requester: parse_name(&row.requester)?,
        requested_on: parse_shard(&row.requested_on)?,
        new_name: parse_name(&row.new_name)?,
        reason: row.reason,
        status: RequestStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Unexpected(anyhow!("stored request status {:?}", row.status))
        })?,
        requested_at: row.requested_at,
        performer: row.performer.as_deref().map(parse_name).transpose()?,
        comment: row.comment,
        completed_at: row.completed_at,
    })
}

fn audit_from_db(row: DbAudit) -> StoreResult<AuditEntry> {
    Ok(AuditEntry {
        id: row.id,
        action: AuditAction::parse(&row.action)
            .ok_or_else(|| StoreError::Unexpected(anyhow!("stored audit action {:?}", row.action)))?,
        performer: parse_name(&row.performer)?,
        old_name: parse_name(&row.old_name)?,
        new_name: parse_name(&row.new_name)?,
        reason: row.reason,
        params: row.params,
        created_at: row.created_at,
    })
}
