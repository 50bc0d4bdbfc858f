//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the JSON shapes of the federation REST API and their OpenAPI
//! schemas. Names and shard ids travel as plain strings and are validated by the
//! handlers.
use crate::model::{PendingRenameRequest, RenameOptions, RenameProgress};
use crate::orchestrator::{MergeTicket, RenameTicket};
use crate::recovery::ResumeTicket;
use chrono::{DateTime, Utc};
use concord_common::{RenameStatus, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    pub service: String,
    pub api_version: String,
    pub storage_backend: String,
    pub durable_storage: bool,
    pub shards: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameOptionsBody {
    #[serde(default)]
    pub move_local_pages: bool,
    #[serde(default)]
    pub suppress_redirects: bool,
    #[serde(default)]
    pub promote_to_global: bool,
    /// Attachment method per shard id, used with `promote_to_global`.
    #[serde(default)]
    pub reattach_info_by_shard: BTreeMap<String, String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct StartRenameRequest {
    pub old_name: String,
    pub new_name: String,
    pub performer: String,
    #[serde(default)]
    pub options: RenameOptionsBody,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameAccepted {
    pub old_name: String,
    pub new_name: String,
    pub shards: Vec<String>,
    pub first_job: Option<String>,
}

impl From<RenameTicket> for RenameAccepted {
    fn from(ticket: RenameTicket) -> Self {
        Self {
            old_name: ticket.old_name.to_string(),
            new_name: ticket.new_name.to_string(),
            shards: shard_strings(&ticket.shards),
            first_job: ticket.first_job.map(|job| job.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MergeAccepted {
    pub old_name: String,
    pub new_name: String,
    pub merge_shards: Vec<String>,
    pub rename_shards: Vec<String>,
    pub jobs: Vec<String>,
}

impl From<MergeTicket> for MergeAccepted {
    fn from(ticket: MergeTicket) -> Self {
        Self {
            old_name: ticket.old_name.to_string(),
            new_name: ticket.new_name.to_string(),
            merge_shards: shard_strings(&ticket.merge_shards),
            rename_shards: shard_strings(&ticket.rename_shards),
            jobs: ticket.jobs.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameProgressItem {
    pub old_name: String,
    pub new_name: String,
    /// Shard id to `queued`, `inprogress`, `done` or `failed`.
    pub shards: BTreeMap<String, String>,
}

impl From<RenameProgress> for RenameProgressItem {
    fn from(progress: RenameProgress) -> Self {
        Self {
            old_name: progress.old_name.to_string(),
            new_name: progress.new_name.to_string(),
            shards: status_strings(&progress.shards),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameListResponse {
    pub items: Vec<RenameProgressItem>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameStatusResponse {
    pub new_name: String,
    pub shards: BTreeMap<String, String>,
    /// Every shard is `done`.
    pub complete: bool,
    /// Shards needing operator attention.
    pub failed: Vec<String>,
}

impl RenameStatusResponse {
    pub fn new(new_name: String, statuses: &BTreeMap<ShardId, RenameStatus>) -> Self {
        Self {
            new_name,
            shards: status_strings(statuses),
            complete: statuses.values().all(|status| *status == RenameStatus::Done),
            failed: statuses
                .iter()
                .filter(|(_, status)| **status == RenameStatus::Failed)
                .map(|(shard, _)| shard.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ResumeRequest {
    pub performer: String,
    /// Shard to resume; defaults to the first unfinished one.
    #[serde(default)]
    pub shard: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ResumeResponse {
    pub new_name: String,
    pub shard: String,
    pub kind: String,
    pub previous: String,
    pub job: String,
}

impl From<ResumeTicket> for ResumeResponse {
    fn from(ticket: ResumeTicket) -> Self {
        Self {
            new_name: ticket.new_name.to_string(),
            shard: ticket.shard.to_string(),
            kind: ticket.kind.as_str().to_string(),
            previous: ticket.previous.as_str().to_string(),
            job: ticket.job.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameRequestCreate {
    pub requester: String,
    pub requested_on: String,
    pub new_name: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameRequestView {
    pub id: i64,
    pub requester: String,
    pub requested_on: String,
    pub new_name: String,
    pub reason: String,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub performer: Option<String>,
    pub comment: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PendingRenameRequest> for RenameRequestView {
    fn from(request: PendingRenameRequest) -> Self {
        Self {
            id: request.id,
            requester: request.requester.to_string(),
            requested_on: request.requested_on.to_string(),
            new_name: request.new_name.to_string(),
            reason: request.reason,
            status: request.status.as_str().to_string(),
            requested_at: request.requested_at,
            performer: request.performer.map(|name| name.to_string()),
            comment: request.comment,
            completed_at: request.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RenameRequestList {
    pub items: Vec<RenameRequestView>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RenameRequestQuery {
    /// `pending`, `approved` or `rejected`.
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RequestDecisionBody {
    pub performer: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ApprovalResponse {
    pub request: RenameRequestView,
    pub rename: RenameAccepted,
}

fn shard_strings(shards: &[ShardId]) -> Vec<String> {
    shards.iter().map(ToString::to_string).collect()
}

fn status_strings(statuses: &BTreeMap<ShardId, RenameStatus>) -> BTreeMap<String, String> {
    statuses
        .iter()
        .map(|(shard, status)| (shard.to_string(), status.as_str().to_string()))
        .collect()
}

/// Convert API options into domain options, validating shard ids.
pub(crate) fn options_from_body(
    body: RenameOptionsBody,
) -> Result<RenameOptions, concord_common::Error> {
    let reattach_info_by_shard = body
        .reattach_info_by_shard
        .into_iter()
        .map(|(shard, method)| Ok((ShardId::new(shard)?, method)))
        .collect::<Result<_, concord_common::Error>>()?;
    Ok(RenameOptions {
        move_local_pages: body.move_local_pages,
        suppress_redirects: body.suppress_redirects,
        promote_to_global: body.promote_to_global,
        reattach_info_by_shard,
        reason: body.reason,
    })
}
