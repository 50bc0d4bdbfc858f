//! Rename, merge and progress handlers.
//!
//! # Purpose
//! Starts global renames and merges, reports per-shard progress and lets an
//! operator resume a stalled shard.
//!
//! # Notes
//! Starting an operation returns `202 Accepted` once the claim is held and the
//! first job of each chain is queued. Progress is read from the status rows.
use crate::api::error::{ApiError, api_bad_request, api_internal, api_not_found};
use crate::api::types::{
    MergeAccepted, RenameAccepted, RenameListResponse, RenameProgressItem, RenameStatusResponse,
    ResumeRequest, ResumeResponse, StartRenameRequest, options_from_body,
};
use crate::api::{parse_account, parse_shard};
use crate::app::AppState;
use crate::model::{MergeRequest, ReadConsistency, RenameOptions, RenameRequest};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use concord_common::AccountName;

struct Parsed {
    old_name: AccountName,
    new_name: AccountName,
    performer: AccountName,
    options: RenameOptions,
}

fn parse_start(body: StartRenameRequest) -> Result<Parsed, ApiError> {
    let options = options_from_body(body.options)
        .map_err(|err| api_bad_request("invalid_shard", &format!("options: {err}")))?;
    Ok(Parsed {
        old_name: parse_account("old_name", &body.old_name)?,
        new_name: parse_account("new_name", &body.new_name)?,
        performer: parse_account("performer", &body.performer)?,
        options,
    })
}

#[utoipa::path(
    post,
    path = "/v1/renames",
    tag = "renames",
    request_body = StartRenameRequest,
    responses(
        (status = 202, description = "Rename claimed and queued", body = RenameAccepted),
        (status = 400, description = "Rename failed validation", body = crate::api::types::ErrorResponse),
        (status = 409, description = "A rename involving either name is in progress", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn start_rename(
    State(state): State<AppState>,
    Json(body): Json<StartRenameRequest>,
) -> Result<(StatusCode, Json<RenameAccepted>), ApiError> {
    let parsed = parse_start(body)?;
    let ticket = state
        .orchestrator
        .rename(RenameRequest {
            old_name: parsed.old_name,
            new_name: parsed.new_name,
            performer: parsed.performer,
            options: parsed.options,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}

#[utoipa::path(
    post,
    path = "/v1/merges",
    tag = "renames",
    request_body = StartRenameRequest,
    responses(
        (status = 202, description = "Merge claimed and queued", body = MergeAccepted),
        (status = 400, description = "Merge failed validation", body = crate::api::types::ErrorResponse),
        (status = 409, description = "A rename involving either name is in progress", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn start_merge(
    State(state): State<AppState>,
    Json(body): Json<StartRenameRequest>,
) -> Result<(StatusCode, Json<MergeAccepted>), ApiError> {
    let parsed = parse_start(body)?;
    let ticket = state
        .orchestrator
        .merge(MergeRequest {
            old_name: parsed.old_name,
            new_name: parsed.new_name,
            performer: parsed.performer,
            options: parsed.options,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}

#[utoipa::path(
    get,
    path = "/v1/renames",
    tag = "renames",
    responses(
        (status = 200, description = "Renames and merges with unfinished shards", body = RenameListResponse)
    )
)]
pub(crate) async fn list_renames(
    State(state): State<AppState>,
) -> Result<Json<RenameListResponse>, ApiError> {
    let items = state
        .store
        .in_progress_renames()
        .await
        .map_err(|err| api_internal("failed to list renames", &err))?;
    metrics::gauge!("concord_renames_in_progress").set(items.len() as f64);
    Ok(Json(RenameListResponse {
        items: items.into_iter().map(RenameProgressItem::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/renames/{new_name}/status",
    tag = "renames",
    params(
        ("new_name" = String, Path, description = "Target name of the rename or merge")
    ),
    responses(
        (status = 200, description = "Latest status per shard", body = RenameStatusResponse),
        (status = 404, description = "No rename recorded for this name", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn rename_status(
    State(state): State<AppState>,
    Path(new_name): Path<String>,
) -> Result<Json<RenameStatusResponse>, ApiError> {
    let name = parse_account("new_name", &new_name)?;
    let statuses = state
        .store
        .statuses(&name, ReadConsistency::Latest)
        .await
        .map_err(|err| api_internal("failed to read rename status", &err))?;
    if statuses.is_empty() {
        return Err(api_not_found("no rename recorded for this name"));
    }
    Ok(Json(RenameStatusResponse::new(name.to_string(), &statuses)))
}

#[utoipa::path(
    post,
    path = "/v1/renames/{new_name}/resume",
    tag = "renames",
    request_body = ResumeRequest,
    params(
        ("new_name" = String, Path, description = "Target name of the rename or merge")
    ),
    responses(
        (status = 202, description = "Shard job re-enqueued", body = ResumeResponse),
        (status = 404, description = "No operation or shard row to resume", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Nothing left to resume", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn resume_rename(
    State(state): State<AppState>,
    Path(new_name): Path<String>,
    Json(body): Json<ResumeRequest>,
) -> Result<(StatusCode, Json<ResumeResponse>), ApiError> {
    let name = parse_account("new_name", &new_name)?;
    let performer = parse_account("performer", &body.performer)?;
    let shard = body
        .shard
        .as_deref()
        .map(|shard| parse_shard("shard", shard))
        .transpose()?;
    let ticket = state
        .recovery
        .resume(&name, shard.as_ref(), &performer)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}
