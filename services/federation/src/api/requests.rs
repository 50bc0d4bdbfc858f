//! Self-service rename request handlers.
//!
//! # Purpose
//! Lets users ask for a new name and lets an approver accept or reject the
//! request. Approval starts the rename through the orchestrator.
use crate::api::error::{ApiError, api_validation_error};
use crate::api::types::{
    ApprovalResponse, RenameRequestCreate, RenameRequestList, RenameRequestQuery,
    RenameRequestView, RequestDecisionBody,
};
use crate::api::{parse_account, parse_shard};
use crate::app::AppState;
use crate::model::RequestStatus;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

#[utoipa::path(
    post,
    path = "/v1/rename-requests",
    tag = "rename-requests",
    request_body = RenameRequestCreate,
    responses(
        (status = 201, description = "Request queued for approval", body = RenameRequestView),
        (status = 400, description = "Requested name is not usable", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Name taken or a request is already pending", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<RenameRequestCreate>,
) -> Result<(StatusCode, Json<RenameRequestView>), ApiError> {
    let requester = parse_account("requester", &body.requester)?;
    let requested_on = parse_shard("requested_on", &body.requested_on)?;
    let request = state
        .requests
        .submit(requester, requested_on, &body.new_name, body.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

#[utoipa::path(
    get,
    path = "/v1/rename-requests",
    tag = "rename-requests",
    params(RenameRequestQuery),
    responses(
        (status = 200, description = "Rename requests, oldest first", body = RenameRequestList),
        (status = 400, description = "Unknown status filter", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<RenameRequestQuery>,
) -> Result<Json<RenameRequestList>, ApiError> {
    let status = match query.status.as_deref() {
        Some(value) => Some(
            RequestStatus::parse(value)
                .ok_or_else(|| api_validation_error("status must be pending, approved or rejected"))?,
        ),
        None => None,
    };
    let items = state.requests.list(status).await?;
    Ok(Json(RenameRequestList {
        items: items.into_iter().map(RenameRequestView::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/rename-requests/{id}",
    tag = "rename-requests",
    params(
        ("id" = i64, Path, description = "Request id")
    ),
    responses(
        (status = 200, description = "Rename request", body = RenameRequestView),
        (status = 404, description = "Request not found", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RenameRequestView>, ApiError> {
    Ok(Json(state.requests.get(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/v1/rename-requests/{id}/approve",
    tag = "rename-requests",
    request_body = RequestDecisionBody,
    params(
        ("id" = i64, Path, description = "Request id")
    ),
    responses(
        (status = 202, description = "Request approved and rename queued", body = ApprovalResponse),
        (status = 404, description = "Request not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Request already decided or rename in progress", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RequestDecisionBody>,
) -> Result<(StatusCode, Json<ApprovalResponse>), ApiError> {
    let performer = parse_account("performer", &body.performer)?;
    let (request, ticket) = state
        .requests
        .approve(id, performer, body.comment)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApprovalResponse {
            request: request.into(),
            rename: ticket.into(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/rename-requests/{id}/reject",
    tag = "rename-requests",
    request_body = RequestDecisionBody,
    params(
        ("id" = i64, Path, description = "Request id")
    ),
    responses(
        (status = 200, description = "Request rejected", body = RenameRequestView),
        (status = 404, description = "Request not found", body = crate::api::types::ErrorResponse),
        (status = 409, description = "Request already decided", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn reject_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RequestDecisionBody>,
) -> Result<Json<RenameRequestView>, ApiError> {
    let performer = parse_account("performer", &body.performer)?;
    let request = state.requests.reject(id, performer, body.comment).await?;
    Ok(Json(request.into()))
}
