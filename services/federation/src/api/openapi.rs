//! OpenAPI schema aggregation for the federation API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document for docs
//! and client generation.
use crate::api::{
    renames, requests, system,
    types::{
        ApprovalResponse, ErrorResponse, HealthStatus, MergeAccepted, RenameAccepted,
        RenameListResponse, RenameOptionsBody, RenameProgressItem, RenameRequestCreate,
        RenameRequestList, RenameRequestView, RenameStatusResponse, RequestDecisionBody,
        ResumeRequest, ResumeResponse, StartRenameRequest, SystemInfo,
    },
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "concord-federation",
        version = "v1",
        description = "Cross-shard global account rename and merge API"
    ),
    paths(
        system::system_info,
        system::system_health,
        renames::start_rename,
        renames::start_merge,
        renames::list_renames,
        renames::rename_status,
        renames::resume_rename,
        requests::submit_request,
        requests::list_requests,
        requests::get_request,
        requests::approve_request,
        requests::reject_request
    ),
    components(schemas(
        SystemInfo,
        HealthStatus,
        ErrorResponse,
        RenameOptionsBody,
        StartRenameRequest,
        RenameAccepted,
        MergeAccepted,
        RenameProgressItem,
        RenameListResponse,
        RenameStatusResponse,
        ResumeRequest,
        ResumeResponse,
        RenameRequestCreate,
        RenameRequestView,
        RenameRequestList,
        RequestDecisionBody,
        ApprovalResponse
    )),
    tags(
        (name = "system", description = "Service metadata and health"),
        (name = "renames", description = "Global renames, merges and their per-shard progress"),
        (name = "rename-requests", description = "Self-service rename requests awaiting approval")
    )
)]
pub struct ApiDoc;
