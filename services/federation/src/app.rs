//! Federation HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and testable.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::approval::RenameRequestService;
use crate::observability;
use crate::orchestrator::RenameOrchestrator;
use crate::recovery::RecoveryService;
use crate::registry::IdentityRegistry;
use crate::store::FederationStore;
use axum::Router;
use concord_common::ShardId;
use concord_queue::JobQueue;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub api_version: String,
    pub shards: Vec<ShardId>,
    pub store: Arc<dyn FederationStore>,
    pub orchestrator: RenameOrchestrator,
    pub recovery: RecoveryService,
    pub requests: RenameRequestService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn FederationStore>,
        registry: Arc<dyn IdentityRegistry>,
        queue: Arc<dyn JobQueue>,
        shards: Vec<ShardId>,
    ) -> Self {
        let orchestrator = RenameOrchestrator::new(store.clone(), registry.clone(), queue.clone());
        Self {
            api_version: "v1".to_string(),
            shards,
            recovery: RecoveryService::new(store.clone(), queue),
            requests: RenameRequestService::new(store.clone(), registry, orchestrator.clone()),
            orchestrator,
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/v1/system/info",
            axum::routing::get(api::system::system_info),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/v1/renames",
            axum::routing::get(api::renames::list_renames).post(api::renames::start_rename),
        )
        .route("/v1/merges", axum::routing::post(api::renames::start_merge))
        .route(
            "/v1/renames/:new_name/status",
            axum::routing::get(api::renames::rename_status),
        )
        .route(
            "/v1/renames/:new_name/resume",
            axum::routing::post(api::renames::resume_rename),
        )
        .route(
            "/v1/rename-requests",
            axum::routing::get(api::requests::list_requests).post(api::requests::submit_request),
        )
        .route(
            "/v1/rename-requests/:id",
            axum::routing::get(api::requests::get_request),
        )
        .route(
            "/v1/rename-requests/:id/approve",
            axum::routing::post(api::requests::approve_request),
        )
        .route(
            "/v1/rename-requests/:id/reject",
            axum::routing::post(api::requests::reject_request),
        )
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
