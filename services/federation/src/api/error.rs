//! API error types and helpers.
//!
//! # Purpose
//! Keeps error shapes uniform across the federation endpoints and maps the
//! rename, recovery and approval errors onto HTTP statuses.
//!
//! # Notes
//! - Every error body carries a stable `code` and a human-readable `message`.
//! - Internal errors are logged server-side and returned with a generic message.
use crate::api::types::ErrorResponse;
use crate::approval::ApprovalError;
use crate::orchestrator::RenameError;
use crate::recovery::RecoveryError;
use crate::registry::RegistryError;
use crate::store::StoreError;
use crate::validator::ValidationError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// `status` must match the semantics of `body.code`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// Build a 404 Not Found error.
pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 409 Conflict error with a caller-provided code.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, code, message)
}

/// Build a 400 Bad Request error with a caller-provided code.
pub fn api_bad_request(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, code, message)
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: &str) -> ApiError {
    api_bad_request("validation_error", message)
}

/// Build a 500 Internal Server Error from a store error.
///
/// Logs the store error and returns a generic internal error response.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "federation storage error");
    api_internal_message(message)
}

/// Build a 500 Internal Server Error without a store error.
pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

fn from_store_error(message: &str, err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(what) => api_not_found(&what),
        StoreError::Conflict(what) => api_conflict("conflict", &what),
        other => api_internal(message, &other),
    }
}

fn from_registry_error(err: RegistryError) -> ApiError {
    match err {
        RegistryError::Store(err) => from_store_error("identity registry unavailable", err),
        other => {
            tracing::error!(error = %other, "identity registry error");
            api_internal_message("identity registry failed")
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RenameInProgress(_) => {
                api_conflict(err.code(), &err.to_string())
            }
            ValidationError::Registry(err) => from_registry_error(err),
            other => api_bad_request(other.code(), &other.to_string()),
        }
    }
}

impl From<RenameError> for ApiError {
    fn from(err: RenameError) -> Self {
        match err {
            RenameError::Validation(err) => err.into(),
            RenameError::AlreadyInProgress(_) => {
                api_conflict("rename_in_progress", &err.to_string())
            }
            RenameError::Store(err) => from_store_error("rename could not be recorded", err),
            RenameError::Registry(err) => from_registry_error(err),
            other => {
                tracing::error!(error = %other, "rename could not be started");
                api_internal_message("rename could not be started")
            }
        }
    }
}

impl From<RecoveryError> for ApiError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::NothingToResume(_) | RecoveryError::AlreadyDone { .. } => {
                api_conflict("nothing_to_resume", &err.to_string())
            }
            RecoveryError::UnknownShard { .. } | RecoveryError::NoOperation { .. } => {
                api_not_found(&err.to_string())
            }
            RecoveryError::Abandoned { .. } => api_conflict("claim_abandoned", &err.to_string()),
            RecoveryError::Store(err) => from_store_error("resume could not be recorded", err),
            other => {
                tracing::error!(error = %other, "resume failed");
                api_internal_message("resume failed")
            }
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::InvalidName(_) => api_bad_request("invalid_new_name", &err.to_string()),
            ApprovalError::NameTaken(_) => api_conflict("name_taken", &err.to_string()),
            ApprovalError::AlreadyDecided(_) => {
                api_conflict("already_decided", &err.to_string())
            }
            ApprovalError::Rename(err) => err.into(),
            ApprovalError::Registry(err) => from_registry_error(err),
            ApprovalError::Store(StoreError::Conflict(what)) => {
                api_conflict("duplicate_request", &what)
            }
            ApprovalError::Store(err) => from_store_error("rename request store failed", err),
        }
    }
}
