//! Federation data model.
//!
//! # Purpose
//! Re-exports the status rows, rename/merge requests, approval-queue records and
//! audit entries shared by the store, the job family and the HTTP API.
mod audit;
mod identity;
mod pending;
mod request;
mod status;

pub use audit::{AuditAction, AuditEntry, NewAuditEntry, OperationParams};
pub use identity::GlobalIdentity;
pub use pending::{NewRenameRequest, PendingRenameRequest, RequestDecision, RequestStatus};
pub use request::{MergeRequest, RenameOptions, RenameRequest};
pub use status::{ReadConsistency, RenameProgress, ShardRenameStatus};

pub use concord_common::RenameStatus;
