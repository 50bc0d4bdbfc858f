//! Human-approval rename requests.
//!
//! # Purpose
//! Records self-service rename requests and their single, terminal decision.
//! Rows are never deleted so they double as an audit trail.
use chrono::{DateTime, Utc};
use concord_common::{AccountName, ShardId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRenameRequest {
    pub id: i64,
    pub requester: AccountName,
    pub requested_on: ShardId,
    pub new_name: AccountName,
    pub reason: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub performer: Option<AccountName>,
    pub comment: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRenameRequest {
    pub requester: AccountName,
    pub requested_on: ShardId,
    pub new_name: AccountName,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDecision {
    pub status: RequestStatus,
    pub performer: AccountName,
    pub comment: String,
}
