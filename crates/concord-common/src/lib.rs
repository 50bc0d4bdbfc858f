// Shared identifiers and naming rules used across the concord crates.
use serde::{Deserialize, Serialize};

pub mod ids;
pub mod names;
pub mod pages;

pub use ids::ShardId;
pub use names::AccountName;
pub use pages::{PageNamespace, PageTitle};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid account name: {name:?} ({reason})")]
    InvalidName { name: String, reason: &'static str },
    #[error("invalid page title: {0}")]
    InvalidTitle(String),
}

/// Terminal and non-terminal states of one shard's part in a rename or merge.
///
/// ```
/// use concord_common::RenameStatus;
///
/// assert!(RenameStatus::Queued.is_pending());
/// assert!(RenameStatus::Failed.is_terminal());
/// assert_eq!("inprogress".parse::<RenameStatus>().unwrap(), RenameStatus::InProgress);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameStatus {
    Queued,
    #[serde(rename = "inprogress")]
    InProgress,
    Done,
    Failed,
}

impl RenameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenameStatus::Queued => "queued",
            RenameStatus::InProgress => "inprogress",
            RenameStatus::Done => "done",
            RenameStatus::Failed => "failed",
        }
    }

    /// Queued and in-progress rows block any new claim for the same target.
    pub fn is_pending(&self) -> bool {
        matches!(self, RenameStatus::Queued | RenameStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

impl std::fmt::Display for RenameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RenameStatus {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "queued" => Ok(RenameStatus::Queued),
            "inprogress" => Ok(RenameStatus::InProgress),
            "done" => Ok(RenameStatus::Done),
            "failed" => Ok(RenameStatus::Failed),
            other => Err(Error::InvalidId(format!("rename status {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RenameStatus;

    #[test]
    fn status_round_trips_through_serde_and_str() {
        for status in [
            RenameStatus::Queued,
            RenameStatus::InProgress,
            RenameStatus::Done,
            RenameStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).expect("serialize");
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<RenameStatus>().expect("parse"), status);
        }
    }

    #[test]
    fn only_queued_and_in_progress_are_pending() {
        assert!(RenameStatus::Queued.is_pending());
        assert!(RenameStatus::InProgress.is_pending());
        assert!(!RenameStatus::Done.is_pending());
        assert!(!RenameStatus::Failed.is_pending());
    }
}
