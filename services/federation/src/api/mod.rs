//! Federation HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules and the shared helpers that turn raw path and
//! body strings into validated names and shard ids.
pub mod error;
pub mod openapi;
pub mod renames;
pub mod requests;
pub mod system;
pub mod types;

use crate::api::error::{ApiError, api_bad_request};
use concord_common::{AccountName, ShardId};

pub(crate) fn parse_account(field: &str, value: &str) -> Result<AccountName, ApiError> {
    AccountName::parse(value)
        .map_err(|err| api_bad_request("invalid_name", &format!("{field}: {err}")))
}

pub(crate) fn parse_shard(field: &str, value: &str) -> Result<ShardId, ApiError> {
    ShardId::new(value).map_err(|err| api_bad_request("invalid_shard", &format!("{field}: {err}")))
}
