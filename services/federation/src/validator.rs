//! Pre-flight checks for renames and merges.
//!
//! # Purpose
//! Runs every check that can be answered without taking a claim, so a request
//! that is certain to fail is rejected before any row is written.
//!
//! # Notes
//! Passing validation does not reserve anything. Two racing requests can both
//! pass and only the claim decides between them.
use crate::registry::{IdentityRegistry, RegistryError};
use concord_common::{AccountName, ShardId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{name} cannot be used as a new account name: {reason}")]
    InvalidNewName { name: AccountName, reason: String },
    #[error("old and new name are both {0}")]
    SameName(AccountName),
    #[error("global identity {0} does not exist")]
    OldIdentityMissing(AccountName),
    #[error("global identity {0} already exists")]
    NewIdentityExists(AccountName),
    #[error("merge target {0} does not exist")]
    NewIdentityMissing(AccountName),
    #[error("unattached local accounts named {name} exist on {shards:?}")]
    UnattachedConflict { name: AccountName, shards: Vec<ShardId> },
    #[error("a rename or merge involving {0} is already in progress")]
    RenameInProgress(AccountName),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ValidationError {
    /// Stable machine-readable code returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidNewName { .. } => "invalid_new_name",
            ValidationError::SameName(_) => "same_name",
            ValidationError::OldIdentityMissing(_) => "old_identity_missing",
            ValidationError::NewIdentityExists(_) => "new_identity_exists",
            ValidationError::NewIdentityMissing(_) => "new_identity_missing",
            ValidationError::UnattachedConflict { .. } => "unattached_conflict",
            ValidationError::RenameInProgress(_) => "rename_in_progress",
            ValidationError::Registry(_) => "internal",
        }
    }
}

#[derive(Clone)]
pub struct Validator {
    registry: Arc<dyn IdentityRegistry>,
}

impl Validator {
    pub fn new(registry: Arc<dyn IdentityRegistry>) -> Self {
        Self { registry }
    }

    pub async fn validate(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
    ) -> Result<(), ValidationError> {
        if !new_name.is_creatable() {
            return Err(ValidationError::InvalidNewName {
                name: new_name.clone(),
                reason: "contains characters not allowed in new accounts".to_string(),
            });
        }
        if old_name == new_name {
            return Err(ValidationError::SameName(new_name.clone()));
        }
        if self.registry.identity(old_name).await?.is_none() {
            return Err(ValidationError::OldIdentityMissing(old_name.clone()));
        }
        if self.registry.identity(new_name).await?.is_some() {
            return Err(ValidationError::NewIdentityExists(new_name.clone()));
        }
        let unattached = self.registry.unattached_shards(new_name).await?;
        if !unattached.is_empty() {
            return Err(ValidationError::UnattachedConflict {
                name: new_name.clone(),
                shards: unattached.into_iter().collect(),
            });
        }
        self.ensure_idle(old_name).await?;
        self.ensure_idle(new_name).await
    }

    pub async fn validate_merge(
        &self,
        old_name: &AccountName,
        new_name: &AccountName,
    ) -> Result<(), ValidationError> {
        if old_name == new_name {
            return Err(ValidationError::SameName(new_name.clone()));
        }
        let Some(old) = self.registry.identity(old_name).await? else {
            return Err(ValidationError::OldIdentityMissing(old_name.clone()));
        };
        if self.registry.identity(new_name).await?.is_none() {
            return Err(ValidationError::NewIdentityMissing(new_name.clone()));
        }
        // Only shards where the old account gets renamed can be blocked.
        let blocking: Vec<ShardId> = self
            .registry
            .unattached_shards(new_name)
            .await?
            .into_iter()
            .filter(|shard| old.attached.contains(shard))
            .collect();
        if !blocking.is_empty() {
            return Err(ValidationError::UnattachedConflict {
                name: new_name.clone(),
                shards: blocking,
            });
        }
        self.ensure_idle(old_name).await?;
        self.ensure_idle(new_name).await
    }

    async fn ensure_idle(&self, name: &AccountName) -> Result<(), ValidationError> {
        if self.registry.rename_in_progress(name).await? {
            return Err(ValidationError::RenameInProgress(name.clone()));
        }
        Ok(())
    }
}
