//! In-memory registry used by tests and the single-process binary.
//!
//! Identities and the local-name index live behind one `RwLock` so a name
//! rewrite moves the global row and its index rows together.
use super::{IdentityRegistry, RegistryError, RegistryResult};
use crate::model::GlobalIdentity;
use crate::store::FederationStore;
use async_trait::async_trait;
use concord_common::{AccountName, ShardId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct IdentityRecord {
    id: u64,
    attached: BTreeMap<ShardId, String>,
    home_shard: Option<ShardId>,
    locked: bool,
    hidden: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    identities: BTreeMap<AccountName, IdentityRecord>,
    // Which shards hold a local account under each name.
    local_names: BTreeMap<AccountName, BTreeSet<ShardId>>,
    invalidations: BTreeMap<AccountName, u64>,
}

pub struct InMemoryRegistry {
    store: Arc<dyn FederationStore>,
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new(store: Arc<dyn FederationStore>) -> Self {
        Self {
            store,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Create an identity attached to `shards`; the first shard becomes its home.
    pub async fn create_identity(
        &self,
        name: &AccountName,
        shards: impl IntoIterator<Item = ShardId>,
    ) -> RegistryResult<GlobalIdentity> {
        let mut state = self.state.write().await;
        if state.identities.contains_key(name) {
            return Err(RegistryError::Conflict(format!("identity {name} exists")));
        }
        state.next_id += 1;
        let attached: BTreeMap<ShardId, String> = shards
            .into_iter()
            .map(|shard| (shard, "login".to_string()))
            .collect();
        let record = IdentityRecord {
            id: state.next_id,
            home_shard: attached.keys().next().cloned(),
            attached,
            locked: false,
            hidden: false,
        };
        let index = state.local_names.entry(name.clone()).or_default();
        index.extend(record.attached.keys().cloned());
        state.identities.insert(name.clone(), record.clone());
        Ok(to_identity(name, &record))
    }

    /// Record a local account that is not attached to any identity.
    pub async fn register_local(&self, name: &AccountName, shard: &ShardId) {
        self.state
            .write()
            .await
            .local_names
            .entry(name.clone())
            .or_default()
            .insert(shard.clone());
    }

    pub async fn set_locked(&self, name: &AccountName, locked: bool) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .identities
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.locked = locked;
        Ok(())
    }

    /// How the local account on `shard` was attached, if it is.
    pub async fn attachment_method(&self, name: &AccountName, shard: &ShardId) -> Option<String> {
        self.state
            .read()
            .await
            .identities
            .get(name)
            .and_then(|record| record.attached.get(shard).cloned())
    }

    /// Number of cache invalidations issued for `name`.
    pub async fn invalidations(&self, name: &AccountName) -> u64 {
        self.state
            .read()
            .await
            .invalidations
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

fn to_identity(name: &AccountName, record: &IdentityRecord) -> GlobalIdentity {
    GlobalIdentity {
        id: record.id,
        name: name.clone(),
        attached: record.attached.keys().cloned().collect(),
        home_shard: record.home_shard.clone(),
        locked: record.locked,
        hidden: record.hidden,
    }
}

#[async_trait]
impl IdentityRegistry for InMemoryRegistry {
    async fn identity(&self, name: &AccountName) -> RegistryResult<Option<GlobalIdentity>> {
        Ok(self
            .state
            .read()
            .await
            .identities
            .get(name)
            .map(|record| to_identity(name, record)))
    }

    async fn attached_shards(&self, name: &AccountName) -> RegistryResult<BTreeSet<ShardId>> {
        Ok(self
            .state
            .read()
            .await
            .identities
            .get(name)
            .map(|record| record.attached.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn unattached_shards(&self, name: &AccountName) -> RegistryResult<BTreeSet<ShardId>> {
        let state = self.state.read().await;
        let Some(local) = state.local_names.get(name) else {
            return Ok(BTreeSet::new());
        };
        Ok(match state.identities.get(name) {
            Some(record) => local
                .iter()
                .filter(|shard| !record.attached.contains_key(*shard))
                .cloned()
                .collect(),
            None => local.clone(),
        })
    }

    async fn attach(
        &self,
        name: &AccountName,
        shard: &ShardId,
        method: &str,
    ) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .identities
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.attached.insert(shard.clone(), method.to_string());
        if record.home_shard.is_none() {
            record.home_shard = Some(shard.clone());
        }
        state
            .local_names
            .entry(name.clone())
            .or_default()
            .insert(shard.clone());
        debug!(identity = %name, shard = %shard, method, "attached local account");
        Ok(())
    }

    async fn detach(&self, name: &AccountName, shard: &ShardId) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .identities
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.attached.remove(shard);
        if record.home_shard.as_ref() == Some(shard) {
            record.home_shard = record.attached.keys().next().cloned();
        }
        if let Some(local) = state.local_names.get_mut(name) {
            local.remove(shard);
        }
        debug!(identity = %name, shard = %shard, "detached local account");
        Ok(())
    }

    async fn rewrite_name(&self, old: &AccountName, new: &AccountName) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        if state.identities.contains_key(new) {
            return Err(RegistryError::Conflict(format!("identity {new} exists")));
        }
        let record = state
            .identities
            .remove(old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;

        // Only attached accounts follow the identity; unattached ones keep the old name.
        let mut moved = BTreeSet::new();
        let mut emptied = false;
        if let Some(local) = state.local_names.get_mut(old) {
            for shard in record.attached.keys() {
                if local.remove(shard) {
                    moved.insert(shard.clone());
                }
            }
            emptied = local.is_empty();
        }
        if emptied {
            state.local_names.remove(old);
        }
        state
            .local_names
            .entry(new.clone())
            .or_default()
            .extend(moved);
        state.identities.insert(new.clone(), record);
        info!(old = %old, new = %new, "rewrote global identity name");
        Ok(())
    }

    async fn retire(&self, name: &AccountName) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .identities
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !record.attached.is_empty() {
            return Err(RegistryError::Conflict(format!(
                "identity {name} still has {} attachments",
                record.attached.len()
            )));
        }
        state.identities.remove(name);
        info!(identity = %name, "retired global identity");
        Ok(())
    }

    async fn fold_into(
        &self,
        old: &AccountName,
        new: &AccountName,
        merge_shards: &[ShardId],
        rename_shards: &[ShardId],
        method: &str,
    ) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let old_record = state
            .identities
            .get(old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;
        if !state.identities.contains_key(new) {
            return Err(RegistryError::NotFound(new.to_string()));
        }
        let moving: BTreeSet<&ShardId> = merge_shards.iter().chain(rename_shards).collect();
        if let Some(shard) = moving
            .iter()
            .find(|shard| !old_record.attached.contains_key(**shard))
        {
            return Err(RegistryError::Conflict(format!(
                "identity {old} is not attached on {shard}"
            )));
        }
        if old_record.attached.len() != moving.len() {
            return Err(RegistryError::Conflict(format!(
                "identity {old} has attachments outside the merge"
            )));
        }

        state.identities.remove(old);
        let mut emptied = false;
        if let Some(local) = state.local_names.get_mut(old) {
            for shard in &moving {
                local.remove(*shard);
            }
            emptied = local.is_empty();
        }
        if emptied {
            state.local_names.remove(old);
        }
        let index = state.local_names.entry(new.clone()).or_default();
        index.extend(rename_shards.iter().cloned());
        if let Some(record) = state.identities.get_mut(new) {
            for shard in rename_shards {
                record.attached.insert(shard.clone(), method.to_string());
            }
            if record.home_shard.is_none() {
                record.home_shard = record.attached.keys().next().cloned();
            }
        }
        info!(
            old = %old,
            new = %new,
            merged = merge_shards.len(),
            moved = rename_shards.len(),
            "folded global identity"
        );
        Ok(())
    }

    async fn invalidate_cache(&self, name: &AccountName) {
        *self
            .state
            .write()
            .await
            .invalidations
            .entry(name.clone())
            .or_default() += 1;
    }

    async fn rename_in_progress(&self, name: &AccountName) -> RegistryResult<bool> {
        Ok(self.store.names_in_progress(name).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RenameStatus;
    use crate::store::memory::InMemoryStore;
    use crate::store::RenameStatusStore;

    fn name(value: &str) -> AccountName {
        AccountName::parse(value).expect("name")
    }

    fn shard(value: &str) -> ShardId {
        ShardId::new(value).expect("shard")
    }

    fn registry() -> (Arc<InMemoryStore>, InMemoryRegistry) {
        let store = Arc::new(InMemoryStore::new());
        let registry = InMemoryRegistry::new(store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn rewrite_moves_identity_and_attached_index_rows_only() {
        let (_, registry) = registry();
        registry
            .create_identity(&name("Alice"), [shard("wikia"), shard("wikib")])
            .await
            .expect("create");
        registry.register_local(&name("Alice"), &shard("wikic")).await;

        registry
            .rewrite_name(&name("Alice"), &name("Bob"))
            .await
            .expect("rewrite");

        assert!(registry.identity(&name("Alice")).await.expect("old").is_none());
        let bob = registry.identity(&name("Bob")).await.expect("new").expect("bob");
        assert_eq!(bob.attached.len(), 2);
        assert_eq!(bob.home_shard, Some(shard("wikia")));
        let left_behind = registry
            .unattached_shards(&name("Alice"))
            .await
            .expect("unattached");
        assert_eq!(left_behind, BTreeSet::from([shard("wikic")]));
        assert!(
            registry
                .unattached_shards(&name("Bob"))
                .await
                .expect("unattached")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn rewrite_refuses_taken_names() {
        let (_, registry) = registry();
        registry
            .create_identity(&name("Alice"), [shard("wikia")])
            .await
            .expect("create");
        registry
            .create_identity(&name("Bob"), [shard("wikib")])
            .await
            .expect("create");
        let err = registry
            .rewrite_name(&name("Alice"), &name("Bob"))
            .await
            .expect_err("taken");
        assert!(matches!(err, RegistryError::Conflict(_)));
        let err = registry
            .rewrite_name(&name("Nobody"), &name("Carol"))
            .await
            .expect_err("missing");
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn retire_requires_an_empty_attachment_set() {
        let (_, registry) = registry();
        registry
            .create_identity(&name("Alice"), [shard("wikia")])
            .await
            .expect("create");
        assert!(registry.retire(&name("Alice")).await.is_err());
        registry
            .detach(&name("Alice"), &shard("wikia"))
            .await
            .expect("detach");
        registry.retire(&name("Alice")).await.expect("retire");
        assert!(registry.identity(&name("Alice")).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn fold_moves_every_attachment_and_retires_the_old_identity() {
        let (_, registry) = registry();
        registry
            .create_identity(&name("Alice"), [shard("wikia"), shard("wikib")])
            .await
            .expect("create");
        registry
            .create_identity(&name("Bob"), [shard("wikib")])
            .await
            .expect("create");

        registry
            .fold_into(
                &name("Alice"),
                &name("Bob"),
                &[shard("wikib")],
                &[shard("wikia")],
                "merge",
            )
            .await
            .expect("fold");

        assert!(registry.identity(&name("Alice")).await.expect("old").is_none());
        assert_eq!(
            registry.attached_shards(&name("Bob")).await.expect("bob"),
            BTreeSet::from([shard("wikia"), shard("wikib")])
        );
        assert_eq!(
            registry.attachment_method(&name("Bob"), &shard("wikia")).await,
            Some("merge".to_string())
        );
        assert_eq!(
            registry.attachment_method(&name("Bob"), &shard("wikib")).await,
            Some("login".to_string())
        );
    }

    #[tokio::test]
    async fn failed_fold_leaves_both_identities_untouched() {
        let (_, registry) = registry();
        registry
            .create_identity(&name("Alice"), [shard("wikia"), shard("wikib")])
            .await
            .expect("create");
        registry
            .create_identity(&name("Bob"), [shard("wikib")])
            .await
            .expect("create");

        // wikic is not Alice's, so nothing may be detached.
        let err = registry
            .fold_into(
                &name("Alice"),
                &name("Bob"),
                &[shard("wikib")],
                &[shard("wikia"), shard("wikic")],
                "merge",
            )
            .await
            .expect_err("foreign shard");
        assert!(matches!(err, RegistryError::Conflict(_)));
        // Leaving wikia out would strand an attachment on a retired identity.
        let err = registry
            .fold_into(&name("Alice"), &name("Bob"), &[shard("wikib")], &[], "merge")
            .await
            .expect_err("partial fold");
        assert!(matches!(err, RegistryError::Conflict(_)));

        assert_eq!(
            registry.attached_shards(&name("Alice")).await.expect("alice"),
            BTreeSet::from([shard("wikia"), shard("wikib")])
        );
        assert_eq!(
            registry.attached_shards(&name("Bob")).await.expect("bob"),
            BTreeSet::from([shard("wikib")])
        );
    }

    #[tokio::test]
    async fn attach_records_the_method() {
        let (_, registry) = registry();
        registry
            .create_identity(&name("Bob"), Vec::new())
            .await
            .expect("create");
        registry
            .attach(&name("Bob"), &shard("wikia"), "promotion")
            .await
            .expect("attach");
        assert_eq!(
            registry.attachment_method(&name("Bob"), &shard("wikia")).await,
            Some("promotion".to_string())
        );
        let bob = registry.identity(&name("Bob")).await.expect("get").expect("bob");
        assert_eq!(bob.home_shard, Some(shard("wikia")));
    }

    #[tokio::test]
    async fn rename_in_progress_follows_the_status_rows() {
        let (store, registry) = registry();
        store
            .claim(&name("Alice"), &name("Bob"), &[shard("wikia")])
            .await
            .expect("claim");
        assert!(registry.rename_in_progress(&name("Alice")).await.expect("old"));
        assert!(registry.rename_in_progress(&name("Bob")).await.expect("new"));

        store
            .update_status(&name("Bob"), &shard("wikia"), RenameStatus::Done)
            .await
            .expect("done");
        assert!(!registry.rename_in_progress(&name("Bob")).await.expect("new"));
    }

    #[tokio::test]
    async fn invalidations_are_counted_per_name() {
        let (_, registry) = registry();
        registry.invalidate_cache(&name("Alice")).await;
        registry.invalidate_cache(&name("Alice")).await;
        assert_eq!(registry.invalidations(&name("Alice")).await, 2);
        assert_eq!(registry.invalidations(&name("Bob")).await, 0);
    }
}
