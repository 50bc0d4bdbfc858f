//! In-memory shards.
//!
//! [`InMemoryShard`] keeps one shard's accounts and pages behind a mutex so every
//! call applies fully or not at all. [`InMemoryFarm`] maps shard ids to them.
//! Both back the binary and the tests; [`InMemoryShard::set_available`] lets a
//! test take a shard down to exercise the failure path.
use super::{
    LocalAccount, Page, ShardDatabase, ShardDirectory, ShardError, ShardResult,
};
use async_trait::async_trait;
use concord_common::{AccountName, PageNamespace, PageTitle, ShardId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

/// A page move as applied by [`ShardDatabase::move_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMove {
    pub from: PageTitle,
    pub to: PageTitle,
    pub performer: AccountName,
    pub redirect_left: bool,
}

#[derive(Debug, Default)]
struct ShardState {
    next_user_id: u64,
    accounts: BTreeMap<AccountName, LocalAccount>,
    pages: BTreeMap<PageTitle, Page>,
    moves: Vec<PageMove>,
}

pub struct InMemoryShard {
    id: ShardId,
    state: Mutex<ShardState>,
    available: AtomicBool,
    account_mutations: AtomicU64,
}

impl InMemoryShard {
    pub fn new(id: ShardId) -> Self {
        Self {
            id,
            state: Mutex::new(ShardState::default()),
            available: AtomicBool::new(true),
            account_mutations: AtomicU64::new(0),
        }
    }

    pub async fn create_account(&self, name: &AccountName, edit_count: u64) -> LocalAccount {
        let mut state = self.state.lock().await;
        state.next_user_id += 1;
        let account = LocalAccount {
            user_id: state.next_user_id,
            name: name.clone(),
            edit_count,
        };
        state.accounts.insert(name.clone(), account.clone());
        account
    }

    pub async fn create_page(&self, title: PageTitle, last_editor_id: u64) {
        self.state.lock().await.pages.insert(
            title.clone(),
            Page {
                title,
                last_editor_id,
                redirect_to: None,
            },
        );
    }

    pub async fn page(&self, title: &PageTitle) -> Option<Page> {
        self.state.lock().await.pages.get(title).cloned()
    }

    pub async fn moves(&self) -> Vec<PageMove> {
        self.state.lock().await.moves.clone()
    }

    /// Successful account renames and merges applied to this shard.
    pub fn account_mutations(&self) -> u64 {
        self.account_mutations.load(Ordering::SeqCst)
    }

    /// While unavailable every call fails with [`ShardError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> ShardResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ShardError::Unavailable(self.id.clone()))
        }
    }

    fn not_found(&self, what: impl Into<String>) -> ShardError {
        ShardError::NotFound {
            shard: self.id.clone(),
            what: what.into(),
        }
    }

    fn conflict(&self, what: impl Into<String>) -> ShardError {
        ShardError::Conflict {
            shard: self.id.clone(),
            what: what.into(),
        }
    }
}

#[async_trait]
impl ShardDatabase for InMemoryShard {
    fn shard(&self) -> &ShardId {
        &self.id
    }

    async fn account(&self, name: &AccountName) -> ShardResult<Option<LocalAccount>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.accounts.get(name).cloned())
    }

    async fn rename_account(&self, old: &AccountName, new: &AccountName) -> ShardResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(new) {
            return Err(self.conflict(format!("account {new} exists")));
        }
        let mut account = state
            .accounts
            .remove(old)
            .ok_or_else(|| self.not_found(format!("account {old}")))?;
        account.name = new.clone();
        state.accounts.insert(new.clone(), account);
        self.account_mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn merge_account(&self, from: &AccountName, into: &AccountName) -> ShardResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let Some(target) = state.accounts.get(into).cloned() else {
            return Err(self.not_found(format!("account {into}")));
        };
        let source = state
            .accounts
            .remove(from)
            .ok_or_else(|| self.not_found(format!("account {from}")))?;
        for page in state.pages.values_mut() {
            if page.last_editor_id == source.user_id {
                page.last_editor_id = target.user_id;
            }
        }
        if let Some(target) = state.accounts.get_mut(into) {
            target.edit_count += source.edit_count;
        }
        self.account_mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pages_with_prefix(
        &self,
        namespace: PageNamespace,
        name: &AccountName,
    ) -> ShardResult<Vec<PageTitle>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .await
            .pages
            .keys()
            .filter(|title| title.namespace == namespace && title.belongs_to(name))
            .cloned()
            .collect())
    }

    async fn page_exists(&self, title: &PageTitle) -> ShardResult<bool> {
        self.ensure_available()?;
        Ok(self.state.lock().await.pages.contains_key(title))
    }

    async fn move_page(
        &self,
        from: &PageTitle,
        to: &PageTitle,
        performer: &AccountName,
        suppress_redirect: bool,
    ) -> ShardResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if state.pages.contains_key(to) {
            return Err(self.conflict(format!("page {to} exists")));
        }
        let mut page = state
            .pages
            .remove(from)
            .ok_or_else(|| self.not_found(format!("page {from}")))?;
        let editor_id = state
            .accounts
            .get(performer)
            .map(|account| account.user_id)
            .unwrap_or(0);
        page.title = to.clone();
        page.last_editor_id = editor_id;
        state.pages.insert(to.clone(), page);
        if !suppress_redirect {
            state.pages.insert(
                from.clone(),
                Page {
                    title: from.clone(),
                    last_editor_id: editor_id,
                    redirect_to: Some(to.clone()),
                },
            );
        }
        state.moves.push(PageMove {
            from: from.clone(),
            to: to.clone(),
            performer: performer.clone(),
            redirect_left: !suppress_redirect,
        });
        Ok(())
    }
}

/// The set of shards reachable from this process.
#[derive(Default)]
pub struct InMemoryFarm {
    shards: BTreeMap<ShardId, Arc<InMemoryShard>>,
}

impl InMemoryFarm {
    pub fn new(ids: impl IntoIterator<Item = ShardId>) -> Self {
        Self {
            shards: ids
                .into_iter()
                .map(|id| (id.clone(), Arc::new(InMemoryShard::new(id))))
                .collect(),
        }
    }

    pub fn shard(&self, id: &ShardId) -> Option<Arc<InMemoryShard>> {
        self.shards.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ShardId> {
        self.shards.keys()
    }
}

impl ShardDirectory for InMemoryFarm {
    fn database(&self, shard: &ShardId) -> ShardResult<Arc<dyn ShardDatabase>> {
        self.shards
            .get(shard)
            .map(|db| db.clone() as Arc<dyn ShardDatabase>)
            .ok_or_else(|| ShardError::UnknownShard(shard.clone()))
    }
}
