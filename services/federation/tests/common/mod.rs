#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use concord_common::{AccountName, ShardId};
use concord_queue::{DrainReport, InMemoryJobQueue, JobQueue, drain};
use federation::app::{AppState, build_router};
use federation::approval::RenameRequestService;
use federation::jobs::FederationJobHandler;
use federation::orchestrator::RenameOrchestrator;
use federation::recovery::RecoveryService;
use federation::registry::InMemoryRegistry;
use federation::shard::{InMemoryFarm, InMemoryShard};
use federation::store::memory::InMemoryStore;
use std::sync::Arc;

pub fn name(value: &str) -> AccountName {
    AccountName::parse(value).expect("name")
}

pub fn shard(value: &str) -> ShardId {
    ShardId::new(value).expect("shard")
}

/// A farm of in-memory shards wired to one store, registry and queue.
pub struct Harness {
    pub shard_ids: Vec<ShardId>,
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<InMemoryRegistry>,
    pub farm: Arc<InMemoryFarm>,
    pub queue: Arc<InMemoryJobQueue>,
    pub handler: FederationJobHandler,
    pub orchestrator: RenameOrchestrator,
    pub recovery: RecoveryService,
    pub requests: RenameRequestService,
}

impl Harness {
    pub fn new(shards: &[&str]) -> Self {
        let shard_ids: Vec<ShardId> = shards.iter().map(|id| shard(id)).collect();
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(InMemoryRegistry::new(store.clone()));
        let farm = Arc::new(InMemoryFarm::new(shard_ids.clone()));
        let queue = Arc::new(InMemoryJobQueue::with_shards(shard_ids.clone()));
        let job_queue: Arc<dyn JobQueue> = queue.clone();
        let handler = FederationJobHandler::new(
            store.clone(),
            registry.clone(),
            job_queue.clone(),
            farm.clone(),
        );
        let orchestrator =
            RenameOrchestrator::new(store.clone(), registry.clone(), job_queue.clone());
        let recovery = RecoveryService::new(store.clone(), job_queue);
        let requests =
            RenameRequestService::new(store.clone(), registry.clone(), orchestrator.clone());
        Self {
            shard_ids,
            store,
            registry,
            farm,
            queue,
            handler,
            orchestrator,
            recovery,
            requests,
        }
    }

    pub fn shard(&self, id: &str) -> Arc<InMemoryShard> {
        self.farm.shard(&shard(id)).expect("known shard")
    }

    /// Create a global identity with a local account on each listed shard.
    pub async fn global_account(&self, account: &str, shards: &[&str], edits: u64) {
        for id in shards {
            self.shard(id).create_account(&name(account), edits).await;
        }
        self.registry
            .create_identity(&name(account), shards.iter().map(|id| shard(id)))
            .await
            .expect("identity");
    }

    /// A local account that no global identity owns.
    pub async fn unattached_account(&self, account: &str, id: &str) {
        self.shard(id).create_account(&name(account), 0).await;
        self.registry.register_local(&name(account), &shard(id)).await;
    }

    pub async fn drain(&self) -> DrainReport {
        drain(&self.queue, &self.handler).await
    }

    pub fn app(&self) -> axum::Router {
        let job_queue: Arc<dyn JobQueue> = self.queue.clone();
        build_router(AppState::new(
            self.store.clone(),
            self.registry.clone(),
            job_queue,
            self.shard_ids.clone(),
        ))
    }
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}
