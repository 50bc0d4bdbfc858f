//! Federation HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, storage, the identity registry and one worker per shard
//! lane, then serves the HTTP API and the metrics endpoint until shutdown.
//!
//! # Notes
//! Shard databases and the registry are in-process in this binary and start
//! empty apart from the accounts listed in the config's `seed` section; without
//! a seed every rename is refused with `old_identity_missing`. Workers are
//! cancelled on shutdown and given `worker_shutdown_grace_ms` to finish the job
//! they are running; a job cut off mid-flight is left `inprogress` for an
//! operator to resume.
use anyhow::Context;
use concord_queue::{InMemoryJobQueue, JobHandler, JobQueue, ShardWorker};
use federation::app::{AppState, build_router};
use federation::config::{self, FederationConfig, SeedConfig};
use federation::jobs::FederationJobHandler;
use federation::observability;
use federation::registry::{IdentityRegistry, InMemoryRegistry};
use federation::shard::{InMemoryFarm, ShardDirectory};
use federation::store::{FederationStore, memory::InMemoryStore, postgres::PostgresStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FederationConfig::from_env_or_yaml().context("federation config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

struct Services {
    state: AppState,
    queue: Arc<InMemoryJobQueue>,
    handler: Arc<dyn JobHandler>,
}

async fn run_with_shutdown<F>(config: FederationConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability(observability::SERVICE_NAME);
    let services = build_services(&config).await?;
    let cancel = CancellationToken::new();

    let workers: Vec<_> = config
        .shards
        .iter()
        .map(|shard| {
            ShardWorker::new(
                shard.clone(),
                services.queue.clone(),
                services.handler.clone(),
                cancel.child_token(),
            )
            .spawn()
        })
        .collect();

    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
        cancel.clone().cancelled_owned(),
    ));

    let app = build_router(services.state.clone());
    let addr = config.bind_addr;
    tracing::info!(
        %addr,
        backend = services.state.store.backend_name(),
        shards = config.shards.len(),
        "federation service listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(cancel.clone().cancelled_owned());

    tokio::pin!(shutdown);
    let served = tokio::select! {
        result = server => result.map_err(anyhow::Error::from),
        _ = &mut shutdown => Ok(()),
    };
    cancel.cancel();

    let grace = Duration::from_millis(config.worker_shutdown_grace_ms);
    for worker in workers {
        if tokio::time::timeout(grace, worker).await.is_err() {
            tracing::warn!(
                grace_ms = config.worker_shutdown_grace_ms,
                "shard worker did not stop within grace period"
            );
        }
    }
    services.queue.close().await;
    if let Err(err) = tokio::time::timeout(grace, metrics_task).await {
        tracing::warn!(error = %err, "metrics server did not stop within grace period");
    }
    served
}

async fn build_services(config: &FederationConfig) -> anyhow::Result<Services> {
    let store: Arc<dyn FederationStore> = match config.storage {
        config::StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        config::StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(PostgresStore::connect(pg).await?)
        }
    };
    let registry = Arc::new(InMemoryRegistry::new(store.clone()));
    let farm = Arc::new(InMemoryFarm::new(config.shards.clone()));
    seed_accounts(&config.seed, &registry, &farm).await?;
    let registry: Arc<dyn IdentityRegistry> = registry;
    let farm: Arc<dyn ShardDirectory> = farm;
    let queue = Arc::new(InMemoryJobQueue::with_shards(config.shards.clone()));
    let job_queue: Arc<dyn JobQueue> = queue.clone();
    let handler: Arc<dyn JobHandler> = Arc::new(FederationJobHandler::new(
        store.clone(),
        registry.clone(),
        job_queue.clone(),
        farm,
    ));
    Ok(Services {
        state: AppState::new(store, registry, job_queue, config.shards.clone()),
        queue,
        handler,
    })
}

async fn seed_accounts(
    seed: &SeedConfig,
    registry: &InMemoryRegistry,
    farm: &InMemoryFarm,
) -> anyhow::Result<()> {
    for identity in &seed.identities {
        for shard in &identity.shards {
            farm.shard(shard)
                .with_context(|| format!("seed shard {shard} is not served"))?
                .create_account(&identity.name, identity.edit_count)
                .await;
        }
        registry
            .create_identity(&identity.name, identity.shards.iter().cloned())
            .await
            .with_context(|| format!("seed identity {}", identity.name))?;
    }
    for account in &seed.local_accounts {
        farm.shard(&account.shard)
            .with_context(|| format!("seed shard {} is not served", account.shard))?
            .create_account(&account.name, 0)
            .await;
        registry.register_local(&account.name, &account.shard).await;
    }
    if !seed.identities.is_empty() || !seed.local_accounts.is_empty() {
        tracing::info!(
            identities = seed.identities.len(),
            local_accounts = seed.local_accounts.len(),
            "seeded in-process accounts"
        );
    }
    Ok(())
}
