//! Federation service configuration.
//!
//! Values come from `CONCORD_*` environment variables; a YAML file named by
//! `CONCORD_CONFIG` may then override any of them. The YAML file alone can also
//! carry a `seed` section: the accounts the in-process registry and shard farm
//! start with.
use anyhow::{Context, Result, bail};
use concord_common::{AccountName, ShardId};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend {other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

/// A global identity created at startup, with a local account on each shard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedIdentity {
    pub name: AccountName,
    pub shards: Vec<ShardId>,
    #[serde(default)]
    pub edit_count: u64,
}

/// A local account no global identity owns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedLocalAccount {
    pub name: AccountName,
    pub shard: ShardId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub identities: Vec<SeedIdentity>,
    #[serde(default)]
    pub local_accounts: Vec<SeedLocalAccount>,
}

impl SeedConfig {
    fn shards(&self) -> impl Iterator<Item = &ShardId> {
        self.identities
            .iter()
            .flat_map(|identity| identity.shards.iter())
            .chain(self.local_accounts.iter().map(|account| &account.shard))
    }
}

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    /// Shards served by this process; one worker is spawned per shard.
    pub shards: Vec<ShardId>,
    pub worker_shutdown_grace_ms: u64,
    pub seed: SeedConfig,
}

#[derive(Debug, Default, Deserialize)]
struct FederationConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    shards: Option<Vec<String>>,
    worker_shutdown_grace_ms: Option<u64>,
    seed: Option<SeedConfig>,
}

impl FederationConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("CONCORD_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read CONCORD_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("CONCORD_BIND")
            .unwrap_or_else(|| "0.0.0.0:8443".to_string())
            .parse()
            .with_context(|| "parse CONCORD_BIND")?;
        let metrics_bind = lookup("CONCORD_METRICS_BIND")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse CONCORD_METRICS_BIND")?;
        let storage = match lookup("CONCORD_STORAGE") {
            Some(value) => StorageBackend::parse(&value).with_context(|| "parse CONCORD_STORAGE")?,
            None => StorageBackend::Memory,
        };
        let postgres = match lookup("CONCORD_POSTGRES_URL") {
            Some(url) => Some(PostgresConfig {
                url,
                max_connections: parse_or(
                    &lookup,
                    "CONCORD_POSTGRES_MAX_CONNECTIONS",
                    default_max_connections(),
                )?,
                connect_timeout_ms: parse_or(
                    &lookup,
                    "CONCORD_POSTGRES_CONNECT_TIMEOUT_MS",
                    default_timeout_ms(),
                )?,
                acquire_timeout_ms: parse_or(
                    &lookup,
                    "CONCORD_POSTGRES_ACQUIRE_TIMEOUT_MS",
                    default_timeout_ms(),
                )?,
            }),
            None => None,
        };
        let shards = match lookup("CONCORD_SHARDS") {
            Some(value) => parse_shards(value.split(','))?,
            None => Vec::new(),
        };
        let worker_shutdown_grace_ms = parse_or(&lookup, "CONCORD_WORKER_SHUTDOWN_GRACE_MS", 2000)?;
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            shards,
            worker_shutdown_grace_ms,
            seed: SeedConfig::default(),
        })
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: FederationConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse federation config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.shards {
            self.shards = parse_shards(value.iter().map(String::as_str))?;
        }
        if let Some(value) = override_cfg.worker_shutdown_grace_ms {
            self.worker_shutdown_grace_ms = value;
        }
        if let Some(value) = override_cfg.seed {
            self.seed = value;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("postgres storage selected but CONCORD_POSTGRES_URL is not set");
        }
        if let Some(shard) = self.seed.shards().find(|shard| !self.shards.contains(shard)) {
            bail!("seed account on {shard}, which is not a configured shard");
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value.trim().parse().with_context(|| format!("parse {key}")),
        None => Ok(default),
    }
}

fn parse_shards<'a>(values: impl Iterator<Item = &'a str>) -> Result<Vec<ShardId>> {
    let mut shards = Vec::new();
    for value in values.map(str::trim).filter(|value| !value.is_empty()) {
        let shard = ShardId::new(value).with_context(|| format!("parse shard id {value:?}"))?;
        if !shards.contains(&shard) {
            shards.push(shard);
        }
    }
    Ok(shards)
}
