use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cadence_core::app::PumpRegistry;
use cadence_core::config::{ConfigError, IteratorConfig, Settings};
use cadence_core::domain::{PersistentIterable, SchedulingType};
use cadence_core::impls::{InMemoryPersistenceProvider, PgPersistenceProvider};
use cadence_core::ports::PersistenceProvider;
use cadence_core::reconcilers::{
    InMemoryRecommendationEngine, InMemorySyncClient, Recommendation, ResourceGroup,
    recommendation_iterator, resource_group_iterator,
};
use cadence_core::telemetry::{LogFormat, init_logging};

const RESOURCE_GROUP_SYNC: &str = "resource_group_sync";
const RECOMMENDATION_REFRESH: &str = "recommendation_refresh";

/// Runs the resource group sync and recommendation refresh iterators against
/// a seeded store until Ctrl-C (or `--run-for-secs`).
#[derive(Debug, Parser)]
#[command(name = "cadence", version)]
struct Args {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Overrides logging.level from the configuration
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

/// Where the demo entities live: Postgres when `[database]` is configured.
enum Store {
    Memory(InMemoryPersistenceProvider),
    Postgres(PgPersistenceProvider),
}

impl Store {
    async fn open(settings: &Settings) -> anyhow::Result<Self> {
        match &settings.database {
            Some(database) => {
                let pg = PgPersistenceProvider::connect(database).await?;
                pg.health_check().await?;
                Ok(Store::Postgres(pg))
            }
            None => Ok(Store::Memory(InMemoryPersistenceProvider::new())),
        }
    }

    async fn seed<T: PersistentIterable>(&self, entities: &[T]) -> anyhow::Result<()> {
        match self {
            Store::Memory(store) => {
                for entity in entities {
                    store.insert(entity).await?;
                }
            }
            Store::Postgres(pg) => {
                pg.ensure_collection::<T>().await?;
                for entity in entities {
                    pg.upsert(entity).await?;
                }
            }
        }
        Ok(())
    }

    fn provider<T: PersistentIterable>(&self) -> Arc<dyn PersistenceProvider<T>> {
        match self {
            Store::Memory(store) => Arc::new(store.clone()),
            Store::Postgres(pg) => Arc::new(pg.clone()),
        }
    }
}

/// Configured iterator, or the demo default when the file has no entry.
fn iterator_config(
    settings: &Settings,
    name: &str,
    fallback: IteratorConfig,
) -> anyhow::Result<IteratorConfig> {
    match settings.iterator(name) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotConfigured(_)) => Ok(fallback),
        Err(e) => Err(e.into()),
    }
}

fn seed_resource_groups() -> Vec<ResourceGroup> {
    let mut managed = ResourceGroup::new("rg-all", "acc-1", "All Resources");
    managed.managed = true;
    vec![
        managed,
        ResourceGroup::new("rg-prod", "acc-1", "Production"),
        ResourceGroup::new("rg-staging", "acc-1", "Staging"),
        ResourceGroup::new("rg-audit", "acc-2", "Audit"),
    ]
}

fn seed_recommendations() -> Vec<Recommendation> {
    vec![
        Recommendation::new("rec-workload", "acc-1", "WORKLOAD", 10_000),
        Recommendation::new("rec-node-pool", "acc-1", "NODE_POOL", 15_000),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = Settings::load_from_path(&args.config_dir)
        .with_context(|| format!("loading configuration from {}", args.config_dir.display()))?;
    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    let format = if args.json_logs || settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(level, format)?;

    let store = Store::open(&settings).await?;
    store.seed(&seed_resource_groups()).await?;
    store.seed(&seed_recommendations()).await?;

    let sync_config = iterator_config(
        &settings,
        RESOURCE_GROUP_SYNC,
        IteratorConfig {
            pool_size: 2,
            poll_interval: Duration::from_secs(1),
            target_interval: Duration::from_secs(5),
            ..IteratorConfig::new(RESOURCE_GROUP_SYNC, SchedulingType::Regular)
        },
    )?;
    let refresh_config = iterator_config(
        &settings,
        RECOMMENDATION_REFRESH,
        IteratorConfig {
            poll_interval: Duration::from_secs(1),
            ..IteratorConfig::new(RECOMMENDATION_REFRESH, SchedulingType::IrregularSkipMissed)
        },
    )?;

    let sync_client = Arc::new(InMemorySyncClient::new());
    let engine = Arc::new(InMemoryRecommendationEngine::new());

    let mut pumps = PumpRegistry::new();
    pumps.create_pump(
        sync_config.pump_options(),
        resource_group_iterator(
            sync_config,
            store.provider::<ResourceGroup>(),
            sync_client.clone(),
            Duration::from_secs(2),
        )?,
    )?;
    pumps.create_pump(
        refresh_config.pump_options(),
        recommendation_iterator(
            refresh_config,
            store.provider::<Recommendation>(),
            engine.clone(),
        )?,
    )?;
    info!(pumps = ?pumps.names(), "pumps running");

    match args.run_for_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    for (name, status) in pumps.stop_all().await {
        info!(pump = %name, status = %serde_json::to_string(&status)?, "final status");
    }
    info!(
        syncs = sync_client.synced().await.len(),
        refreshes = engine.refresh_count("rec-workload").await,
        "shutdown complete"
    );
    Ok(())
}
