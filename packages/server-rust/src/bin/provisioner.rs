//! Provisioner server binary.
//!
//! Configuration comes from flags with environment-variable fallbacks; see
//! `provisioner --help`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use provisioner_server::network::{NetworkConfig, NetworkModule};
use provisioner_server::service::{
    FailurePolicy, LifecycleService, ServiceConfig, SimulatedKeyGenerator,
};
use provisioner_server::storage::{open_store, StorageBackend, StorageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Redb,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "provisioner", version, about = "Validator key provisioning service")]
struct Args {
    #[arg(long, env = "PROVISIONER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PROVISIONER_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "PROVISIONER_STORE", value_enum, default_value_t = StoreKind::Redb)]
    store: StoreKind,

    /// Database file for the redb store.
    #[arg(long, env = "PROVISIONER_DB_PATH", default_value = "provisioner.redb")]
    db_path: PathBuf,

    /// Connection string for the postgres store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "PROVISIONER_DB_MAX_CONNECTIONS", default_value_t = 10)]
    db_max_connections: u32,

    /// Simulated generation time per key.
    #[arg(long, env = "PROVISIONER_KEY_DELAY_MS", default_value_t = 20)]
    key_delay_ms: u64,

    /// Probability that a key batch fails, in [0, 1].
    #[arg(long, env = "PROVISIONER_FAILURE_RATE", default_value_t = 0.05)]
    failure_rate: f64,

    /// Seed for reproducible failure injection.
    #[arg(long, env = "PROVISIONER_FAILURE_SEED")]
    failure_seed: Option<u64>,

    /// Requests processed concurrently; 0 = unbounded.
    #[arg(long, env = "PROVISIONER_MAX_TASKS", default_value_t = 256)]
    max_tasks: usize,

    #[arg(long, env = "PROVISIONER_MAX_KEYS", default_value_t = 1000)]
    max_keys: u32,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PROVISIONER_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn storage_config(&self) -> anyhow::Result<StorageConfig> {
        let backend = match self.store {
            StoreKind::Memory => StorageBackend::Memory,
            StoreKind::Redb => StorageBackend::Redb {
                path: self.db_path.clone(),
            },
            StoreKind::Postgres => StorageBackend::Postgres {
                url: self
                    .database_url
                    .clone()
                    .context("DATABASE_URL is required for the postgres store")?,
                max_connections: self.db_max_connections,
            },
        };
        Ok(StorageConfig { backend })
    }

    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            per_key_delay_ms: self.key_delay_ms,
            failure_policy: FailurePolicy::Rate {
                rate: self.failure_rate,
                seed: self.failure_seed,
            },
            max_concurrent_tasks: self.max_tasks,
            max_keys_per_request: self.max_keys,
            ..ServiceConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "provisioner_requests_submitted_total",
        "Provisioning requests accepted"
    );
    metrics::describe_counter!(
        "provisioner_requests_completed_total",
        "Provisioning requests that finished processing, by outcome"
    );
    metrics::describe_counter!(
        "provisioner_requests_stuck_total",
        "Requests left pending because no terminal status could be written"
    );
    metrics::describe_histogram!(
        "provisioner_key_generation_seconds",
        metrics::Unit::Seconds,
        "Time spent generating one key batch"
    );
    metrics::describe_gauge!(
        "provisioner_background_tasks",
        "Requests accepted and not yet processed"
    );
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;
    describe_metrics();

    let store = open_store(&args.storage_config()?)
        .await
        .context("opening request store")?;

    let service_config = args.service_config();
    let generator = Arc::new(SimulatedKeyGenerator::new(
        service_config.per_key_delay(),
        &service_config.failure_policy,
    ));
    let lifecycle = Arc::new(LifecycleService::new(store, generator, &service_config));

    let mut network =
        NetworkModule::new(args.network_config(), lifecycle).with_metrics(metrics);
    let port = network.start().await?;
    info!(port, "Provisioner listening");

    network.serve(shutdown_signal()).await?;
    info!("Provisioner stopped");
    Ok(())
}
