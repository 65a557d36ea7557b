// Worker entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patchbay_core::kernel::drivers::DriverRegistry;
use patchbay_core::kernel::plugins::init_credential_plugin;
use patchbay_core::kernel::store::build_store;
use patchbay_core::kernel::worker::{Worker, WorkerConfig};
use patchbay_core::kernel::BrokerDeps;
use patchbay_core::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,patchbay_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting patchbay worker");

    let settings = Arc::new(Settings::load_worker().context("failed to load configuration")?);
    let store = build_store(&settings).await?;
    let deps = BrokerDeps::new(settings.clone(), store);

    // Plugin validation is fatal here on purpose: a worker with a broken
    // credential store would fail every job it claims.
    let credentials = init_credential_plugin(&settings).await?;
    let drivers = Arc::new(DriverRegistry::builtin());

    let config = WorkerConfig::from_settings(&settings);
    tracing::info!(worker_id = %config.worker_id, "worker configured");

    let worker = Worker::new(&deps, credentials, drivers, config);
    worker.run_until_shutdown().await
}
