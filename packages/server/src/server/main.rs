// Dispatcher entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patchbay_core::config::StoreBackend;
use patchbay_core::kernel::drivers::DriverRegistry;
use patchbay_core::kernel::plugins::{init_credential_plugin, init_inventory_plugin};
use patchbay_core::kernel::store::build_store;
use patchbay_core::kernel::worker::{Worker, WorkerConfig};
use patchbay_core::kernel::BrokerDeps;
use patchbay_core::parsing::TemplateStore;
use patchbay_core::server::auth::JwtService;
use patchbay_core::server::{build_app, AppState};
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

    tracing::info!("starting patchbay dispatcher");

    // Configuration validation failures and fatal plugin validation exit
    // non-zero before the listener comes up.
    let settings = Arc::new(Settings::load().context("failed to load configuration")?);
    let store = build_store(&settings).await?;
    let deps = BrokerDeps::new(settings.clone(), store);

    let inventory = init_inventory_plugin(&settings).await?;
    let jwt = Arc::new(JwtService::new(
        &settings.jwt_secret,
        settings.jwt_issuer.clone(),
    ));
    let templates = Arc::new(TemplateStore::new(
        PathBuf::from(&settings.project_root).join(&settings.template_dir),
    ));
    let drivers = Arc::new(DriverRegistry::builtin());

    // The memory backend is process-local, so the worker must live in this
    // process; with Redis it is an opt-in convenience for small setups.
    let run_embedded_worker =
        settings.embedded_worker || settings.store_backend == StoreBackend::Memory;
    if run_embedded_worker {
        let credentials = init_credential_plugin(&settings).await?;
        let worker = Worker::new(
            &deps,
            credentials,
            drivers.clone(),
            WorkerConfig::from_settings(&settings),
        );
        tracing::info!("starting embedded worker");
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                tracing::error!(error = %e, "embedded worker exited with error");
            }
        });
    }

    let state = AppState {
        deps,
        inventory,
        jwt,
        templates,
        driver_families: drivers.families(),
    };
    let app = build_app(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    tracing::info!(addr = %addr, "dispatcher listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
