#![allow(dead_code)]

//! Hermetic test harness.
//!
//! Builds the full broker in-process: memory store, fake driver under both
//! driver families, static inventory/credential plugins, two workers sharing
//! the store (so the device semaphore actually contends), and the real
//! router. Tests drive the HTTP surface with `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use patchbay_core::common::DeviceConfig;
use patchbay_core::kernel::drivers::{DriverRegistry, FakeDriver};
use patchbay_core::kernel::plugins::{StaticCredentialPlugin, StaticInventoryPlugin};
use patchbay_core::kernel::store::MemoryStore;
use patchbay_core::kernel::worker::{Worker, WorkerConfig};
use patchbay_core::kernel::BrokerDeps;
use patchbay_core::parsing::TemplateStore;
use patchbay_core::server::auth::JwtService;
use patchbay_core::server::{build_app, AppState};
use patchbay_core::Settings;

pub struct TestBroker {
    pub app: Router,
    pub deps: BrokerDeps,
    pub driver: Arc<FakeDriver>,
    pub jwt: Arc<JwtService>,
    pub settings: Arc<Settings>,
    shutdowns: Vec<Arc<std::sync::atomic::AtomicBool>>,
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        for shutdown in &self.shutdowns {
            shutdown.store(true, Ordering::SeqCst);
        }
    }
}

/// Harness with test-friendly defaults.
pub async fn broker() -> TestBroker {
    broker_with(|_| {}).await
}

/// Harness with settings tweaked before anything is built.
pub async fn broker_with(tweak: impl FnOnce(&mut Settings)) -> TestBroker {
    let mut settings = Settings {
        store_backend: patchbay_core::config::StoreBackend::Memory,
        gating_retry_interval_ms: 100,
        worker_poll_interval_ms: 20,
        jwt_secret: "test-secret".to_string(),
        ..Settings::default()
    };
    tweak(&mut settings);
    let settings = Arc::new(settings);

    let store: Arc<dyn patchbay_core::kernel::store::KvStore> = Arc::new(MemoryStore::new());
    let deps = BrokerDeps::new(settings.clone(), store);

    let driver = FakeDriver::new();
    let registry = Arc::new(
        DriverRegistry::empty()
            .with_driver("exec", Arc::new(driver.clone()))
            .with_driver("shell", Arc::new(driver.clone())),
    );

    let inventory = Arc::new(StaticInventoryPlugin::new(HashMap::from([
        (
            "router1".to_string(),
            DeviceConfig {
                driver_family: "exec".into(),
                driver: "cisco_ios".into(),
                host: "10.0.0.1".into(),
                port: 22,
                credential_id: "lab".into(),
            },
        ),
        (
            "router2".to_string(),
            DeviceConfig {
                driver_family: "shell".into(),
                driver: "arista_eos".into(),
                host: "10.0.0.2".into(),
                port: 22,
                credential_id: "lab".into(),
            },
        ),
    ])));
    let credentials = Arc::new(StaticCredentialPlugin::new(HashMap::from([
        ("lab".to_string(), ("netops".to_string(), "lab-pass".to_string())),
        ("backup".to_string(), ("backup".to_string(), "backup-pass".to_string())),
    ])));

    // Two workers against one store, so same-device jobs really contend.
    let mut shutdowns = Vec::new();
    for n in 1..=2 {
        let config = WorkerConfig::from_settings(&settings)
            .with_worker_id(format!("test-worker-{n}"));
        let worker = Worker::new(&deps, credentials.clone(), registry.clone(), config);
        shutdowns.push(worker.shutdown_handle());
        tokio::spawn(worker.run());
    }

    let jwt = Arc::new(JwtService::new(
        &settings.jwt_secret,
        settings.jwt_issuer.clone(),
    ));
    let templates = Arc::new(TemplateStore::new(
        std::path::PathBuf::from(&settings.project_root).join(&settings.template_dir),
    ));

    let state = AppState {
        deps: deps.clone(),
        inventory,
        jwt: jwt.clone(),
        templates,
        driver_families: registry.families(),
    };

    TestBroker {
        app: build_app(state),
        deps,
        driver,
        jwt,
        settings,
        shutdowns,
    }
}

// ============================================================================
// HTTP helpers
// ============================================================================

pub async fn request(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    request(app, "POST", path, Some(body), &[]).await
}

pub async fn get(app: &Router, path: &str) -> (StatusCode, Value) {
    request(app, "GET", path, None, &[]).await
}

pub async fn delete(app: &Router, path: &str) -> (StatusCode, Value) {
    request(app, "DELETE", path, None, &[]).await
}

/// Poll `/api/job/{id}` until it reaches a terminal status, panicking after
/// `timeout`.
pub async fn wait_for_terminal(app: &Router, job_id: &str, timeout: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let (status, body) = get(app, &format!("/api/job/{job_id}")).await;
        assert_eq!(status, StatusCode::OK, "job poll failed: {body}");
        let state = body["status"].as_str().unwrap_or_default();
        if matches!(state, "COMPLETE" | "FAILED" | "ABORTED") {
            return body;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} did not finish in {timeout:?}; last envelope: {body}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
