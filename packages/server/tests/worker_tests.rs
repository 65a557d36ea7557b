//! Worker behaviour end to end: retry classification, caching, ordering,
//! stats, and liveness.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn auth_failure_is_terminal_on_the_first_attempt() {
    let broker = common::broker().await;
    broker.driver.fail_auth("10.0.0.1");

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({"command": "show version", "wait": true, "timeout": 5, "retries": 5}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FAILED", "{body}");
    assert_eq!(body["attempts"], 1);
    let error = body["error"].as_str().unwrap().to_lowercase();
    assert!(error.contains("auth"), "error was: {error}");

    // The auth_failed counter moved for the device.
    let (_, stats) = common::get(&broker.app, "/api/monitoring/device_stats/10.0.0.1:22").await;
    assert_eq!(stats["stats"]["total_failed"], 1);
    assert_eq!(stats["stats"]["error_breakdown"]["auth"], 1);
}

#[tokio::test]
async fn transient_failure_retries_and_recovers() {
    let broker = common::broker().await;
    broker.driver.fail_connects("10.0.0.1", 1);

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({"command": "show version", "wait": true, "timeout": 8, "retries": 3}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETE", "{body}");
    assert_eq!(body["attempts"], 2);
}

#[tokio::test]
async fn transient_failures_exhaust_the_retry_budget() {
    let broker = common::broker().await;
    broker.driver.fail_connects("10.0.0.1", 10);

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({"command": "show version", "wait": true, "timeout": 8, "retries": 2}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FAILED", "{body}");
    assert_eq!(body["attempts"], 2);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));

    let (_, failures) = common::get(
        &broker.app,
        "/api/monitoring/failed_commands?error_class=network",
    )
    .await;
    assert!(failures["total"].as_u64().unwrap() >= 1);
    assert_eq!(failures["failures"][0]["command"], "show version");
}

#[tokio::test]
async fn partial_cache_hit_aggregates_and_writes_back() {
    let broker = common::broker().await;
    broker.driver.set_response("10.0.0.1", "show b", "fresh b");

    let cache = &broker.deps.cache;
    cache
        .set(
            &cache.generate_key("10.0.0.1:22", "show a"),
            &Value::String("cached a".into()),
            None,
        )
        .await;

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute_batch",
        json!({
            "commands": ["show a", "show b"],
            "wait": true,
            "timeout": 5,
            "use_cache": true,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETE", "{body}");
    assert_eq!(body["result"]["data"]["show a"], "cached a");
    assert_eq!(body["result"]["data"]["show b"], "fresh b");

    let cache_meta = &body["result"]["meta"]["cache"];
    assert_eq!(cache_meta["cache_status"], "partial");
    assert_eq!(cache_meta["commands"]["show a"]["cache_status"], "hit");
    assert_eq!(cache_meta["commands"]["show b"]["cache_status"], "miss");

    // The miss was written back under the device fingerprint.
    match cache.get(&cache.generate_key("10.0.0.1:22", "show b")).await {
        patchbay_core::kernel::cache::CacheLookup::Hit(hit) => {
            assert_eq!(hit.value, Value::String("fresh b".into()))
        }
        other => panic!("expected write-back, got {other:?}"),
    }
}

#[tokio::test]
async fn outputs_keep_request_order_and_suffix_duplicates() {
    let broker = common::broker().await;

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute_batch",
        json!({
            "commands": ["show z", "show a", "show z"],
            "wait": true,
            "timeout": 5,
            "use_cache": false,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETE", "{body}");
    let data = body["result"]["data"].as_object().unwrap();
    let keys: Vec<&String> = data.keys().collect();
    assert_eq!(keys, vec!["show z", "show a", "show z_1"]);
}

#[tokio::test]
async fn repeated_cached_command_is_served_from_cache() {
    let broker = common::broker().await;
    broker
        .driver
        .set_response("10.0.0.1", "show ip int brief", "Gi0/0 10.0.0.1 up");

    let run = json!({
        "command": "show ip int brief",
        "wait": true,
        "timeout": 5,
        "use_cache": true,
    });
    let (_, first) = common::post_json(&broker.app, "/api/device/router1/execute", run).await;
    assert_eq!(first["result"]["meta"]["cache"]["cache_status"], "miss");

    // The device output changes, but a whitespace variant of the command
    // still lands on the same fingerprint and serves the cached text.
    broker
        .driver
        .set_response("10.0.0.1", "show ip int brief", "Gi0/0 10.0.0.1 down");
    let (_, second) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({
            "command": "  show   ip int brief ",
            "wait": true,
            "timeout": 5,
            "use_cache": true,
        }),
    )
    .await;
    assert_eq!(second["status"], "COMPLETE", "{second}");
    let meta = &second["result"]["meta"]["cache"];
    assert_eq!(meta["cache_status"], "hit", "{second}");
    assert_eq!(
        second["result"]["data"]["  show   ip int brief "],
        "Gi0/0 10.0.0.1 up"
    );
}

#[tokio::test]
async fn workers_report_heartbeats() {
    let broker = common::broker().await;
    // Give both workers a moment to write their first heartbeat.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) = common::get(&broker.app, "/api/monitoring/workers").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["total"].as_u64().unwrap() >= 2, "{body}");
    let workers = body["workers"].as_array().unwrap();
    assert!(workers.iter().all(|w| w["status"] == "healthy"));
    assert!(workers.iter().any(|w| w["id"] == "test-worker-1"));
}

#[tokio::test]
async fn stats_summary_tracks_outcomes() {
    let broker = common::broker().await;

    common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({"command": "show version", "wait": true, "timeout": 5}),
    )
    .await;
    broker.driver.fail_auth("10.0.0.2");
    common::post_json(
        &broker.app,
        "/api/device/router2/execute",
        json!({"command": "show version", "wait": true, "timeout": 5}),
    )
    .await;

    let (status, body) = common::get(&broker.app, "/api/monitoring/stats/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["global"]["total_jobs"], 2, "{body}");
    assert_eq!(body["global"]["successful"], 1);
    assert_eq!(body["global"]["failed"], 1);
    assert!(!body["top_devices"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn metrics_scrape_is_prometheus_text() {
    let broker = common::broker().await;
    common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({"command": "show version", "wait": true, "timeout": 5}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) = common::get(&broker.app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("patchbay_jobs_total"), "{text}");
    assert!(text.contains("patchbay_workers_active"));
    assert!(text.contains("patchbay_queue_depth"));
}
