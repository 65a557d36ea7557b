//! Server-side output parsing on execute and poll endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::json;

const INT_BRIEF_TEMPLATE: &str =
    r"(?P<interface>Gi\S+)\s+(?P<ip>\d+\.\d+\.\d+\.\d+)\s+(?P<status>up|down)";

const INT_BRIEF_OUTPUT: &str = "Interface IP-Address Status\n\
                                Gi0/0 10.0.0.1 up\n\
                                Gi0/1 192.168.1.1 down";

/// Harness with a template directory on disk.
async fn broker_with_templates() -> (common::TestBroker, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("templates")).unwrap();
    std::fs::write(
        dir.path().join("templates/cisco_ios_show_ip_int_brief.tmpl"),
        INT_BRIEF_TEMPLATE,
    )
    .unwrap();

    let root = dir.path().to_string_lossy().into_owned();
    let broker = common::broker_with(move |settings| {
        settings.project_root = root;
    })
    .await;
    (broker, dir)
}

#[tokio::test]
async fn execute_with_parse_returns_structured_rows() {
    let (broker, _dir) = broker_with_templates().await;
    broker
        .driver
        .set_response("10.0.0.1", "show ip int brief", INT_BRIEF_OUTPUT);

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({
            "command": "show ip int brief",
            "wait": true,
            "timeout": 5,
            "parse": true,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["template"], "cisco_ios_show_ip_int_brief.tmpl");
    let rows = body["parsed"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["interface"], "Gi0/0");
    assert_eq!(rows[1]["status"], "down");
    assert!(body["raw"].is_null());
}

#[tokio::test]
async fn include_raw_carries_the_original_text() {
    let (broker, _dir) = broker_with_templates().await;
    broker
        .driver
        .set_response("10.0.0.1", "show ip int brief", INT_BRIEF_OUTPUT);

    let (_, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({
            "command": "show ip int brief",
            "wait": true,
            "timeout": 5,
            "parse": true,
            "include_raw": true,
        }),
    )
    .await;

    assert_eq!(body["raw"], INT_BRIEF_OUTPUT);
}

#[tokio::test]
async fn missing_template_is_a_404() {
    let (broker, _dir) = broker_with_templates().await;

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({
            "command": "show environment",
            "wait": true,
            "timeout": 5,
            "parse": true,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("cisco_ios_show_environment.tmpl"));
}

#[tokio::test]
async fn poll_endpoint_parses_a_completed_job() {
    let (broker, _dir) = broker_with_templates().await;
    broker
        .driver
        .set_response("10.0.0.1", "show ip int brief", INT_BRIEF_OUTPUT);

    let (_, envelope) = common::post_json(
        &broker.app,
        "/api/device/router1/execute",
        json!({"command": "show ip int brief", "wait": true, "timeout": 5}),
    )
    .await;
    assert_eq!(envelope["status"], "COMPLETE");

    let job_id = envelope["job_id"].as_str().unwrap();
    let (status, body) =
        common::get(&broker.app, &format!("/api/job/{job_id}?parse=true")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let rows = body["data"]["show ip int brief"]["parsed"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn batch_parses_per_command() {
    let (broker, _dir) = broker_with_templates().await;
    broker
        .driver
        .set_response("10.0.0.1", "show ip int brief", INT_BRIEF_OUTPUT);
    broker
        .driver
        .set_response("10.0.0.1", "show version", "IOS XE, Version 16.12");

    let (status, body) = common::post_json(
        &broker.app,
        "/api/device/router1/execute_batch",
        json!({
            "commands": [
                {"command": "show ip int brief", "parse": true},
                {"command": "show version"},
            ],
            "wait": true,
            "timeout": 5,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let parsed = &body["data"]["show ip int brief"]["parsed"];
    assert_eq!(parsed.as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["show version"], "IOS XE, Version 16.12");
    assert_eq!(body["_cache"]["cache_status"], "miss");
}
