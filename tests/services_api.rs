//! Service lifecycle over the API, driven by a real services.toml.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use agentdeck::services::ServiceStatus;

use common::{get, json_response, post_json, setup_test_app_with, test_config, wait_for, TestApp};

async fn app_with_services(toml_body: &str) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = test_config(temp_dir.path());
    std::fs::write(&config.services_file, toml_body).expect("Failed to write services file");
    setup_test_app_with(temp_dir, config).await
}

#[tokio::test]
async fn test_services_listed_as_stopped_initially() {
    let harness = app_with_services(
        r#"
        [[service]]
        id = "ticker"
        name = "Ticker"
        command = "while true; do echo tick; sleep 1; done"
        port = 4100
        "#,
    )
    .await;

    let (status, services) = json_response(&harness.app, get("/api/services")).await;
    assert_eq!(status, StatusCode::OK);
    let services = services.as_array().expect("services");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["id"], "ticker");
    assert_eq!(services[0]["status"], "stopped");
    assert_eq!(services[0]["port"], 4100);
    assert!(services[0]["pid"].is_null());
}

#[tokio::test]
async fn test_start_captures_logs_and_stop_ends_it() {
    let harness = app_with_services(
        r#"
        [[service]]
        id = "ticker"
        name = "Ticker"
        command = "echo ready; while true; do sleep 1; done"
        "#,
    )
    .await;

    let (status, _) =
        json_response(&harness.app, post_json("/api/services/ticker/start", json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    // Idempotent start.
    let (status, _) =
        json_response(&harness.app, post_json("/api/services/ticker/start", json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let services = harness.state.services.clone();
    wait_for("service log line", move || {
        let services = services.clone();
        async move {
            services
                .logs("ticker")
                .await
                .map(|l| l.iter().any(|line| line == "ready"))
                .unwrap_or(false)
        }
    })
    .await;

    let (_, listed) = json_response(&harness.app, get("/api/services")).await;
    assert_eq!(listed[0]["status"], "running");
    assert!(listed[0]["pid"].is_i64() || listed[0]["pid"].is_u64());

    let (status, _) =
        json_response(&harness.app, post_json("/api/services/ticker/stop", json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let services = harness.state.services.clone();
    wait_for("service to stop", move || {
        let services = services.clone();
        async move {
            services
                .list()
                .await
                .first()
                .map(|s| s.status == ServiceStatus::Stopped)
                .unwrap_or(false)
        }
    })
    .await;
}

#[tokio::test]
async fn test_crashing_service_is_marked_failed() {
    let harness = app_with_services(
        r#"
        [[service]]
        id = "flaky"
        name = "Flaky"
        command = "echo boom >&2; exit 7"
        "#,
    )
    .await;

    json_response(&harness.app, post_json("/api/services/flaky/start", json!({}))).await;

    let app = harness.app.clone();
    wait_for("service to fail", move || {
        let app = app.clone();
        async move {
            let (_, listed) = json_response(&app, get("/api/services")).await;
            listed[0]["status"] == "failed"
        }
    })
    .await;

    let (_, logs) = json_response(&harness.app, get("/api/services/flaky/logs")).await;
    assert!(logs
        .as_array()
        .expect("logs")
        .iter()
        .any(|l| l.as_str() == Some("boom")));
}

#[tokio::test]
async fn test_log_ring_strips_ansi_codes() {
    let harness = app_with_services(
        r#"
        [[service]]
        id = "colorful"
        name = "Colorful"
        command = "printf '\u001b[32mgreen light\u001b[0m\n'; sleep 30"
        "#,
    )
    .await;
    json_response(
        &harness.app,
        post_json("/api/services/colorful/start", json!({})),
    )
    .await;

    let services = harness.state.services.clone();
    wait_for("clean log line", move || {
        let services = services.clone();
        async move {
            services
                .logs("colorful")
                .await
                .map(|l| l.iter().any(|line| line == "green light"))
                .unwrap_or(false)
        }
    })
    .await;

    let _ = harness.state.services.stop("colorful").await;
}

#[tokio::test]
async fn test_unknown_service_is_404() {
    let harness = app_with_services("").await;
    let (status, _) =
        json_response(&harness.app, post_json("/api/services/ghost/start", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = json_response(&harness.app, get("/api/services/ghost/logs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_services_file_means_no_services() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = test_config(temp_dir.path());
    let harness = setup_test_app_with(temp_dir, config).await;
    let (status, services) = json_response(&harness.app, get("/api/services")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(services.as_array().expect("services").len(), 0);
}

#[tokio::test]
async fn test_restart_brings_service_back_up() {
    let harness = app_with_services(
        r#"
        [[service]]
        id = "ticker"
        name = "Ticker"
        command = "echo up; sleep 60"
        "#,
    )
    .await;
    json_response(&harness.app, post_json("/api/services/ticker/start", json!({}))).await;

    let app = harness.app.clone();
    wait_for("service running", move || {
        let app = app.clone();
        async move {
            let (_, listed) = json_response(&app, get("/api/services")).await;
            listed[0]["status"] == "running"
        }
    })
    .await;

    let (status, _) = json_response(
        &harness.app,
        post_json("/api/services/ticker/restart", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = json_response(&harness.app, get("/api/services")).await;
    assert_eq!(listed[0]["status"], "running");

    let _ = harness.state.services.stop("ticker").await;
}
