//! Shared test harness: temp database, fast timers, fake agent scripts.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use agentdeck::api::{self, ApiState};
use agentdeck::chat::ChatManager;
use agentdeck::config::Config;
use agentdeck::events::EventBus;
use agentdeck::questions::QuestionBridge;
use agentdeck::services::ServiceManager;
use agentdeck::store::Store;
use agentdeck::supervisor::Supervisor;
use agentdeck::tasks::TaskManager;

pub struct TestApp {
    pub app: axum::Router,
    pub state: ApiState,
    pub supervisor: Supervisor,
    pub temp_dir: tempfile::TempDir,
}

pub fn test_config(temp_dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: temp_dir
            .join("dashboard.db")
            .to_string_lossy()
            .into_owned(),
        services_file: temp_dir
            .join("services.toml")
            .to_string_lossy()
            .into_owned(),
        agent_binary: "true".to_string(),
        stop_grace: Duration::from_millis(500),
        question_poll_interval: Duration::from_millis(20),
        question_timeout: Duration::from_secs(10),
        ws_liveness_timeout: Duration::from_secs(60),
    }
}

pub async fn setup_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = test_config(temp_dir.path());
    setup_test_app_with(temp_dir, config).await
}

pub async fn setup_test_app_with(temp_dir: tempfile::TempDir, config: Config) -> TestApp {
    let config = Arc::new(config);
    let store = Store::open(&config.database_path)
        .await
        .expect("Failed to open store");
    let bus = EventBus::new();
    let supervisor = Supervisor::new(config.stop_grace);

    let tasks = TaskManager::new(
        store.clone(),
        supervisor.clone(),
        bus.clone(),
        Arc::clone(&config),
    );
    let chat = ChatManager::new(
        store.clone(),
        supervisor.clone(),
        bus.clone(),
        tasks.clone(),
        Arc::clone(&config),
    )
    .expect("Failed to build chat manager");
    let services = ServiceManager::load(
        Path::new(&config.services_file),
        supervisor.clone(),
        bus.clone(),
    )
    .expect("Failed to load services");
    let bridge = QuestionBridge::new(
        store.clone(),
        bus.clone(),
        tasks.clone(),
        Arc::clone(&config),
    );

    let state = ApiState {
        store,
        tasks,
        chat,
        services,
        bridge,
        bus,
        config,
    };
    let app = api::router(state.clone());
    TestApp {
        app,
        state,
        supervisor,
        temp_dir,
    }
}

pub async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("Invalid JSON response")
    };
    (status, value)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn patch_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

/// Write an executable shell script standing in for the agent binary.
pub fn write_agent_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write script");
    let mut perms = std::fs::metadata(&path)
        .expect("Failed to stat script")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("Failed to chmod script");
    path
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
