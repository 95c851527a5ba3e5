//! Task CRUD and stats endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{delete, get, json_response, patch_json, post_json, setup_test_app};

#[tokio::test]
async fn test_create_and_get_task() {
    let harness = setup_test_app().await;

    let (status, created) = json_response(
        &harness.app,
        post_json(
            "/api/tasks",
            json!({"title": "Ship the release", "description": "Cut v1.2 and tag it"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["source"], "dashboard");
    assert_eq!(created["pending_questions"], 0);

    let id = created["id"].as_str().expect("task id");
    let (status, fetched) = json_response(&harness.app, get(&format!("/api/tasks/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Ship the release");
    assert_eq!(fetched["children"], json!([]));
}

#[tokio::test]
async fn test_create_task_rejects_empty_title() {
    let harness = setup_test_app().await;
    let (status, body) =
        json_response(&harness.app, post_json("/api/tasks", json!({"title": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("title"));
}

#[tokio::test]
async fn test_creation_logs_activity() {
    let harness = setup_test_app().await;
    let (_, created) = json_response(
        &harness.app,
        post_json("/api/tasks", json!({"title": "Audit deps"})),
    )
    .await;
    let id = created["id"].as_str().expect("task id");

    let (status, activity) =
        json_response(&harness.app, get(&format!("/api/tasks/{id}/activity"))).await;
    assert_eq!(status, StatusCode::OK);
    let entries = activity.as_array().expect("activity array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["event_type"], "created");
}

#[tokio::test]
async fn test_subtasks_embed_under_parent() {
    let harness = setup_test_app().await;
    let (_, parent) = json_response(
        &harness.app,
        post_json("/api/tasks", json!({"title": "Parent"})),
    )
    .await;
    let parent_id = parent["id"].as_str().expect("parent id");

    let (status, child) = json_response(
        &harness.app,
        post_json(
            "/api/tasks",
            json!({"title": "Child", "parent_id": parent_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Children never appear at the root level.
    let (_, roots) = json_response(&harness.app, get("/api/tasks")).await;
    let roots = roots.as_array().expect("tasks array");
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["children"][0]["title"], "Child");

    // And a child cannot get children of its own.
    let child_id = child["id"].as_str().expect("child id");
    let (status, body) = json_response(
        &harness.app,
        post_json(
            "/api/tasks",
            json!({"title": "Grandchild", "parent_id": child_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("subtask"));
}

#[tokio::test]
async fn test_patch_updates_status_and_logs_transition() {
    let harness = setup_test_app().await;
    let (_, created) = json_response(
        &harness.app,
        post_json("/api/tasks", json!({"title": "Refactor config"})),
    )
    .await;
    let id = created["id"].as_str().expect("task id");

    let (status, updated) = json_response(
        &harness.app,
        patch_json(
            &format!("/api/tasks/{id}"),
            json!({"status": "completed", "result": "done"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "completed");
    assert_eq!(updated["result"], "done");

    let (_, activity) =
        json_response(&harness.app, get(&format!("/api/tasks/{id}/activity"))).await;
    let kinds: Vec<&str> = activity
        .as_array()
        .expect("activity array")
        .iter()
        .map(|e| e["event_type"].as_str().expect("kind"))
        .collect();
    assert!(kinds.contains(&"status_change"));
}

#[tokio::test]
async fn test_delete_cascades_to_children() {
    let harness = setup_test_app().await;
    let (_, parent) = json_response(
        &harness.app,
        post_json("/api/tasks", json!({"title": "Parent"})),
    )
    .await;
    let parent_id = parent["id"].as_str().expect("parent id");
    let (_, child) = json_response(
        &harness.app,
        post_json(
            "/api/tasks",
            json!({"title": "Child", "parent_id": parent_id}),
        ),
    )
    .await;
    let child_id = child["id"].as_str().expect("child id");

    let (status, _) = json_response(&harness.app, delete(&format!("/api/tasks/{parent_id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = json_response(&harness.app, get(&format!("/api/tasks/{child_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_request_changes_requires_terminal_status() {
    let harness = setup_test_app().await;
    let (_, created) = json_response(
        &harness.app,
        post_json("/api/tasks", json!({"title": "Write docs"})),
    )
    .await;
    let id = created["id"].as_str().expect("task id");

    let (status, _) = json_response(
        &harness.app,
        post_json(
            &format!("/api/tasks/{id}/request-changes"),
            json!({"feedback": "tighten the intro"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_request_changes_reopens_completed_task() {
    let harness = setup_test_app().await;
    let (_, created) = json_response(
        &harness.app,
        post_json("/api/tasks", json!({"title": "Write docs"})),
    )
    .await;
    let id = created["id"].as_str().expect("task id");
    json_response(
        &harness.app,
        patch_json(&format!("/api/tasks/{id}"), json!({"status": "completed"})),
    )
    .await;

    let (status, reopened) = json_response(
        &harness.app,
        post_json(
            &format!("/api/tasks/{id}/request-changes"),
            json!({"feedback": "tighten the intro"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reopened["status"], "pending");
    assert_eq!(reopened["revision_count"], 1);
    assert!(reopened["result"].is_null());
}

#[tokio::test]
async fn test_stats_counts_by_status() {
    let harness = setup_test_app().await;
    for title in ["a", "b", "c"] {
        json_response(&harness.app, post_json("/api/tasks", json!({"title": title}))).await;
    }
    let (_, tasks) = json_response(&harness.app, get("/api/tasks")).await;
    let id = tasks[0]["id"].as_str().expect("task id");
    json_response(
        &harness.app,
        patch_json(&format!("/api/tasks/{id}"), json!({"status": "failed"})),
    )
    .await;

    let (status, stats) = json_response(&harness.app, get("/api/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["pending"], 2);
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["pending_questions"], 0);
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let harness = setup_test_app().await;
    let (status, _) = json_response(&harness.app, get("/api/tasks/nope1234")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = json_response(&harness.app, get("/api/tasks/nope1234/activity")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let harness = setup_test_app().await;
    let (status, body) = json_response(&harness.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
