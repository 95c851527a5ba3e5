//! Query-layer behavior that the HTTP tests do not reach directly.

mod common;

use agentdeck::store::{ActivityKind, NewQuestion, NewTask};
use common::setup_test_app;

async fn task(harness: &common::TestApp, title: &str, parent: Option<&str>) -> String {
    harness
        .state
        .store
        .create_task(NewTask {
            title: title.to_string(),
            parent_id: parent.map(str::to_string),
            source: "dashboard".to_string(),
            ..Default::default()
        })
        .await
        .expect("Failed to create task")
        .task
        .id
}

#[tokio::test]
async fn test_activity_union_covers_children() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;
    let parent = task(&harness, "Parent", None).await;
    let child = task(&harness, "Child", Some(&parent)).await;

    store
        .log_activity(&child, ActivityKind::Message, Some("worker"), "child says hi", None)
        .await
        .expect("log failed");

    let own = store
        .activity_for_task(&parent, 50, false)
        .await
        .expect("query failed");
    assert!(own.iter().all(|e| e.task_id == parent));

    let combined = store
        .activity_for_task(&parent, 50, true)
        .await
        .expect("query failed");
    assert!(combined.iter().any(|e| e.task_id == child));
    // Newest first.
    assert_eq!(combined[0].message, "child says hi");
}

#[tokio::test]
async fn test_question_filters() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;
    let parent = task(&harness, "Parent", None).await;
    let child = task(&harness, "Child", Some(&parent)).await;

    let q1 = store
        .create_question(NewQuestion {
            task_id: parent.clone(),
            question: "first?".to_string(),
            question_type: "text".to_string(),
            ..Default::default()
        })
        .await
        .expect("create failed");
    store
        .create_question(NewQuestion {
            task_id: child.clone(),
            question: "second?".to_string(),
            question_type: "text".to_string(),
            ..Default::default()
        })
        .await
        .expect("create failed");
    store
        .answer_question(&q1.id, "done", false)
        .await
        .expect("answer failed");

    let pending_own = store
        .questions_for_task(&parent, true, false)
        .await
        .expect("query failed");
    assert!(pending_own.is_empty());

    let pending_all = store
        .questions_for_task(&parent, true, true)
        .await
        .expect("query failed");
    assert_eq!(pending_all.len(), 1);
    assert_eq!(pending_all[0].question, "second?");

    assert_eq!(
        store
            .pending_question_count(&parent)
            .await
            .expect("count failed"),
        0
    );
    assert_eq!(
        store
            .pending_question_count(&child)
            .await
            .expect("count failed"),
        1
    );
}

#[tokio::test]
async fn test_question_options_round_trip_as_json() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;
    let id = task(&harness, "Chooser", None).await;

    let question = store
        .create_question(NewQuestion {
            task_id: id,
            question: "Pick one".to_string(),
            question_type: "choice".to_string(),
            options: Some(vec!["red".to_string(), "blue".to_string()]),
            ..Default::default()
        })
        .await
        .expect("create failed");
    assert_eq!(
        question.options,
        Some(vec!["red".to_string(), "blue".to_string()])
    );

    let fetched = store
        .get_question(&question.id)
        .await
        .expect("query failed")
        .expect("question exists");
    assert_eq!(fetched.options, question.options);
}

#[tokio::test]
async fn test_artifacts_with_children_and_metadata() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;
    let parent = task(&harness, "Parent", None).await;
    let child = task(&harness, "Child", Some(&parent)).await;

    store
        .create_artifact(
            &child,
            "file",
            "Coverage report",
            "coverage/index.html",
            Some("text/html"),
            Some(serde_json::json!({"lines": 87.5})),
        )
        .await
        .expect("create failed");

    let own = store
        .artifacts_for_task(&parent, false)
        .await
        .expect("query failed");
    assert!(own.is_empty());

    let all = store
        .artifacts_for_task(&parent, true)
        .await
        .expect("query failed");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].mime_type.as_deref(), Some("text/html"));
    let metadata: serde_json::Value =
        serde_json::from_str(&all[0].metadata).expect("metadata is JSON");
    assert_eq!(metadata["lines"], 87.5);
}

#[tokio::test]
async fn test_update_with_no_changes_is_a_read() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;
    let id = task(&harness, "Untouched", None).await;

    let before = store
        .activity_for_task(&id, 50, false)
        .await
        .expect("query failed")
        .len();
    let detail = store
        .update_task(&id, Default::default())
        .await
        .expect("update failed")
        .expect("task exists");
    assert_eq!(detail.task.title, "Untouched");

    let after = store
        .activity_for_task(&id, 50, false)
        .await
        .expect("query failed")
        .len();
    assert_eq!(before, after);
}
