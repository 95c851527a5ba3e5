//! Process supervision: spawning, streaming, stopping, orphan recovery.

mod common;

use std::time::Duration;

use agentdeck::store::{NewTask, TaskChanges, TaskStatus};
use agentdeck::supervisor::{ProcessEvent, SpawnSpec, Supervisor};
use common::{setup_test_app, wait_for};

fn sh(cmd: &str) -> SpawnSpec {
    SpawnSpec {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), cmd.to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_streams_lines_then_exit() {
    let supervisor = Supervisor::new(Duration::from_millis(500));
    let (pid, mut events) = supervisor
        .start("echoer", sh("echo one; echo two >&2; exit 0"))
        .await
        .expect("spawn failed");
    assert!(pid > 0);

    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut exit = None;
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Line(line) => out.push(line),
            ProcessEvent::ErrLine(line) => err.push(line),
            ProcessEvent::Exited { code } => {
                exit = Some(code);
                break;
            }
        }
    }
    assert_eq!(out, vec!["one"]);
    assert_eq!(err, vec!["two"]);
    assert_eq!(exit, Some(Some(0)));
    assert!(!supervisor.is_running("echoer").await);
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() {
    let supervisor = Supervisor::new(Duration::from_millis(500));
    let (_, mut events) = supervisor
        .start("worker", sh("sleep 30"))
        .await
        .expect("spawn failed");

    let second = supervisor.start("worker", sh("echo nope")).await;
    assert!(second.is_err());

    assert!(supervisor.stop("worker").await);
    // Drain until exit so the registry entry is gone.
    while let Some(event) = events.recv().await {
        if matches!(event, ProcessEvent::Exited { .. }) {
            break;
        }
    }
    assert!(!supervisor.is_running("worker").await);
}

#[tokio::test]
async fn test_stop_without_process_is_noop() {
    let supervisor = Supervisor::new(Duration::from_millis(500));
    assert!(!supervisor.stop("nothing").await);
}

#[tokio::test]
async fn test_sigterm_resistant_process_gets_killed() {
    let supervisor = Supervisor::new(Duration::from_millis(200));
    let (_, mut events) = supervisor
        .start("stubborn", sh("trap '' TERM; echo trapped; while true; do sleep 1; done"))
        .await
        .expect("spawn failed");

    // Wait for the trap to be installed before signalling.
    loop {
        match events.recv().await {
            Some(ProcessEvent::Line(line)) if line == "trapped" => break,
            Some(_) => {}
            None => panic!("process died before trap was set"),
        }
    }

    assert!(supervisor.stop("stubborn").await);
    let exited = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let ProcessEvent::Exited { code } = event {
                return code;
            }
        }
        None
    })
    .await
    .expect("process was never killed");
    // SIGKILL means no exit code.
    assert_eq!(exited, None);
}

#[tokio::test]
async fn test_orphan_with_dead_pid_is_failed_on_recovery() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;

    let task = store
        .create_task(NewTask {
            title: "Left behind".to_string(),
            source: "dashboard".to_string(),
            ..Default::default()
        })
        .await
        .expect("Failed to create task");
    store
        .update_task(&task.task.id, TaskChanges::status(TaskStatus::InProgress))
        .await
        .expect("update failed");
    // A pid that cannot exist.
    store
        .set_task_pid(&task.task.id, Some(999_999_999))
        .await
        .expect("pid update failed");

    harness
        .state
        .tasks
        .recover_orphans()
        .await
        .expect("recovery failed");

    let recovered = store
        .get_task(&task.task.id)
        .await
        .expect("query failed")
        .expect("task exists");
    assert_eq!(recovered.task.status, TaskStatus::Failed);
    assert!(recovered.task.pid.is_none());
}

#[tokio::test]
async fn test_orphan_with_live_pid_is_left_running() {
    let harness = setup_test_app().await;
    let store = &harness.state.store;

    let task = store
        .create_task(NewTask {
            title: "Still going".to_string(),
            source: "dashboard".to_string(),
            ..Default::default()
        })
        .await
        .expect("Failed to create task");
    store
        .update_task(&task.task.id, TaskChanges::status(TaskStatus::InProgress))
        .await
        .expect("update failed");
    // Our own pid is definitely alive.
    store
        .set_task_pid(&task.task.id, Some(std::process::id() as i64))
        .await
        .expect("pid update failed");

    harness
        .state
        .tasks
        .recover_orphans()
        .await
        .expect("recovery failed");

    let recovered = store
        .get_task(&task.task.id)
        .await
        .expect("query failed")
        .expect("task exists");
    assert_eq!(recovered.task.status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let supervisor = Supervisor::new(Duration::from_millis(200));
    let (_, _a) = supervisor
        .start("a", sh("sleep 30"))
        .await
        .expect("spawn failed");
    let (_, _b) = supervisor
        .start("b", sh("sleep 30"))
        .await
        .expect("spawn failed");

    supervisor.shutdown().await;

    wait_for("registry to empty", || {
        let supervisor = supervisor.clone();
        async move { !supervisor.is_running("a").await && !supervisor.is_running("b").await }
    })
    .await;
}
