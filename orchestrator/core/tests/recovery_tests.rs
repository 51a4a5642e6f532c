// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::application::orchestrator::Orchestrator;
use cadence_core::domain::agent::{AgentCategory, AgentDescriptor, HandlerSpec};
use cadence_core::domain::config::{OrchestratorConfig, RecoveryPolicy, StorageBackend};
use cadence_core::domain::errors::ErrorKind;
use cadence_core::domain::repository::{SessionRepository, TaskRepository};
use cadence_core::domain::session::Session;
use cadence_core::domain::task::{Priority, Task, TaskStatus};
use cadence_core::infrastructure::repositories::{
    open_sled, InMemorySessionRepository, InMemoryTaskRepository, SledSessionRepository, SledTaskRepository,
};

fn echo_config(recovery: RecoveryPolicy) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.spec.agents =
        vec![AgentDescriptor::new("backend", AgentCategory::Backend, 2).with_handler(HandlerSpec::Echo)];
    config.spec.sessions.storage = StorageBackend::Memory;
    config.spec.sessions.recovery = recovery;
    config.spec.queue.drain_timeout = Duration::from_secs(2);
    config
}

fn running_task(session: &mut Session, label: &str) -> Task {
    let mut task = Task::new("backend", json!({ "label": label }), Priority::Normal).with_session(session.id);
    task.start().unwrap();
    session.attach_task(task.id);
    task
}

/// Write a session with two tasks that were running when the process died.
/// The second one had already been re-queued once before.
async fn seed_crashed_state(dir: &Path) -> (Session, Task, Task) {
    let db = open_sled(dir).unwrap();
    let sessions = SledSessionRepository::new(&db).unwrap();
    let tasks = SledTaskRepository::new(&db).unwrap();

    let mut session = Session::new();
    let fresh = running_task(&mut session, "fresh");
    let mut repeat = running_task(&mut session, "repeat");
    repeat.recovered = true;

    sessions.save(&session).await.unwrap();
    tasks.save(&fresh).await.unwrap();
    tasks.save(&repeat).await.unwrap();
    db.flush_async().await.unwrap();
    (session, fresh, repeat)
}

#[tokio::test]
async fn test_restart_requeues_interrupted_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let (session, fresh, repeat) = seed_crashed_state(dir.path()).await;

    let mut config = echo_config(RecoveryPolicy::RequeueOnce);
    config.spec.sessions.storage = StorageBackend::Sled;
    config.spec.sessions.data_dir = Some(dir.path().to_path_buf());

    let orchestrator = Orchestrator::build(config).unwrap();
    orchestrator.start().await.unwrap();

    let mut handle = orchestrator.queue().handle(fresh.id).expect("recovered task is queued");
    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let fresh = orchestrator.store().find_task(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, TaskStatus::Completed);
    assert!(fresh.recovered);
    assert_eq!(fresh.result, Some(json!({ "label": "fresh" })));

    let repeat = orchestrator.store().find_task(repeat.id).await.unwrap().unwrap();
    assert_eq!(repeat.status, TaskStatus::Failed);
    assert_eq!(repeat.last_error.unwrap().kind, ErrorKind::Interrupted);

    let tasks = orchestrator.store().session_tasks(session.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status != TaskStatus::Running));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_fail_policy_surfaces_interrupted_tasks() {
    let sessions = Arc::new(InMemorySessionRepository::new());
    let tasks = Arc::new(InMemoryTaskRepository::new());

    let mut session = Session::new();
    let task = running_task(&mut session, "lost");
    sessions.save(&session).await.unwrap();
    tasks.save(&task).await.unwrap();

    let orchestrator =
        Orchestrator::with_repositories(echo_config(RecoveryPolicy::Fail), sessions, tasks.clone()).unwrap();
    orchestrator.start().await.unwrap();

    let stored = tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.last_error.unwrap().kind, ErrorKind::Interrupted);
    assert!(orchestrator.queue().handle(task.id).is_none());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_sessionless_running_task_is_recovered() {
    let sessions = Arc::new(InMemorySessionRepository::new());
    let tasks = Arc::new(InMemoryTaskRepository::new());

    let mut task = Task::new("backend", json!({ "n": 1 }), Priority::High);
    task.start().unwrap();
    tasks.save(&task).await.unwrap();

    let orchestrator =
        Orchestrator::with_repositories(echo_config(RecoveryPolicy::RequeueOnce), sessions, tasks.clone()).unwrap();
    orchestrator.start().await.unwrap();

    let mut handle = orchestrator.queue().handle(task.id).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_archived_session_is_not_recovered() {
    let sessions = Arc::new(InMemorySessionRepository::new());
    let tasks = Arc::new(InMemoryTaskRepository::new());

    let mut session = Session::new();
    let task = running_task(&mut session, "archived");
    session.archive().unwrap();
    sessions.save(&session).await.unwrap();
    tasks.save(&task).await.unwrap();

    let orchestrator =
        Orchestrator::with_repositories(echo_config(RecoveryPolicy::RequeueOnce), sessions, tasks.clone()).unwrap();
    orchestrator.start().await.unwrap();

    assert!(orchestrator.queue().handle(task.id).is_none());
    let stored = tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Running);

    orchestrator.shutdown().await;
}
