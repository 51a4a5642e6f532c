// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use cadence_core::application::handler::{FnHandler, TaskContext};
use cadence_core::application::orchestrator::Orchestrator;
use cadence_core::domain::agent::{AgentCategory, AgentDescriptor, HandlerSpec};
use cadence_core::domain::config::{OrchestratorConfig, StorageBackend};
use cadence_core::domain::task::{TaskError, TaskId, TaskStatus};
use cadence_core::presentation::api;

async fn started() -> (Arc<Orchestrator>, Router) {
    let mut config = OrchestratorConfig::default();
    config.spec.agents = vec![
        AgentDescriptor::new("backend", AgentCategory::Backend, 2)
            .with_commands(["api"])
            .with_handler(HandlerSpec::Echo),
        AgentDescriptor::new("slow", AgentCategory::Specialist, 1).with_queue_capacity(1),
    ];
    config.spec.sessions.storage = StorageBackend::Memory;
    config.spec.queue.drain_timeout = Duration::from_millis(200);

    let orchestrator = Orchestrator::build(config).unwrap();
    // runs until cancelled
    orchestrator.bind_handler(
        "slow",
        Arc::new(FnHandler(|ctx: TaskContext| {
            async move {
                ctx.cancellation.cancelled().await;
                Err::<Value, _>(TaskError::Cancelled)
            }
            .boxed()
        })),
    );
    orchestrator.start().await.unwrap();
    let app = api::app(orchestrator.clone());
    (orchestrator, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn wait_for(orchestrator: &Orchestrator, id: TaskId, status: TaskStatus) {
    for _ in 0..400 {
        if orchestrator.queue().status(id) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} never reached {:?}", id, status);
}

#[tokio::test]
async fn test_health_and_agents() {
    let (orchestrator, app) = started().await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["agents"], 2);

    let (status, body) = send(&app, "GET", "/v1/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_submit_then_fetch_task() {
    let (orchestrator, app) = started().await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/tasks",
        Some(json!({ "target": "/api", "payload": { "route": "/users" }, "priority": "high" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["agent"], "backend");
    let id = TaskId::parse(body["task_id"].as_str().unwrap()).unwrap();

    let mut handle = orchestrator.queue().handle(id).unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Completed);

    let (status, body) = send(&app, "GET", &format!("/v1/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"], json!({ "route": "/users" }));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_error_bodies_carry_kind() {
    let (orchestrator, app) = started().await;

    let (status, body) = send(&app, "POST", "/v1/tasks", Some(json!({ "target": "nobody" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "unknown_agent");
    assert!(body["error"]["message"].as_str().unwrap().contains("nobody"));

    let (status, body) = send(&app, "GET", "/v1/tasks/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("not-a-uuid"));

    let (status, _) = send(&app, "GET", &format!("/v1/tasks/{}", TaskId::new()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "GET", "/v1/mcp/github/health", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["kind"].is_string());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_is_rejected_with_429() {
    let (orchestrator, app) = started().await;
    let submit = json!({ "target": "@agent-slow", "payload": {} });

    let (status, body) = send(&app, "POST", "/v1/tasks", Some(submit.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let running = TaskId::parse(body["task_id"].as_str().unwrap()).unwrap();
    wait_for(&orchestrator, running, TaskStatus::Running).await;

    let (status, body) = send(&app, "POST", "/v1/tasks", Some(submit.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let queued = TaskId::parse(body["task_id"].as_str().unwrap()).unwrap();

    let (status, body) = send(&app, "POST", "/v1/tasks", Some(submit)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["kind"], "backpressure");

    let (status, body) = send(&app, "POST", &format!("/v1/tasks/{}/cancel", queued), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, "POST", &format!("/v1/tasks/{}/cancel", running), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    wait_for(&orchestrator, running, TaskStatus::Cancelled).await;

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (orchestrator, app) = started().await;

    let (status, session) = send(&app, "POST", "/v1/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["status"], "active");
    let session_id = session["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        "/v1/tasks",
        Some(json!({ "target": "backend", "payload": { "n": 1 }, "session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = TaskId::parse(body["task_id"].as_str().unwrap()).unwrap();
    let mut handle = orchestrator.queue().handle(id).unwrap();
    handle.wait().await;

    let (status, body) = send(&app, "GET", &format!("/v1/sessions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["task_ids"], json!([id]));
    assert_eq!(body["tasks"][0]["status"], "completed");

    let (status, body) = send(&app, "POST", &format!("/v1/sessions/{}/archive", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "archived");

    let (status, _) = send(&app, "POST", &format!("/v1/sessions/{}/archive", session_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/tasks",
        Some(json!({ "target": "backend", "session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_status_snapshot() {
    let (orchestrator, app) = started().await;

    let (status, body) = send(&app, "GET", "/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["sequence"].as_u64().is_some());
    let agents: Vec<&str> = body["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(agents, vec!["backend", "slow"]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_draining_health_rejects_new_work() {
    let (orchestrator, app) = started().await;
    orchestrator.shutdown().await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "draining");

    let (status, body) = send(&app, "POST", "/v1/tasks", Some(json!({ "target": "backend" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "shutting_down");
}
