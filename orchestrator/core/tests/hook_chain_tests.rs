// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use cadence_core::application::dispatcher::TaskRequest;
use cadence_core::application::handler::{FnHandler, TaskContext};
use cadence_core::application::hook_engine::HookRunner;
use cadence_core::application::orchestrator::Orchestrator;
use cadence_core::domain::agent::{AgentCategory, AgentDescriptor, HandlerSpec};
use cadence_core::domain::config::{OrchestratorConfig, StorageBackend};
use cadence_core::domain::events::{EventKind, LifecycleEvent};
use cadence_core::domain::hook::{HookAction, HookDescriptor, HookError};
use cadence_core::domain::task::{TaskError, TaskStatus};

fn log_action() -> HookAction {
    HookAction::Log { message: None }
}

fn config(agents: Vec<AgentDescriptor>, hooks: Vec<HookDescriptor>) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.spec.agents = agents;
    config.spec.hooks = hooks;
    config.spec.sessions.storage = StorageBackend::Memory;
    config.spec.queue.drain_timeout = Duration::from_secs(2);
    config.spec.queue.max_retries = 0;
    config
}

fn echo_agent(name: &str) -> AgentDescriptor {
    AgentDescriptor::new(name, AgentCategory::Backend, 1).with_handler(HandlerSpec::Echo)
}

struct Failing;

#[async_trait]
impl HookRunner for Failing {
    async fn run(&self, hook: &HookDescriptor, _event: &LifecycleEvent) -> Result<Option<Value>, HookError> {
        Err(HookError::failed(&hook.name, "policy check rejected the result"))
    }
}

struct Recorder {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl HookRunner for Recorder {
    async fn run(&self, _hook: &HookDescriptor, event: &LifecycleEvent) -> Result<Option<Value>, HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(event.clone());
        Ok(None)
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<LifecycleEvent>, Arc<AtomicUsize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    (
        Arc::new(Recorder {
            tx,
            calls: calls.clone(),
        }),
        rx,
        calls,
    )
}

#[tokio::test]
async fn test_fatal_hook_aborts_chain_and_escalates() {
    let hooks = vec![
        HookDescriptor::new("gate", vec![EventKind::TaskCompleted], 0, log_action()).fatal(),
        HookDescriptor::new("notify", vec![EventKind::TaskCompleted], 10, log_action()),
        HookDescriptor::new("escalate", vec![EventKind::ChainAborted], 0, log_action()),
    ];
    let orchestrator = Orchestrator::build(config(vec![echo_agent("backend")], hooks)).unwrap();

    let (notify, _notify_rx, notify_calls) = recorder();
    let (escalate, mut escalate_rx, _) = recorder();
    orchestrator.hooks().register_runner("gate", Arc::new(Failing));
    orchestrator.hooks().register_runner("notify", notify);
    orchestrator.hooks().register_runner("escalate", escalate);
    orchestrator.start().await.unwrap();

    let mut handle = orchestrator
        .dispatcher()
        .submit(TaskRequest::new("backend", json!({ "q": 1 })))
        .await
        .unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Completed);

    let aborted = tokio::time::timeout(Duration::from_secs(5), escalate_rx.recv())
        .await
        .expect("escalation hook ran")
        .unwrap();
    assert_eq!(aborted.kind, EventKind::ChainAborted);
    assert_eq!(aborted.task_id, Some(handle.id));
    assert_eq!(aborted.agent.as_deref(), Some("backend"));
    assert_eq!(aborted.data["hook"], "gate");
    assert_eq!(aborted.data["trigger"], "task_completed");

    // the hook after the fatal one never ran
    assert_eq!(notify_calls.load(Ordering::SeqCst), 0);

    let health = orchestrator.hooks().hook_health();
    let gate = health.iter().find(|h| h.name == "gate").unwrap();
    assert_eq!(gate.failed, 1);
    assert_eq!(gate.succeeded, 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_session_note_appends_completion_to_context() {
    let hooks = vec![HookDescriptor::new(
        "journal",
        vec![EventKind::TaskCompleted],
        0,
        HookAction::SessionNote { key: "journal".into() },
    )];
    let orchestrator = Orchestrator::build(config(vec![echo_agent("backend")], hooks)).unwrap();
    orchestrator.start().await.unwrap();

    let session = orchestrator.open_session().await.unwrap();
    let mut handle = orchestrator
        .dispatcher()
        .submit(TaskRequest::new("backend", json!({ "step": "lint" })).in_session(session.id))
        .await
        .unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Completed);

    let mut journal = Vec::new();
    for _ in 0..200 {
        let loaded = orchestrator.load_session(session.id).await.unwrap();
        if let Some(entries) = loaded.context.get("journal").and_then(Value::as_array) {
            journal = entries.clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0]["kind"], "task_completed");
    assert_eq!(journal[0]["correlation_id"], handle.id.to_string());

    let loaded = orchestrator.load_session(session.id).await.unwrap();
    assert!(loaded.task_ids.contains(&handle.id));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_failed_task_is_resubmitted_to_fallback_agent() {
    let hooks = vec![HookDescriptor::new(
        "fallback",
        vec![EventKind::TaskCompleted],
        0,
        HookAction::Resubmit { agent: "qa".into() },
    )];
    let orchestrator = Orchestrator::build(config(
        vec![
            AgentDescriptor::new("backend", AgentCategory::Backend, 1),
            AgentDescriptor::new("qa", AgentCategory::Quality, 1),
        ],
        hooks,
    ))
    .unwrap();

    orchestrator.bind_handler(
        "backend",
        Arc::new(FnHandler(|_ctx: TaskContext| {
            async move { Err::<Value, _>(TaskError::Terminal("schema mismatch".into())) }.boxed()
        })),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    orchestrator.bind_handler(
        "qa",
        Arc::new(FnHandler(move |ctx: TaskContext| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ctx.payload.clone());
                Ok::<Value, TaskError>(ctx.payload)
            }
            .boxed()
        })),
    );
    orchestrator.start().await.unwrap();

    let mut handle = orchestrator
        .dispatcher()
        .submit(TaskRequest::new("backend", json!({ "migration": 42 })))
        .await
        .unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Failed);

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("fallback agent received the task")
        .unwrap();
    assert_eq!(payload, json!({ "migration": 42 }));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_successful_task_is_not_resubmitted() {
    let hooks = vec![HookDescriptor::new(
        "fallback",
        vec![EventKind::TaskCompleted],
        0,
        HookAction::Resubmit { agent: "qa".into() },
    )];
    let orchestrator = Orchestrator::build(config(vec![echo_agent("backend"), echo_agent("qa")], hooks)).unwrap();

    orchestrator.start().await.unwrap();

    let mut events = orchestrator.bus().subscribe_kinds(vec![EventKind::TaskQueued]);
    let mut handle = orchestrator
        .dispatcher()
        .submit(TaskRequest::new("backend", json!({})))
        .await
        .unwrap();
    assert_eq!(handle.wait().await, TaskStatus::Completed);

    // the submit above is the only task ever queued
    let first = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert_eq!(first.task_id, Some(handle.id));
    let second = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(second.is_err());

    orchestrator.shutdown().await;
}

/// Counts executions; each one takes `delay`.
struct Slow {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl HookRunner for Slow {
    async fn run(&self, _hook: &HookDescriptor, _event: &LifecycleEvent) -> Result<Option<Value>, HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

#[tokio::test]
async fn test_duplicate_bus_events_coalesce_while_pending() {
    let hooks = vec![HookDescriptor::new("greet", vec![EventKind::SessionStarted], 0, log_action())];
    let orchestrator = Orchestrator::build(config(vec![echo_agent("backend")], hooks)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    orchestrator.hooks().register_runner(
        "greet",
        Arc::new(Slow {
            calls: calls.clone(),
            delay: Duration::from_millis(100),
        }),
    );
    orchestrator.start().await.unwrap();

    let event = LifecycleEvent::new(EventKind::SessionStarted, "session-7");
    orchestrator.bus().publish(event.clone());
    orchestrator.bus().publish(event.clone());
    orchestrator.bus().publish(event.clone());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // once the chain has finished the same pair runs again
    orchestrator.bus().publish(event);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    orchestrator.shutdown().await;
}
