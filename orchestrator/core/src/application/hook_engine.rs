// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hook Chain Engine
//!
//! Reacts to lifecycle events by running the chain of hooks subscribed to
//! the event's kind.
//!
//! ## Chain execution
//!
//! Hooks run in ascending `order`. Consecutive parallel-safe hooks sharing
//! an order index run together and the chain waits for all of them before
//! moving on. Every execution holds a permit from a shared pool and is
//! bounded by its own timeout. A failing fatal hook aborts the chain: later
//! hooks are recorded as skipped and a `ChainAborted` event is published,
//! unless the chain was itself triggered by `ChainAborted`.
//!
//! ## Ordering and exclusivity
//!
//! Events are routed into per-correlation lanes, so events about one task
//! are handled in publication order while chains for different tasks
//! interleave. An event whose `(kind, correlation_id)` pair is already
//! queued or running in its lane is coalesced into the pending one, and a
//! guard in [`HookEngine::run_chain`] rejects a second concurrent chain for
//! the same pair.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::{TaskDispatcher, TaskRequest};
use crate::application::mcp_gateway::McpGateway;
use crate::application::session_store::SessionStore;
use crate::domain::errors::ErrorKind;
use crate::domain::events::{EventKind, LifecycleEvent};
use crate::domain::hook::{
    ChainStatus, HookAction, HookChain, HookDescriptor, HookError, HookExecution, HookOutcome,
};
use crate::domain::status::{ChainTally, HookHealth};
use crate::domain::task::Priority;
use crate::infrastructure::event_bus::{EventBus, EventBusError};
use crate::infrastructure::process::{run_command, CommandSpec};

/// Executes one hook for one event. Returns optional side-channel output.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, hook: &HookDescriptor, event: &LifecycleEvent) -> Result<Option<Value>, HookError>;
}

/// Collaborators available to the built-in hook actions.
#[derive(Clone)]
pub struct HookContext {
    pub gateway: Arc<McpGateway>,
    pub store: Arc<SessionStore>,
    pub dispatcher: Arc<TaskDispatcher>,
}

/// Runs the configured [`HookAction`] of a descriptor.
pub struct ActionRunner {
    context: HookContext,
}

impl ActionRunner {
    pub fn new(context: HookContext) -> Self {
        Self { context }
    }
}

/// Replace `{{event}}` string values with the event document and expand
/// `{{correlation_id}}` / `{{agent}}` / `{{kind}}` inside strings.
fn render_args(args: &Value, event: &LifecycleEvent, event_doc: &Value) -> Value {
    match args {
        Value::String(s) if s == "{{event}}" => event_doc.clone(),
        Value::String(s) => Value::String(
            s.replace("{{correlation_id}}", &event.correlation_id)
                .replace("{{agent}}", event.agent.as_deref().unwrap_or(""))
                .replace("{{kind}}", &event.kind.to_string()),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_args(v, event, event_doc)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_args(v, event, event_doc)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl HookRunner for ActionRunner {
    async fn run(&self, hook: &HookDescriptor, event: &LifecycleEvent) -> Result<Option<Value>, HookError> {
        let event_doc = serde_json::to_value(event).map_err(|e| HookError::failed(&hook.name, e.to_string()))?;

        match &hook.action {
            HookAction::Command { program, args, env } => {
                let spec = CommandSpec {
                    program: program.clone(),
                    args: args.clone(),
                    env: env.clone(),
                    working_dir: None,
                };
                let output = run_command(&spec, &event_doc)
                    .await
                    .map_err(|e| HookError::failed(&hook.name, format!("failed to run '{}': {}", program, e)))?;
                if !output.success() {
                    return Err(HookError::failed(
                        &hook.name,
                        format!("exit status {:?}: {}", output.code, output.stderr.trim()),
                    ));
                }
                Ok(output.value())
            }
            HookAction::McpInvoke { server, tool, args } => {
                let arguments = render_args(args, event, &event_doc);
                let result = self
                    .context
                    .gateway
                    .invoke(server, tool, arguments, Some(hook.timeout))
                    .await
                    .map_err(|e| HookError::failed(&hook.name, e.to_string()))?;
                Ok(Some(result))
            }
            HookAction::SessionNote { key } => {
                let Some(session_id) = event.session_id else {
                    debug!(hook = %hook.name, "Event has no session; note skipped");
                    return Ok(None);
                };
                self.context
                    .store
                    .update_context(session_id, key, event_doc)
                    .await
                    .map_err(|e| HookError::failed(&hook.name, e.to_string()))?;
                Ok(None)
            }
            HookAction::Resubmit { agent } => {
                if !event.is_failure() {
                    return Ok(None);
                }
                let payload = event.data.get("payload").cloned().unwrap_or(Value::Null);
                let priority: Priority = event
                    .data
                    .get("priority")
                    .and_then(|p| serde_json::from_value(p.clone()).ok())
                    .unwrap_or_default();
                let mut request = TaskRequest::new(agent.clone(), payload).with_priority(priority);
                request.session_id = event.session_id;

                let handle = self
                    .context
                    .dispatcher
                    .submit(request)
                    .await
                    .map_err(|e| HookError::failed(&hook.name, e.to_string()))?;
                info!(
                    hook = %hook.name,
                    failed_task = %event.correlation_id,
                    task_id = %handle.id,
                    agent = %agent,
                    "Resubmitted failed task to fallback agent"
                );
                Ok(Some(json!({ "task_id": handle.id, "agent": agent })))
            }
            HookAction::Log { message } => {
                info!(
                    hook = %hook.name,
                    event = %event.kind,
                    correlation_id = %event.correlation_id,
                    agent = event.agent.as_deref().unwrap_or(""),
                    outcome = ?event.outcome,
                    "{}",
                    message.as_deref().unwrap_or("lifecycle event")
                );
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HookCounters {
    succeeded: u64,
    failed: u64,
}

/// Releases the `(kind, correlation_id)` slot when the chain ends.
struct ChainGuard<'a> {
    active: &'a DashSet<(EventKind, String)>,
    key: (EventKind, String),
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

pub struct HookEngine {
    descriptors: RwLock<Arc<Vec<HookDescriptor>>>,
    runners: RwLock<HashMap<String, Arc<dyn HookRunner>>>,
    default_runner: Arc<dyn HookRunner>,
    pool: Arc<Semaphore>,
    active: DashSet<(EventKind, String)>,
    pending: DashSet<(EventKind, String)>,
    lanes: DashMap<String, mpsc::UnboundedSender<LifecycleEvent>>,
    counters: Mutex<HashMap<String, HookCounters>>,
    tally: Mutex<ChainTally>,
    bus: EventBus,
}

impl HookEngine {
    pub fn new(
        descriptors: Vec<HookDescriptor>,
        default_runner: Arc<dyn HookRunner>,
        workers: usize,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptors: RwLock::new(Arc::new(descriptors)),
            runners: RwLock::new(HashMap::new()),
            default_runner,
            pool: Arc::new(Semaphore::new(workers.max(1))),
            active: DashSet::new(),
            pending: DashSet::new(),
            lanes: DashMap::new(),
            counters: Mutex::new(HashMap::new()),
            tally: Mutex::new(ChainTally::default()),
            bus,
        })
    }

    /// Swap the descriptor set. Chains already running keep their snapshot.
    pub fn replace(&self, descriptors: Vec<HookDescriptor>) {
        info!(hooks = descriptors.len(), "Hook set replaced");
        *self.descriptors.write() = Arc::new(descriptors);
    }

    pub fn descriptors(&self) -> Arc<Vec<HookDescriptor>> {
        Arc::clone(&*self.descriptors.read())
    }

    /// Route executions of the hook named `hook` to `runner` instead of its
    /// configured action.
    pub fn register_runner(&self, hook: impl Into<String>, runner: Arc<dyn HookRunner>) {
        self.runners.write().insert(hook.into(), runner);
    }

    fn runner_for(&self, hook: &str) -> Arc<dyn HookRunner> {
        self.runners
            .read()
            .get(hook)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_runner))
    }

    /// Per-hook success/failure counters, sorted by hook name.
    pub fn hook_health(&self) -> Vec<HookHealth> {
        let mut health: Vec<HookHealth> = self
            .counters
            .lock()
            .iter()
            .map(|(name, c)| {
                let total = c.succeeded + c.failed;
                HookHealth {
                    name: name.clone(),
                    succeeded: c.succeeded,
                    failed: c.failed,
                    success_rate: if total == 0 { 1.0 } else { c.succeeded as f64 / total as f64 },
                }
            })
            .collect();
        health.sort_by(|a, b| a.name.cmp(&b.name));
        health
    }

    /// Chain outcomes since the previous call.
    pub fn take_chain_tally(&self) -> ChainTally {
        std::mem::take(&mut *self.tally.lock())
    }

    /// Run the chain for `event` to completion.
    pub async fn run_chain(&self, event: &LifecycleEvent) -> Result<HookChain, HookError> {
        let key = (event.kind, event.correlation_id.clone());
        if !self.active.insert(key.clone()) {
            return Err(HookError::ChainAlreadyRunning {
                kind: event.kind,
                correlation_id: event.correlation_id.clone(),
            });
        }
        let _guard = ChainGuard {
            active: &self.active,
            key,
        };

        let snapshot = self.descriptors();
        let mut hooks: Vec<&HookDescriptor> = snapshot.iter().filter(|h| h.subscribes_to(event.kind)).collect();
        hooks.sort_by_key(|h| h.order);

        let mut chain = HookChain::new(event.kind, event.correlation_id.clone());
        chain
            .start()
            .map_err(|e| HookError::failed("chain", e.to_string()))?;
        if hooks.is_empty() {
            chain.finish().map_err(|e| HookError::failed("chain", e.to_string()))?;
            return Ok(chain);
        }
        debug!(event = %event.kind, correlation_id = %event.correlation_id, hooks = hooks.len(), "Running hook chain");

        let mut index = 0;
        let mut aborted_by: Option<String> = None;
        while index < hooks.len() {
            let batch = next_batch(&hooks[index..]);
            index += batch.len();

            let executions = futures::future::join_all(batch.iter().map(|hook| self.execute(hook, event))).await;
            for execution in executions {
                if aborted_by.is_none() && execution.fatal && execution.outcome.is_failure() {
                    aborted_by = Some(execution.hook.clone());
                }
                chain.record(execution);
            }

            if let Some(hook) = &aborted_by {
                for skipped in &hooks[index..] {
                    chain.record(HookExecution::skipped(skipped));
                }
                chain
                    .abort(hook)
                    .map_err(|e| HookError::failed(hook.as_str(), e.to_string()))?;
                break;
            }
        }

        if chain.status == ChainStatus::Running {
            chain.finish().map_err(|e| HookError::failed("chain", e.to_string()))?;
        }
        self.settle_chain(&chain, event);
        Ok(chain)
    }

    fn settle_chain(&self, chain: &HookChain, event: &LifecycleEvent) {
        {
            let mut tally = self.tally.lock();
            match chain.status {
                ChainStatus::Completed => tally.completed += 1,
                ChainStatus::PartiallyFailed => tally.partially_failed += 1,
                ChainStatus::Aborted => tally.aborted += 1,
                ChainStatus::Pending | ChainStatus::Running => {}
            }
        }
        let status = match chain.status {
            ChainStatus::Completed => "completed",
            ChainStatus::PartiallyFailed => "partially_failed",
            ChainStatus::Aborted => "aborted",
            ChainStatus::Pending | ChainStatus::Running => "running",
        };
        metrics::counter!("cadence_hook_chains_total", "status" => status).increment(1);

        match (&chain.aborted_by, chain.status) {
            (Some(hook), ChainStatus::Aborted) => {
                warn!(
                    chain_id = %chain.id,
                    event = %event.kind,
                    correlation_id = %event.correlation_id,
                    hook = %hook,
                    "Hook chain aborted"
                );
                if event.kind == EventKind::ChainAborted {
                    debug!(chain_id = %chain.id, "Abort of a ChainAborted chain is not re-published");
                    return;
                }
                let mut aborted = LifecycleEvent::new(EventKind::ChainAborted, event.correlation_id.clone())
                    .with_data(json!({
                        "chain_id": chain.id,
                        "trigger": event.kind,
                        "hook": hook,
                    }));
                aborted.task_id = event.task_id;
                aborted.agent = event.agent.clone();
                aborted.session_id = event.session_id;
                self.bus.publish(aborted);
            }
            _ => debug!(chain_id = %chain.id, status, "Hook chain finished"),
        }
    }

    async fn execute(&self, hook: &HookDescriptor, event: &LifecycleEvent) -> HookExecution {
        let mut execution = HookExecution::skipped(hook);
        let _permit = match self.pool.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                execution.outcome = HookOutcome::Failed {
                    kind: ErrorKind::ShuttingDown,
                    message: "hook pool closed".to_string(),
                };
                return execution;
            }
        };

        let runner = self.runner_for(&hook.name);
        execution.started_at = Some(Utc::now());
        let result = match tokio::time::timeout(hook.timeout, runner.run(hook, event)).await {
            Ok(result) => result,
            Err(_) => Err(HookError::Timeout {
                hook: hook.name.clone(),
                timeout: hook.timeout,
            }),
        };
        execution.finished_at = Some(Utc::now());

        execution.outcome = match result {
            Ok(output) => {
                execution.output = output;
                HookOutcome::Succeeded
            }
            Err(HookError::Timeout { .. }) => {
                warn!(hook = %hook.name, timeout = ?hook.timeout, event = %event.kind, "Hook timed out");
                HookOutcome::TimedOut
            }
            Err(e) => {
                if hook.fatal {
                    error!(hook = %hook.name, event = %event.kind, error = %e, "Fatal hook failed");
                } else {
                    warn!(hook = %hook.name, event = %event.kind, error = %e, "Hook failed");
                }
                HookOutcome::Failed {
                    kind: e.kind(hook.fatal),
                    message: e.to_string(),
                }
            }
        };

        let failed = execution.outcome.is_failure();
        {
            let mut counters = self.counters.lock();
            let entry = counters.entry(hook.name.clone()).or_default();
            if failed {
                entry.failed += 1;
            } else {
                entry.succeeded += 1;
            }
        }
        metrics::counter!(
            "cadence_hook_executions_total",
            "hook" => hook.name.clone(),
            "outcome" => if failed { "failed" } else { "succeeded" }
        )
        .increment(1);
        execution
    }

    /// Hand an event to its correlation lane, starting the lane if idle.
    /// Duplicates of an event still queued or running are dropped.
    fn route(self: &Arc<Self>, event: LifecycleEvent) {
        let correlation_id = event.correlation_id.clone();
        if !self.pending.insert((event.kind, correlation_id.clone())) {
            debug!(kind = %event.kind, correlation_id = %correlation_id, "Duplicate event coalesced");
            metrics::counter!("cadence_hook_events_coalesced_total").increment(1);
            return;
        }
        let mut lane = self.lanes.entry(correlation_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let engine = Arc::clone(self);
            let key = correlation_id.clone();
            tokio::spawn(async move { engine.drain_lane(key, rx).await });
            tx
        });
        if let Err(e) = lane.value_mut().send(event) {
            error!(correlation_id = %correlation_id, error = %e, "Hook lane closed unexpectedly");
            self.pending.remove(&(e.0.kind, correlation_id));
        }
    }

    async fn handle(&self, correlation_id: &str, event: LifecycleEvent) {
        if let Err(e) = self.run_chain(&event).await {
            warn!(correlation_id = %correlation_id, error = %e, "Hook chain not run");
        }
        self.pending.remove(&(event.kind, event.correlation_id));
    }

    async fn drain_lane(self: Arc<Self>, correlation_id: String, mut rx: mpsc::UnboundedReceiver<LifecycleEvent>) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.handle(&correlation_id, event).await,
                Err(_) => {
                    // retire only if nothing arrived since the last check
                    if self
                        .lanes
                        .remove_if(&correlation_id, |_, _| rx.is_empty())
                        .is_some()
                    {
                        return;
                    }
                    match rx.recv().await {
                        Some(event) => self.handle(&correlation_id, event).await,
                        None => return,
                    }
                }
            }
        }
    }

    /// Consume lifecycle events from the bus until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = self.bus.subscribe();
        tokio::spawn(async move {
            info!("Hook engine started");
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => engine.route(event),
                        Err(EventBusError::Lagged(n)) => {
                            warn!(dropped = n, "Hook engine lagged; events skipped");
                        }
                        Err(EventBusError::Closed) => break,
                        Err(EventBusError::Empty) => {}
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            engine.pool.close();
            info!("Hook engine stopped");
        })
    }
}

/// Leading run of `hooks` that executes as one step: a single hook, or
/// every consecutive parallel-safe hook sharing the first one's order.
fn next_batch<'a, 'h>(hooks: &'a [&'h HookDescriptor]) -> &'a [&'h HookDescriptor] {
    let first = hooks[0];
    if !first.parallel_safe {
        return &hooks[..1];
    }
    let len = hooks
        .iter()
        .take_while(|h| h.parallel_safe && h.order == first.order)
        .count();
    &hooks[..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl HookRunner for Recording {
        async fn run(&self, hook: &HookDescriptor, _event: &LifecycleEvent) -> Result<Option<Value>, HookError> {
            self.log.lock().push(format!("start:{}", hook.name));
            tokio::time::sleep(self.delay).await;
            self.log.lock().push(format!("end:{}", hook.name));
            if self.fail {
                Err(HookError::failed(&hook.name, "boom"))
            } else {
                Ok(None)
            }
        }
    }

    struct Noop;

    #[async_trait]
    impl HookRunner for Noop {
        async fn run(&self, _hook: &HookDescriptor, _event: &LifecycleEvent) -> Result<Option<Value>, HookError> {
            Ok(None)
        }
    }

    fn hook(name: &str, order: u32) -> HookDescriptor {
        HookDescriptor::new(
            name,
            vec![EventKind::TaskCompleted],
            order,
            HookAction::Log { message: None },
        )
    }

    fn engine(hooks: Vec<HookDescriptor>, log: &Arc<Mutex<Vec<String>>>, failing: &[&str]) -> Arc<HookEngine> {
        let engine = HookEngine::new(hooks.clone(), Arc::new(Noop), 4, EventBus::new(32));
        for h in hooks {
            engine.register_runner(
                h.name.clone(),
                Arc::new(Recording {
                    log: log.clone(),
                    fail: failing.contains(&h.name.as_str()),
                    delay: Duration::from_millis(10),
                }),
            );
        }
        engine
    }

    fn event() -> LifecycleEvent {
        LifecycleEvent::new(EventKind::TaskCompleted, "task-1")
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(vec![hook("c", 30), hook("a", 10), hook("b", 20)], &log, &[]);

        let chain = engine.run_chain(&event()).await.unwrap();
        assert_eq!(chain.status, ChainStatus::Completed);
        assert_eq!(
            *log.lock(),
            vec!["start:a", "end:a", "start:b", "end:b", "start:c", "end:c"]
        );
    }

    #[tokio::test]
    async fn test_non_fatal_failure_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(vec![hook("a", 1), hook("b", 2)], &log, &["a"]);

        let chain = engine.run_chain(&event()).await.unwrap();
        assert_eq!(chain.status, ChainStatus::PartiallyFailed);
        assert_eq!(chain.executions.len(), 2);
        assert_eq!(engine.hook_health()[0].failed, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_rest_and_publishes_abort() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(vec![hook("guard", 1).fatal(), hook("later", 2)], &log, &["guard"]);
        let mut events = engine.bus.subscribe();

        let chain = engine.run_chain(&event()).await.unwrap();
        assert_eq!(chain.status, ChainStatus::Aborted);
        assert_eq!(chain.aborted_by.as_deref(), Some("guard"));
        assert_eq!(chain.executions[1].outcome, HookOutcome::Skipped);
        assert!(!log.lock().iter().any(|l| l.ends_with(":later")));

        let aborted = events.recv().await.unwrap();
        assert_eq!(aborted.kind, EventKind::ChainAborted);
        assert_eq!(aborted.correlation_id, "task-1");
        assert_eq!(engine.take_chain_tally().aborted, 1);
        assert_eq!(engine.take_chain_tally().total(), 0);
    }

    #[tokio::test]
    async fn test_aborting_chain_aborted_chain_is_not_republished() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut guard = hook("guard", 1).fatal();
        guard.triggers = vec![EventKind::ChainAborted];
        let engine = engine(vec![guard], &log, &["guard"]);
        let mut events = engine.bus.subscribe();

        let chain = engine
            .run_chain(&LifecycleEvent::new(EventKind::ChainAborted, "task-1"))
            .await
            .unwrap();
        assert_eq!(chain.status, ChainStatus::Aborted);
        assert!(matches!(events.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_parallel_safe_hooks_share_a_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(
            vec![hook("p1", 5).parallel_safe(), hook("p2", 5).parallel_safe(), hook("tail", 6)],
            &log,
            &[],
        );

        engine.run_chain(&event()).await.unwrap();
        let log = log.lock();
        // both parallel hooks start before either ends, tail waits for both
        assert!(log[..2].iter().all(|l| l.starts_with("start:p")));
        assert_eq!(log[4], "start:tail");
    }

    #[tokio::test]
    async fn test_hook_timeout_is_failure() {
        struct Slow;

        #[async_trait]
        impl HookRunner for Slow {
            async fn run(&self, _: &HookDescriptor, _: &LifecycleEvent) -> Result<Option<Value>, HookError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }
        }

        let slow = hook("slow", 1).with_timeout(Duration::from_millis(20)).fatal();
        let engine = HookEngine::new(vec![slow], Arc::new(Slow), 1, EventBus::new(8));
        let chain = engine.run_chain(&event()).await.unwrap();
        assert_eq!(chain.executions[0].outcome, HookOutcome::TimedOut);
        assert_eq!(chain.status, ChainStatus::Aborted);
    }

    #[tokio::test]
    async fn test_concurrent_chain_for_same_pair_is_rejected() {
        struct Gate(Arc<tokio::sync::Notify>, Arc<AtomicUsize>);

        #[async_trait]
        impl HookRunner for Gate {
            async fn run(&self, _: &HookDescriptor, _: &LifecycleEvent) -> Result<Option<Value>, HookError> {
                self.1.fetch_add(1, Ordering::SeqCst);
                self.0.notified().await;
                Ok(None)
            }
        }

        let gate = Arc::new(tokio::sync::Notify::new());
        let entered = Arc::new(AtomicUsize::new(0));
        let engine = HookEngine::new(
            vec![hook("gate", 1)],
            Arc::new(Gate(gate.clone(), entered.clone())),
            2,
            EventBus::new(8),
        );

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_chain(&event()).await })
        };
        while entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let second = engine.run_chain(&event()).await;
        assert!(matches!(second, Err(HookError::ChainAlreadyRunning { .. })));

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap().status, ChainStatus::Completed);
        // slot released
        gate.notify_one();
        assert!(engine.run_chain(&event()).await.is_ok());
    }

    #[test]
    fn test_render_args() {
        let event = LifecycleEvent::new(EventKind::TaskCompleted, "t-9");
        let doc = serde_json::to_value(&event).unwrap();
        let rendered = render_args(
            &json!({"text": "task {{correlation_id}} done", "event": "{{event}}", "n": 1}),
            &event,
            &doc,
        );
        assert_eq!(rendered["text"], "task t-9 done");
        assert_eq!(rendered["event"]["correlation_id"], "t-9");
        assert_eq!(rendered["n"], 1);
    }
}
