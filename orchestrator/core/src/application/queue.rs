// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Queue & Concurrency Controller
//!
//! One lane per agent. Each lane holds three FIFO deques (high, normal,
//! low) and a fixed set of long-lived workers; a worker only takes a task
//! while the lane's `running` count is below the agent's concurrency limit,
//! so in-flight work never exceeds `C`.
//!
//! ## Dispatch order
//!
//! Higher classes go first, except that while a low-priority task waits at
//! least one in `low_priority_share` dispatches is served from the low deque.
//!
//! ## Task ownership
//!
//! The live [`Task`] record sits in `tasks`; only the worker executing it
//! (or the backoff timer holding it) transitions it. `cancel` never mutates
//! a running task directly, it fires the task's cancellation token and lets
//! the owner settle the outcome.
//!
//! ## Persistence
//!
//! Every transition is followed by `persist`, which writes the *current*
//! record under a per-task mutex so a slow earlier write can never land
//! after a newer one.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::handler::TaskContext;
use crate::application::registry::{normalize, AgentRegistry};
use crate::application::session_store::SessionStore;
use crate::domain::agent::AgentDescriptor;
use crate::domain::config::QueueConfig;
use crate::domain::errors::ErrorKind;
use crate::domain::events::LifecycleEvent;
use crate::domain::task::{Priority, Task, TaskError, TaskId, TaskOutcome, TaskStatus};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{0}' is disabled")]
    AgentDisabled(String),

    #[error("queue for '{agent}' is full ({depth} pending)")]
    Backpressure { agent: String, depth: usize },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("queue is shutting down")]
    ShuttingDown,
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAgent(_) => ErrorKind::UnknownAgent,
            Self::AgentDisabled(_) => ErrorKind::AgentDisabled,
            Self::Backpressure { .. } => ErrorKind::Backpressure,
            Self::TaskNotFound(_) => ErrorKind::Terminal,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// Caller-side view of a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub agent: String,
    status: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait(&mut self) -> TaskStatus {
        loop {
            let status = *self.status.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.status.changed().await.is_err() {
                return *self.status.borrow();
            }
        }
    }

    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<TaskStatus> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

/// Queue depth of one agent at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneDepth {
    pub queued: usize,
    pub running: usize,
}

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
    persist_lock: Arc<tokio::sync::Mutex<()>>,
    in_backoff: bool,
}

#[derive(Default)]
struct LaneState {
    high: VecDeque<TaskId>,
    normal: VecDeque<TaskId>,
    low: VecDeque<TaskId>,
    /// Non-low dispatches since the low class was last served
    since_low: u32,
    running: usize,
    limit: usize,
    capacity: usize,
    workers: usize,
}

impl LaneState {
    fn depth(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn push(&mut self, id: TaskId, priority: Priority) {
        match priority {
            Priority::High => self.high.push_back(id),
            Priority::Normal => self.normal.push_back(id),
            Priority::Low => self.low.push_back(id),
        }
    }

    fn pop(&mut self, low_share: u32) -> Option<TaskId> {
        if !self.low.is_empty() && self.since_low + 1 >= low_share {
            self.since_low = 0;
            return self.low.pop_front();
        }
        if let Some(id) = self.high.pop_front().or_else(|| self.normal.pop_front()) {
            self.since_low = if self.low.is_empty() { 0 } else { self.since_low + 1 };
            return Some(id);
        }
        self.since_low = 0;
        self.low.pop_front()
    }

    fn remove(&mut self, id: TaskId) -> bool {
        for deque in [&mut self.high, &mut self.normal, &mut self.low] {
            if let Some(pos) = deque.iter().position(|queued| *queued == id) {
                deque.remove(pos);
                return true;
            }
        }
        false
    }

    fn drain_all(&mut self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.high.drain(..).collect();
        ids.extend(self.normal.drain(..));
        ids.extend(self.low.drain(..));
        ids
    }
}

struct Lane {
    agent: String,
    state: Mutex<LaneState>,
    /// New work or a freed slot
    work: Notify,
    /// Room in the pending queue for blocked submitters
    space: Notify,
}

enum Settlement {
    Terminal(TaskOutcome),
    Retry { attempt: u32, delay: Duration },
}

pub struct ExecutionQueue {
    registry: Arc<AgentRegistry>,
    store: Arc<SessionStore>,
    bus: EventBus,
    config: QueueConfig,
    lanes: RwLock<HashMap<String, Arc<Lane>>>,
    tasks: DashMap<TaskId, TaskEntry>,
    accepting: AtomicBool,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionQueue {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<SessionStore>,
        bus: EventBus,
        config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            bus,
            config,
            lanes: RwLock::new(HashMap::new()),
            tasks: DashMap::new(),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create lanes for every registered agent, apply current limits and
    /// spawn missing workers. Safe to call again after a registry reload.
    pub fn sync_lanes(self: &Arc<Self>) {
        for record in self.registry.records() {
            let descriptor = &record.descriptor;
            let lane = self.lane_for(&descriptor.name);
            let capacity = descriptor.queue_capacity.unwrap_or(self.config.default_capacity);

            let spawn_from = {
                let mut state = lane.state.lock();
                state.limit = descriptor.max_concurrency;
                state.capacity = capacity;
                let from = state.workers;
                state.workers = state.workers.max(descriptor.max_concurrency);
                from..state.workers
            };

            for index in spawn_from {
                let queue = Arc::clone(self);
                let lane = Arc::clone(&lane);
                let handle = tokio::spawn(async move { queue.worker_loop(lane, index).await });
                self.workers.lock().push(handle);
            }
            // limits may have grown
            lane.work.notify_waiters();
            lane.space.notify_waiters();
        }
    }

    /// Lower lane limits ahead of a registry reload so no worker admits a
    /// task under a limit that is about to shrink. Raising is left to
    /// [`Self::sync_lanes`]. Tasks already running above the new limit finish.
    pub fn lower_limits(&self, descriptors: &[AgentDescriptor]) {
        let lanes = self.lanes.read();
        for descriptor in descriptors {
            if let Some(lane) = lanes.get(&normalize(&descriptor.name)) {
                let mut state = lane.state.lock();
                if descriptor.max_concurrency < state.limit {
                    debug!(agent = %lane.agent, from = state.limit, to = descriptor.max_concurrency, "Lowering lane limit");
                    state.limit = descriptor.max_concurrency;
                }
            }
        }
    }

    fn lane_for(&self, agent: &str) -> Arc<Lane> {
        if let Some(lane) = self.lanes.read().get(agent) {
            return Arc::clone(lane);
        }
        let mut lanes = self.lanes.write();
        Arc::clone(lanes.entry(agent.to_string()).or_insert_with(|| {
            Arc::new(Lane {
                agent: agent.to_string(),
                state: Mutex::new(LaneState {
                    capacity: self.config.default_capacity,
                    ..LaneState::default()
                }),
                work: Notify::new(),
                space: Notify::new(),
            })
        }))
    }

    fn lane(&self, agent: &str) -> Option<Arc<Lane>> {
        self.lanes.read().get(agent).cloned()
    }

    /// Admit a task to its agent's lane. With `wait` set, a full lane is
    /// waited on for at most that long before `Backpressure` is returned.
    pub async fn enqueue(&self, task: Task, wait: Option<Duration>) -> Result<TaskHandle, QueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }
        let record = self
            .registry
            .record(&task.agent)
            .ok_or_else(|| QueueError::UnknownAgent(task.agent.clone()))?;
        if !record.descriptor.enabled {
            return Err(QueueError::AgentDisabled(task.agent.clone()));
        }
        let lane = self
            .lane(&record.descriptor.name)
            .ok_or_else(|| QueueError::UnknownAgent(task.agent.clone()))?;

        let deadline = wait.map(|d| tokio::time::Instant::now() + d);
        let id = task.id;
        let agent = task.agent.clone();
        let priority = task.priority;
        let (status_tx, status_rx) = watch::channel(TaskStatus::Queued);
        let mut pending = Some(TaskEntry {
            task,
            cancel: self.shutdown.child_token(),
            status_tx,
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
            in_backoff: false,
        });

        loop {
            let space = lane.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            let depth = {
                let mut state = lane.state.lock();
                let depth = state.depth();
                if depth < state.capacity {
                    if let Some(entry) = pending.take() {
                        // published before the id is visible to a worker
                        self.bus.publish(LifecycleEvent::task_queued(&entry.task));
                        self.tasks.insert(id, entry);
                    }
                    state.push(id, priority);
                    None
                } else {
                    Some(depth)
                }
            };

            let Some(depth) = depth else { break };
            let rejected = match deadline {
                None => true,
                Some(deadline) => tokio::time::timeout_at(deadline, space).await.is_err(),
            };
            if rejected {
                warn!(agent = %agent, depth, "Queue full; rejecting task");
                metrics::counter!("cadence_tasks_rejected_total", "agent" => agent.clone()).increment(1);
                return Err(QueueError::Backpressure { agent, depth });
            }
        }

        lane.work.notify_waiters();
        debug!(task_id = %id, agent = %agent, ?priority, "Task queued");
        metrics::counter!("cadence_tasks_submitted_total", "agent" => agent.clone()).increment(1);

        self.persist(id).await;

        Ok(TaskHandle {
            id,
            agent,
            status: status_rx,
        })
    }

    /// Re-admit a task produced by restart recovery. Bypasses the capacity
    /// bound: the task was admitted once already.
    pub async fn enqueue_recovered(&self, task: Task) -> Result<TaskHandle, QueueError> {
        let lane = self
            .lane(&task.agent)
            .ok_or_else(|| QueueError::UnknownAgent(task.agent.clone()))?;
        let id = task.id;
        let agent = task.agent.clone();
        let priority = task.priority;
        let (status_tx, status_rx) = watch::channel(TaskStatus::Queued);
        {
            let mut state = lane.state.lock();
            self.tasks.insert(
                id,
                TaskEntry {
                    task,
                    cancel: self.shutdown.child_token(),
                    status_tx,
                    persist_lock: Arc::new(tokio::sync::Mutex::new(())),
                    in_backoff: false,
                },
            );
            state.push(id, priority);
        }
        lane.work.notify_waiters();
        info!(task_id = %id, agent = %agent, "Recovered task re-queued");
        self.persist(id).await;
        Ok(TaskHandle {
            id,
            agent,
            status: status_rx,
        })
    }

    /// Cancel a task. Returns the status right after the request: `Cancelled`
    /// when it was still queued, `Running` when the handler was signalled.
    pub async fn cancel(&self, id: TaskId) -> Result<TaskStatus, QueueError> {
        let (status, agent, in_backoff) = {
            let entry = self.tasks.get(&id).ok_or(QueueError::TaskNotFound(id))?;
            let status = entry.task.status;
            if status.is_terminal() {
                return Ok(status);
            }
            entry.cancel.cancel();
            (status, entry.task.agent.clone(), entry.in_backoff)
        };

        if status == TaskStatus::Queued && !in_backoff {
            let removed = self
                .lane(&agent)
                .map(|lane| {
                    let removed = lane.state.lock().remove(id);
                    if removed {
                        lane.space.notify_waiters();
                    }
                    removed
                })
                .unwrap_or(false);
            if removed {
                info!(task_id = %id, agent = %agent, "Queued task cancelled");
                self.settle_cancelled(id).await;
                return Ok(TaskStatus::Cancelled);
            }
        }
        info!(task_id = %id, agent = %agent, ?status, "Cancellation signalled");
        Ok(self.status(id).unwrap_or(status))
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|e| e.task.status)
    }

    /// Live record, falling back to the persisted one.
    pub async fn get(&self, id: TaskId) -> Option<Task> {
        if let Some(task) = self.snapshot(id) {
            return Some(task);
        }
        match self.store.find_task(id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %id, error = %e, "Task lookup failed");
                None
            }
        }
    }

    pub fn handle(&self, id: TaskId) -> Option<TaskHandle> {
        self.tasks.get(&id).map(|entry| TaskHandle {
            id,
            agent: entry.task.agent.clone(),
            status: entry.status_tx.subscribe(),
        })
    }

    fn snapshot(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|e| e.task.clone())
    }

    pub fn depths(&self) -> HashMap<String, LaneDepth> {
        self.lanes
            .read()
            .iter()
            .map(|(name, lane)| {
                let state = lane.state.lock();
                (
                    name.clone(),
                    LaneDepth {
                        queued: state.depth(),
                        running: state.running,
                    },
                )
            })
            .collect()
    }

    fn in_backoff_count(&self) -> usize {
        self.tasks.iter().filter(|e| e.in_backoff).count()
    }

    /// Drop terminal records older than the retention window from memory.
    pub fn evict_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = chrono::Utc::now() - retention;
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| {
            !(entry.task.status.is_terminal() && entry.task.finished_at.is_some_and(|f| f < cutoff))
        });
        before - self.tasks.len()
    }

    async fn persist(&self, id: TaskId) {
        let Some(lock) = self.tasks.get(&id).map(|e| Arc::clone(&e.persist_lock)) else {
            return;
        };
        let _guard = lock.lock().await;
        if let Some(task) = self.snapshot(id) {
            if let Err(e) = self.store.record_task(&task).await {
                warn!(task_id = %id, error = %e, "Failed to persist task");
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, lane: Arc<Lane>, index: usize) {
        debug!(agent = %lane.agent, worker = index, "Worker started");
        loop {
            let work = lane.work.notified();
            tokio::pin!(work);
            work.as_mut().enable();

            let next = {
                let mut state = lane.state.lock();
                if state.running < state.limit {
                    let share = self.config.low_priority_share.max(1);
                    let next = state.pop(share);
                    if next.is_some() {
                        state.running += 1;
                    }
                    next
                } else {
                    None
                }
            };

            match next {
                Some(id) => {
                    lane.space.notify_waiters();
                    let retry = self.execute(&lane, id).await;
                    lane.state.lock().running -= 1;
                    lane.work.notify_waiters();
                    // backoff happens off the worker so the slot is free meanwhile
                    if let Some((attempt, delay)) = retry {
                        let queue = Arc::clone(&self);
                        tokio::spawn(async move { queue.schedule_retry(id, attempt, delay).await });
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut work => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }
        debug!(agent = %lane.agent, worker = index, "Worker stopped");
    }

    /// Run one attempt. Returns the retry to schedule, if any.
    async fn execute(&self, lane: &Lane, id: TaskId) -> Option<(u32, Duration)> {
        let prepared = {
            let mut entry = self.tasks.get_mut(&id)?;
            if entry.cancel.is_cancelled() {
                None
            } else if let Err(e) = entry.task.start() {
                error!(task_id = %id, error = %e, "Dequeued task could not start");
                return None;
            } else {
                entry.status_tx.send_replace(TaskStatus::Running);
                Some((entry.task.clone(), entry.cancel.clone()))
            }
        };
        let Some((task, cancel)) = prepared else {
            self.settle_cancelled(id).await;
            return None;
        };

        self.registry.record_start(&lane.agent);
        self.bus.publish(LifecycleEvent::task_started(&task));
        self.persist(id).await;
        info!(task_id = %id, agent = %lane.agent, attempt = task.retry_count + 1, "Task started");

        let timeout = self
            .registry
            .descriptor(&lane.agent)
            .and_then(|d| d.execution_timeout)
            .unwrap_or(self.config.execution_timeout);
        let ctx = TaskContext {
            task_id: id,
            agent: task.agent.clone(),
            payload: task.payload.clone(),
            attempt: task.retry_count + 1,
            session_id: task.session_id,
            cancellation: cancel.clone(),
        };

        let started = Instant::now();
        let result = match self.registry.handler(&lane.agent) {
            Some(handler) => match tokio::time::timeout(timeout, handler.handle(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::Timeout(timeout)),
            },
            None => Err(TaskError::Terminal(format!(
                "no handler bound for agent '{}'",
                lane.agent
            ))),
        };
        let elapsed = started.elapsed();
        let success = result.is_ok() && !cancel.is_cancelled();
        self.registry.record_finish(&lane.agent, success, elapsed);
        metrics::histogram!("cadence_task_duration_seconds", "agent" => lane.agent.clone())
            .record(elapsed.as_secs_f64());

        self.settle(id, result, cancel.is_cancelled()).await
    }

    async fn settle(
        &self,
        id: TaskId,
        result: Result<serde_json::Value, TaskError>,
        cancelled: bool,
    ) -> Option<(u32, Duration)> {
        let settlement = {
            let mut entry = self.tasks.get_mut(&id)?;
            let can_retry = entry.task.retry_count < self.config.max_retries;
            let transition = match result {
                _ if cancelled => entry.task.cancel().map(Settlement::Terminal),
                Ok(value) => entry.task.complete(value).map(Settlement::Terminal),
                Err(TaskError::Cancelled) => entry.task.cancel().map(Settlement::Terminal),
                Err(e) if e.is_retryable() && can_retry => {
                    entry.task.schedule_retry(e.to_failure()).map(|attempt| Settlement::Retry {
                        attempt,
                        delay: self.config.backoff.delay(attempt),
                    })
                }
                Err(e) => entry.task.fail(e.to_failure()).map(Settlement::Terminal),
            };
            match transition {
                Ok(settlement) => {
                    if matches!(settlement, Settlement::Retry { .. }) {
                        entry.in_backoff = true;
                        entry.status_tx.send_replace(entry.task.status);
                    }
                    settlement
                }
                Err(e) => {
                    error!(task_id = %id, error = %e, "Invalid task transition while settling");
                    return None;
                }
            }
        };

        match settlement {
            Settlement::Terminal(outcome) => {
                self.finish(id, outcome).await;
                None
            }
            Settlement::Retry { attempt, delay } => Some((attempt, delay)),
        }
    }

    async fn settle_cancelled(&self, id: TaskId) {
        let outcome = {
            let Some(mut entry) = self.tasks.get_mut(&id) else {
                return;
            };
            entry.in_backoff = false;
            match entry.task.cancel() {
                Ok(outcome) => outcome,
                Err(_) => return,
            }
        };
        self.finish(id, outcome).await;
    }

    async fn finish(&self, id: TaskId, outcome: TaskOutcome) {
        let Some(task) = self.snapshot(id) else {
            return;
        };
        let label = match &outcome {
            TaskOutcome::Completed { .. } => "completed",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::Cancelled => "cancelled",
        };
        match &outcome {
            TaskOutcome::Failed { error } => {
                warn!(task_id = %id, agent = %task.agent, kind = %error.kind, error = %error.message, "Task failed")
            }
            _ => info!(task_id = %id, agent = %task.agent, outcome = label, "Task finished"),
        }
        metrics::counter!("cadence_tasks_finished_total", "agent" => task.agent.clone(), "outcome" => label)
            .increment(1);

        // watchers only see the terminal state once it is durable
        self.persist(id).await;
        if let Some(entry) = self.tasks.get(&id) {
            entry.status_tx.send_replace(entry.task.status);
        }
        self.bus.publish(LifecycleEvent::task_completed(&task, outcome));
    }

    async fn schedule_retry(&self, id: TaskId, attempt: u32, delay: Duration) {
        let Some((task, cancel)) = self.tasks.get(&id).map(|e| (e.task.clone(), e.cancel.clone())) else {
            return;
        };
        warn!(
            task_id = %id,
            agent = %task.agent,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retryable failure; backing off"
        );
        metrics::counter!("cadence_task_retries_total", "agent" => task.agent.clone()).increment(1);
        self.persist(id).await;
        self.bus
            .publish(LifecycleEvent::task_retry_scheduled(&task, delay.as_millis() as u64));

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {}
        }
        self.readmit(id, &task.agent, task.priority).await;
    }

    async fn readmit(&self, id: TaskId, agent: &str, priority: Priority) {
        let cancelled = self
            .tasks
            .get(&id)
            .map(|e| e.cancel.is_cancelled())
            .unwrap_or(true);
        let lane = self.lane(agent);
        match lane {
            Some(lane) if !cancelled => {
                {
                    let mut state = lane.state.lock();
                    if let Some(mut entry) = self.tasks.get_mut(&id) {
                        entry.in_backoff = false;
                    }
                    state.push(id, priority);
                }
                lane.work.notify_waiters();
            }
            _ => self.settle_cancelled(id).await,
        }
    }

    /// Stop admitting work, let lanes drain for up to `drain_timeout`, then
    /// signal cancellation to whatever is left.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        info!(timeout = ?self.config.drain_timeout, "Draining execution queue");

        loop {
            let busy: usize = self
                .depths()
                .values()
                .map(|d| d.queued + d.running)
                .sum::<usize>()
                + self.in_backoff_count();
            if busy == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = busy, "Drain timeout reached; cancelling remaining tasks");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        self.shutdown.cancel();
        let lanes: Vec<Arc<Lane>> = self.lanes.read().values().cloned().collect();
        for lane in lanes {
            let leftovers = lane.state.lock().drain_all();
            for id in leftovers {
                self.settle_cancelled(id).await;
            }
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let join = futures::future::join_all(workers);
        if tokio::time::timeout(self.config.drain_timeout, join).await.is_err() {
            warn!("Workers did not stop within the drain timeout");
        }
        info!("Execution queue stopped");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_prefers_higher_priority() {
        let mut state = LaneState::default();
        let low = TaskId::new();
        let normal = TaskId::new();
        let high = TaskId::new();
        state.push(low, Priority::Low);
        state.push(normal, Priority::Normal);
        state.push(high, Priority::High);

        assert_eq!(state.pop(4), Some(high));
        assert_eq!(state.pop(4), Some(normal));
        assert_eq!(state.pop(4), Some(low));
        assert_eq!(state.pop(4), None);
    }

    #[test]
    fn test_low_priority_minimum_share() {
        let mut state = LaneState::default();
        let lows: Vec<TaskId> = (0..2).map(|_| TaskId::new()).collect();
        for id in &lows {
            state.push(*id, Priority::Low);
        }
        let highs: Vec<TaskId> = (0..8).map(|_| TaskId::new()).collect();
        for id in &highs {
            state.push(*id, Priority::High);
        }

        let order: Vec<TaskId> = std::iter::from_fn(|| state.pop(3)).collect();
        // every third dispatch serves the waiting low class
        assert_eq!(order[2], lows[0]);
        assert_eq!(order[5], lows[1]);
        assert_eq!(order.len(), 10);
    }

    #[test]
    fn test_remove_from_any_class() {
        let mut state = LaneState::default();
        let a = TaskId::new();
        let b = TaskId::new();
        state.push(a, Priority::Normal);
        state.push(b, Priority::Low);
        assert!(state.remove(b));
        assert!(!state.remove(b));
        assert_eq!(state.depth(), 1);
    }
}
