// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle Events
//!
//! Everything the hook chain engine reacts to. Events are published on the
//! [`EventBus`](crate::infrastructure::event_bus::EventBus) by the queue,
//! the session store, the MCP gateway and the hook engine itself.
//!
//! Every event carries a `correlation_id`. For task events it is the task
//! id, for session events the session id, for MCP events the server name.
//! The pair `(kind, correlation_id)` identifies a hook chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::domain::session::SessionId;
use crate::domain::task::{Task, TaskId, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionArchived,
    TaskQueued,
    TaskStarted,
    TaskRetryScheduled,
    TaskCompleted,
    ChainAborted,
    McpServerDegraded,
    McpServerRecovered,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SessionStarted => "session_started",
            Self::SessionArchived => "session_archived",
            Self::TaskQueued => "task_queued",
            Self::TaskStarted => "task_started",
            Self::TaskRetryScheduled => "task_retry_scheduled",
            Self::TaskCompleted => "task_completed",
            Self::ChainAborted => "chain_aborted",
            Self::McpServerDegraded => "mcp_server_degraded",
            Self::McpServerRecovered => "mcp_server_recovered",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub data: Value,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, correlation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            correlation_id: correlation_id.into(),
            task_id: None,
            agent: None,
            session_id: None,
            outcome: None,
            data: Value::Null,
            occurred_at: Utc::now(),
        }
    }

    fn for_task(kind: EventKind, task: &Task) -> Self {
        let mut event = Self::new(kind, task.id.to_string());
        event.task_id = Some(task.id);
        event.agent = Some(task.agent.clone());
        event.session_id = task.session_id;
        event
    }

    pub fn task_queued(task: &Task) -> Self {
        let mut event = Self::for_task(EventKind::TaskQueued, task);
        event.data = serde_json::json!({ "priority": task.priority });
        event
    }

    pub fn task_started(task: &Task) -> Self {
        let mut event = Self::for_task(EventKind::TaskStarted, task);
        event.data = serde_json::json!({ "attempt": task.retry_count + 1 });
        event
    }

    pub fn task_retry_scheduled(task: &Task, delay_ms: u64) -> Self {
        let mut event = Self::for_task(EventKind::TaskRetryScheduled, task);
        event.data = serde_json::json!({
            "retry_count": task.retry_count,
            "delay_ms": delay_ms,
            "error": task.last_error,
        });
        event
    }

    /// Completion event; the task payload travels along so fallback hooks
    /// can resubmit it.
    pub fn task_completed(task: &Task, outcome: TaskOutcome) -> Self {
        let mut event = Self::for_task(EventKind::TaskCompleted, task);
        event.outcome = Some(outcome);
        event.data = serde_json::json!({
            "payload": task.payload,
            "priority": task.priority,
            "retry_count": task.retry_count,
        });
        event
    }

    pub fn session(kind: EventKind, session_id: SessionId) -> Self {
        let mut event = Self::new(kind, session_id.to_string());
        event.session_id = Some(session_id);
        event
    }

    pub fn mcp(kind: EventKind, server: &str, data: Value) -> Self {
        let mut event = Self::new(kind, server);
        event.data = data;
        event
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Some(TaskOutcome::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Priority;
    use serde_json::json;

    #[test]
    fn test_task_event_correlates_by_task_id() {
        let task = Task::new("backend", json!({"prompt": "hi"}), Priority::High);
        let event = LifecycleEvent::task_started(&task);
        assert_eq!(event.correlation_id, task.id.to_string());
        assert_eq!(event.agent.as_deref(), Some("backend"));
        assert_eq!(event.data["attempt"], 1);
    }

    #[test]
    fn test_completed_event_carries_payload_and_outcome() {
        let task = Task::new("backend", json!({"prompt": "hi"}), Priority::Normal);
        let event = LifecycleEvent::task_completed(&task, TaskOutcome::Cancelled);
        assert_eq!(event.data["payload"]["prompt"], "hi");
        assert!(!event.is_failure());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "task_completed");
        assert_eq!(json["outcome"]["status"], "cancelled");
    }
}
