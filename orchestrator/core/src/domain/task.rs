// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! A unit of work routed to exactly one agent. Tasks are created by the
//! dispatcher in `Queued` and afterwards mutated only by the queue worker
//! that owns them.
//!
//! ```text
//!            ┌──────────── retry (retry_count + 1) ───────────┐
//!            ▼                                                 │
//!  Queued ──start──▶ Running ──complete──▶ Completed           │
//!    │                 │  └───fail──────▶ Failed               │
//!    │                 ├───cancel────────▶ Cancelled           │
//!    │                 ├───schedule_retry──────────────────────┘
//!    │                 └───interrupt (restart only)──▶ Interrupted
//!    └──cancel──▶ Cancelled
//! ```
//!
//! Terminal states are never left. `Interrupted` is only produced by
//! restart recovery and resolves to `Queued` (recovered once) or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, ErrorKind};
use crate::domain::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Recorded failure with its machine-readable kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error returned by an agent handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("retryable failure: {0}")]
    Retryable(String),

    #[error("terminal failure: {0}")]
    Terminal(String),

    #[error("execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Timeout(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Retryable(_) => ErrorKind::Retryable,
            Self::Terminal(_) => ErrorKind::Terminal,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn to_failure(&self) -> TaskFailure {
        TaskFailure::new(self.kind(), self.to_string())
    }
}

/// Final outcome carried by the `TaskCompleted` lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { result: Value },
    Failed { error: TaskFailure },
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub agent: String,
    pub payload: Value,
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<TaskFailure>,
    #[serde(default)]
    pub result: Option<Value>,
    /// Set once a task has been re-enqueued after an interruption.
    #[serde(default)]
    pub recovered: bool,
}

impl Task {
    pub fn new(agent: impl Into<String>, payload: Value, priority: Priority) -> Self {
        Self {
            id: TaskId::new(),
            agent: agent.into(),
            payload,
            priority,
            status: TaskStatus::Queued,
            session_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retry_count: 0,
            last_error: None,
            result: None,
            recovered: false,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    fn guard(&self, expected: &[TaskStatus], to: TaskStatus) -> Result<(), DomainError> {
        if expected.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::transition(self.status, to))
        }
    }

    pub fn start(&mut self) -> Result<(), DomainError> {
        self.guard(&[TaskStatus::Queued], TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: Value) -> Result<TaskOutcome, DomainError> {
        self.guard(&[TaskStatus::Running], TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result.clone());
        Ok(TaskOutcome::Completed { result })
    }

    pub fn fail(&mut self, error: TaskFailure) -> Result<TaskOutcome, DomainError> {
        self.guard(
            &[TaskStatus::Running, TaskStatus::Queued, TaskStatus::Interrupted],
            TaskStatus::Failed,
        )?;
        self.status = TaskStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.last_error = Some(error.clone());
        Ok(TaskOutcome::Failed { error })
    }

    pub fn cancel(&mut self) -> Result<TaskOutcome, DomainError> {
        self.guard(&[TaskStatus::Queued, TaskStatus::Running], TaskStatus::Cancelled)?;
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.last_error = Some(TaskFailure::new(ErrorKind::Cancelled, "task cancelled"));
        Ok(TaskOutcome::Cancelled)
    }

    /// Running → Queued for another attempt.
    pub fn schedule_retry(&mut self, error: TaskFailure) -> Result<u32, DomainError> {
        self.guard(&[TaskStatus::Running], TaskStatus::Queued)?;
        self.status = TaskStatus::Queued;
        self.retry_count += 1;
        self.last_error = Some(error);
        Ok(self.retry_count)
    }

    /// Only restart recovery calls this: a persisted `Running` task whose
    /// worker no longer exists.
    pub fn interrupt(&mut self) -> Result<(), DomainError> {
        self.guard(&[TaskStatus::Running], TaskStatus::Interrupted)?;
        self.status = TaskStatus::Interrupted;
        self.last_error = Some(TaskFailure::new(
            ErrorKind::Interrupted,
            "process restarted while task was running",
        ));
        Ok(())
    }

    /// Interrupted → Queued, at most once per task.
    pub fn recover(&mut self) -> Result<(), DomainError> {
        self.guard(&[TaskStatus::Interrupted], TaskStatus::Queued)?;
        if self.recovered {
            return Err(DomainError::transition(self.status, TaskStatus::Queued));
        }
        self.status = TaskStatus::Queued;
        self.started_at = None;
        self.recovered = true;
        Ok(())
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_happy_path() {
        let mut task = Task::new("backend", json!({"prompt": "x"}), Priority::Normal);
        assert_eq!(task.status, TaskStatus::Queued);

        task.start().unwrap();
        assert!(task.started_at.is_some());

        let outcome = task.complete(json!({"ok": true})).unwrap();
        assert_eq!(outcome.status(), TaskStatus::Completed);
        assert!(task.finished_at.is_some());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_never_left() {
        let mut task = Task::new("backend", json!({}), Priority::Normal);
        task.start().unwrap();
        task.fail(TaskFailure::new(ErrorKind::Terminal, "boom")).unwrap();

        assert!(task.start().is_err());
        assert!(task.cancel().is_err());
        assert!(task.complete(json!(null)).is_err());
        assert!(task.schedule_retry(TaskFailure::new(ErrorKind::Retryable, "x")).is_err());
    }

    #[test]
    fn test_retry_increments_count() {
        let mut task = Task::new("backend", json!({}), Priority::High);
        task.start().unwrap();
        let attempt = task
            .schedule_retry(TaskFailure::new(ErrorKind::Retryable, "flaky"))
            .unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.last_error.as_ref().unwrap().kind, ErrorKind::Retryable);
    }

    #[test]
    fn test_interrupted_recovers_once() {
        let mut task = Task::new("backend", json!({}), Priority::Normal);
        task.start().unwrap();
        task.interrupt().unwrap();
        assert_eq!(task.status, TaskStatus::Interrupted);

        task.recover().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        task.start().unwrap();
        task.interrupt().unwrap();
        assert!(task.recover().is_err());
        assert!(task.fail(TaskFailure::new(ErrorKind::Interrupted, "again")).is_ok());
    }

    #[test]
    fn test_task_error_classification() {
        assert!(TaskError::Retryable("x".into()).is_retryable());
        assert!(TaskError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TaskError::Terminal("x".into()).is_retryable());
        assert!(!TaskError::Cancelled.is_retryable());
        assert_eq!(TaskError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
