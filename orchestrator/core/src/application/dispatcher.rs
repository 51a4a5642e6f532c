// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Dispatcher
//!
//! Turns an inbound request into a queued [`Task`]. Routing is exact: the
//! target must name a registered agent (optionally written as a mention,
//! `@agent-backend` or `@backend`) or a command from the registry's command
//! table (`/api` or `api`). Nothing is inferred from payload text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::application::queue::{ExecutionQueue, QueueError, TaskHandle};
use crate::application::registry::AgentRegistry;
use crate::application::session_store::{SessionError, SessionStore};
use crate::domain::errors::ErrorKind;
use crate::domain::session::{SessionId, SessionStatus};
use crate::domain::task::{Priority, Task};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub target: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Wait this long for queue space instead of failing immediately
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub wait: Option<Duration>,
}

impl TaskRequest {
    pub fn new(target: impl Into<String>, payload: Value) -> Self {
        Self {
            target: target.into(),
            payload,
            priority: Priority::default(),
            session_id: None,
            wait: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn blocking(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown agent or command '{0}'")]
    UnknownAgent(String),

    #[error("agent '{0}' is disabled")]
    AgentDisabled(String),

    #[error("queue for '{agent}' is full ({depth} pending)")]
    Backpressure { agent: String, depth: usize },

    #[error("empty request line")]
    EmptyRequest,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Queue(QueueError),
}

impl From<QueueError> for DispatchError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::UnknownAgent(agent) => Self::UnknownAgent(agent),
            QueueError::AgentDisabled(agent) => Self::AgentDisabled(agent),
            QueueError::Backpressure { agent, depth } => Self::Backpressure { agent, depth },
            other => Self::Queue(other),
        }
    }
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownAgent(_) | Self::EmptyRequest => ErrorKind::UnknownAgent,
            Self::AgentDisabled(_) => ErrorKind::AgentDisabled,
            Self::Backpressure { .. } => ErrorKind::Backpressure,
            Self::Session(e) => e.kind(),
            Self::Queue(e) => e.kind(),
        }
    }
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@agent-([A-Za-z0-9][\w-]*)").expect("mention pattern compiles"))
}

/// Explicit `@agent-<name>` mentions in `text`, in order of first
/// appearance, lower-cased and de-duplicated.
pub fn mentions(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for capture in mention_pattern().captures_iter(text) {
        let name = capture[1].trim_end_matches(['-', '_']).to_lowercase();
        if !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

/// Split a single text line into a request: the first word is the target,
/// the rest becomes `{"prompt": ...}`.
pub fn parse_line(line: &str) -> Result<TaskRequest, DispatchError> {
    let line = line.trim();
    let (target, rest) = match line.split_once(char::is_whitespace) {
        Some((target, rest)) => (target, rest.trim()),
        None => (line, ""),
    };
    if target.is_empty() {
        return Err(DispatchError::EmptyRequest);
    }
    Ok(TaskRequest::new(target, json!({ "prompt": rest })))
}

pub struct TaskDispatcher {
    registry: Arc<AgentRegistry>,
    queue: Arc<ExecutionQueue>,
    store: Arc<SessionStore>,
}

impl TaskDispatcher {
    pub fn new(registry: Arc<AgentRegistry>, queue: Arc<ExecutionQueue>, store: Arc<SessionStore>) -> Self {
        Self { registry, queue, store }
    }

    /// Resolve a target to an agent name.
    pub fn route(&self, target: &str) -> Result<String, DispatchError> {
        let trimmed = target.trim();
        if let Some(command) = trimmed.strip_prefix('/') {
            return self
                .registry
                .resolve_command(command)
                .ok_or_else(|| DispatchError::UnknownAgent(trimmed.to_string()));
        }
        let name = trimmed
            .strip_prefix("@agent-")
            .or_else(|| trimmed.strip_prefix('@'))
            .unwrap_or(trimmed);
        self.registry
            .resolve(name)
            .map(|resolution| resolution.agent().to_string())
            .ok_or_else(|| DispatchError::UnknownAgent(trimmed.to_string()))
    }

    pub async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, DispatchError> {
        let agent = self.route(&request.target)?;
        let descriptor = self
            .registry
            .descriptor(&agent)
            .ok_or_else(|| DispatchError::UnknownAgent(agent.clone()))?;
        if !descriptor.enabled {
            return Err(DispatchError::AgentDisabled(agent));
        }

        let mut task = Task::new(agent.clone(), request.payload, request.priority);
        if let Some(session_id) = request.session_id {
            let session = self.store.load(session_id).await?;
            if session.status == SessionStatus::Archived {
                return Err(SessionError::Archived(session_id).into());
            }
            task = task.with_session(session_id);
        }
        let task_id = task.id;

        let handle = self.queue.enqueue(task, request.wait).await?;
        if let Some(session_id) = request.session_id {
            // the session may have been archived since it was checked above
            if let Err(e) = self.store.attach_task(session_id, task_id).await {
                warn!(task_id = %task_id, session_id = %session_id, error = %e, "Session rejected task; cancelling");
                if let Err(cancel_err) = self.queue.cancel(task_id).await {
                    warn!(task_id = %task_id, error = %cancel_err, "Could not cancel unattached task");
                }
                return Err(e.into());
            }
        }
        info!(task_id = %task_id, agent = %agent, target = %request.target, "Task submitted");
        Ok(handle)
    }

    pub async fn submit_line(&self, line: &str) -> Result<TaskHandle, DispatchError> {
        self.submit(parse_line(line)?).await
    }

    /// Fan one payload out to every agent mentioned in `text`. Each mention
    /// is submitted independently; one rejection does not stop the others.
    pub async fn submit_mentions(
        &self,
        text: &str,
        payload: Value,
        priority: Priority,
        session_id: Option<SessionId>,
    ) -> Vec<(String, Result<TaskHandle, DispatchError>)> {
        let mut results = Vec::new();
        for agent in mentions(text) {
            let mut request = TaskRequest::new(agent.clone(), payload.clone()).with_priority(priority);
            request.session_id = session_id;
            debug!(agent = %agent, "Submitting mentioned agent");
            let result = self.submit(request).await;
            results.push((agent, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_are_ordered_and_deduplicated() {
        let text = "ask @agent-backend then @agent-Frontend, and @agent-backend again";
        assert_eq!(mentions(text), vec!["backend".to_string(), "frontend".to_string()]);
    }

    #[test]
    fn test_mentions_ignore_plain_words() {
        assert!(mentions("the backend api needs docs").is_empty());
        assert!(mentions("@backend").is_empty());
    }

    #[test]
    fn test_parse_line() {
        let request = parse_line("  /api  add a users endpoint ").unwrap();
        assert_eq!(request.target, "/api");
        assert_eq!(request.payload["prompt"], "add a users endpoint");

        let bare = parse_line("qa").unwrap();
        assert_eq!(bare.payload["prompt"], "");

        assert!(matches!(parse_line("   "), Err(DispatchError::EmptyRequest)));
    }

    #[test]
    fn test_request_json_defaults() {
        let request: TaskRequest = serde_json::from_str(r#"{"target": "backend"}"#).unwrap();
        assert_eq!(request.priority, Priority::Normal);
        assert!(request.wait.is_none());

        let blocking: TaskRequest =
            serde_json::from_str(r#"{"target": "backend", "priority": "high", "wait": "2s"}"#).unwrap();
        assert_eq!(blocking.priority, Priority::High);
        assert_eq!(blocking.wait, Some(Duration::from_secs(2)));
    }
}
