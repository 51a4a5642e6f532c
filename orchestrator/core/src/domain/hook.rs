// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hook Chains
//!
//! A hook is an automation unit bound to one or more [`EventKind`]s. All
//! hooks triggered by one event form a chain that runs in ascending `order`.
//!
//! ```text
//! Pending ──▶ Running ──▶ Completed          every hook succeeded
//!                    ├──▶ PartiallyFailed    a non-fatal hook failed
//!                    └──▶ Aborted            a fatal hook failed; rest skipped
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, ErrorKind};
use crate::domain::events::EventKind;

/// Closed set of hook behaviours configurable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookAction {
    /// Run a program with the event JSON on stdin.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Call a tool on a connected MCP server. `{{event}}` in `args` is
    /// replaced by the triggering event.
    McpInvoke {
        server: String,
        tool: String,
        #[serde(default)]
        args: Value,
    },
    /// Append the event to the owning session's context under `key`.
    SessionNote {
        #[serde(default = "default_note_key")]
        key: String,
    },
    /// Re-submit a failed task's payload to a fallback agent.
    Resubmit { agent: String },
    /// Emit a structured notification through the log pipeline.
    Log {
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_note_key() -> String {
    "events".to_string()
}

fn default_hook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDescriptor {
    pub name: String,

    pub triggers: Vec<EventKind>,

    /// Position in the chain; lower runs first
    #[serde(default)]
    pub order: u32,

    #[serde(default = "default_hook_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// A failing fatal hook aborts the rest of its chain
    #[serde(default)]
    pub fatal: bool,

    /// May run concurrently with other parallel-safe hooks of the same order
    #[serde(default)]
    pub parallel_safe: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub action: HookAction,
}

impl HookDescriptor {
    pub fn new(name: impl Into<String>, triggers: Vec<EventKind>, order: u32, action: HookAction) -> Self {
        Self {
            name: name.into(),
            triggers,
            order,
            timeout: default_hook_timeout(),
            fatal: false,
            parallel_safe: false,
            enabled: true,
            action,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subscribes_to(&self, kind: EventKind) -> bool {
        self.enabled && self.triggers.contains(&kind)
    }
}

/// Failure of a single hook execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("hook '{hook}' exceeded its {timeout:?} timeout")]
    Timeout { hook: String, timeout: Duration },

    #[error("hook '{hook}' failed: {message}")]
    Failed { hook: String, message: String },

    #[error("a chain for {kind} / {correlation_id} is already running")]
    ChainAlreadyRunning { kind: EventKind, correlation_id: String },
}

impl HookError {
    pub fn failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Kind as seen by the chain, which knows whether the hook was fatal.
    pub fn kind(&self, fatal: bool) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::HookTimeout,
            Self::Failed { .. } if fatal => ErrorKind::HookFatal,
            Self::Failed { .. } => ErrorKind::Terminal,
            Self::ChainAlreadyRunning { .. } => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HookOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
    TimedOut,
    Skipped,
}

impl HookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookExecution {
    pub hook: String,
    pub order: u32,
    pub fatal: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: HookOutcome,
    /// Side-channel data emitted by the hook
    #[serde(default)]
    pub output: Option<Value>,
}

impl HookExecution {
    pub fn skipped(descriptor: &HookDescriptor) -> Self {
        Self {
            hook: descriptor.name.clone(),
            order: descriptor.order,
            fatal: descriptor.fatal,
            started_at: None,
            finished_at: None,
            outcome: HookOutcome::Skipped,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Aborted,
}

/// One invocation of a hook chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookChain {
    pub id: Uuid,
    pub trigger: EventKind,
    pub correlation_id: String,
    pub status: ChainStatus,
    pub executions: Vec<HookExecution>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Name of the fatal hook that aborted the chain
    pub aborted_by: Option<String>,
}

impl HookChain {
    pub fn new(trigger: EventKind, correlation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            correlation_id: correlation_id.into(),
            status: ChainStatus::Pending,
            executions: Vec::new(),
            started_at: None,
            finished_at: None,
            aborted_by: None,
        }
    }

    pub fn start(&mut self) -> Result<(), DomainError> {
        if self.status != ChainStatus::Pending {
            return Err(DomainError::transition(self.status, ChainStatus::Running));
        }
        self.status = ChainStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn record(&mut self, execution: HookExecution) {
        self.executions.push(execution);
    }

    pub fn abort(&mut self, hook: &str) -> Result<(), DomainError> {
        if self.status != ChainStatus::Running {
            return Err(DomainError::transition(self.status, ChainStatus::Aborted));
        }
        self.status = ChainStatus::Aborted;
        self.aborted_by = Some(hook.to_string());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Resolves a running chain to `Completed` or `PartiallyFailed`.
    pub fn finish(&mut self) -> Result<ChainStatus, DomainError> {
        if self.status != ChainStatus::Running {
            return Err(DomainError::transition(self.status, ChainStatus::Completed));
        }
        self.status = if self.executions.iter().any(|e| e.outcome.is_failure()) {
            ChainStatus::PartiallyFailed
        } else {
            ChainStatus::Completed
        };
        self.finished_at = Some(Utc::now());
        Ok(self.status)
    }
}
