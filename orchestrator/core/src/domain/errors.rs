// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Error Taxonomy
//!
//! Every failure that crosses a component boundary resolves to an
//! [`ErrorKind`], the machine-readable code carried by failed tasks, HTTP
//! error bodies and lifecycle events. Each layer keeps its own `thiserror`
//! enum and maps into this set through a `kind()` accessor.
//!
//! | Kind | Raised by | Surfaced to submitter |
//! |------|-----------|-----------------------|
//! | `unknown_agent` | Dispatcher | immediately |
//! | `backpressure` | Execution Queue | immediately, with depth |
//! | `retryable` | agent handler | only after retries are exhausted |
//! | `terminal` | agent handler | on completion |
//! | `hook_timeout` / `hook_fatal` | Hook Chain Engine | never (via `ChainAborted`) |
//! | `server_degraded` / `server_unreachable` | MCP Gateway | caller of `invoke` |
//! | `session_not_found` | Session Store | immediately |

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownAgent,
    AgentDisabled,
    Backpressure,
    Retryable,
    Terminal,
    Timeout,
    Cancelled,
    Interrupted,
    HookTimeout,
    HookFatal,
    ServerDegraded,
    ServerUnreachable,
    ToolDenied,
    CapacityExceeded,
    SessionNotFound,
    ShuttingDown,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownAgent => "unknown_agent",
            Self::AgentDisabled => "agent_disabled",
            Self::Backpressure => "backpressure",
            Self::Retryable => "retryable",
            Self::Terminal => "terminal",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
            Self::HookTimeout => "hook_timeout",
            Self::HookFatal => "hook_fatal",
            Self::ServerDegraded => "server_degraded",
            Self::ServerUnreachable => "server_unreachable",
            Self::ToolDenied => "tool_denied",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::SessionNotFound => "session_not_found",
            Self::ShuttingDown => "shutting_down",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected aggregate state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl DomainError {
    pub fn transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::InvalidStateTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ServerDegraded).unwrap();
        assert_eq!(json, "\"server_degraded\"");
        assert_eq!(ErrorKind::SessionNotFound.to_string(), "session_not_found");
    }
}
