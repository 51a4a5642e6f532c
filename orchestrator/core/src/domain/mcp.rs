// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MCP Server Connections
//!
//! Domain model for connections to external tool servers speaking the Model
//! Context Protocol. The gateway owns a bounded table of
//! [`McpServerConnection`]s and drives them through:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──(N failed pings)──▶ Degraded
//!      ▲               │              ▲                              │
//!      │               └─(handshake   └──(verified successful ping)──┤
//!      │                  failed)                                    │
//!      └──────────────(reconnect attempts exhausted)─────────────────┘
//! ```
//!
//! The consecutive-failure counter resets only on a verified successful
//! health check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::errors::{DomainError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// State change produced by a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Degraded,
    Recovered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConnection {
    pub name: String,
    pub endpoint: String,
    pub state: ConnectionState,
    pub last_ok_ping: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    pub tools: Vec<McpTool>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl McpServerConnection {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            state: ConnectionState::Disconnected,
            last_ok_ping: None,
            consecutive_failures: 0,
            reconnect_attempts: 0,
            tools: Vec::new(),
            connected_at: None,
        }
    }

    pub fn begin_connect(&mut self) -> Result<(), DomainError> {
        if self.state != ConnectionState::Disconnected {
            return Err(DomainError::transition(self.state, ConnectionState::Connecting));
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Handshake succeeded.
    pub fn connected(&mut self, tools: Vec<McpTool>) -> Result<(), DomainError> {
        if self.state != ConnectionState::Connecting {
            return Err(DomainError::transition(self.state, ConnectionState::Connected));
        }
        let now = Utc::now();
        self.state = ConnectionState::Connected;
        self.tools = tools;
        self.connected_at = Some(now);
        self.last_ok_ping = Some(now);
        self.consecutive_failures = 0;
        self.reconnect_attempts = 0;
        Ok(())
    }

    pub fn connect_failed(&mut self) -> Result<(), DomainError> {
        if self.state != ConnectionState::Connecting {
            return Err(DomainError::transition(self.state, ConnectionState::Disconnected));
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    /// Applies one health check result. Only meaningful while connected or
    /// degraded; other states ignore it.
    pub fn record_health(&mut self, healthy: bool, failure_threshold: u32) -> Option<HealthTransition> {
        match (self.state, healthy) {
            (ConnectionState::Connected, true) => {
                self.consecutive_failures = 0;
                self.last_ok_ping = Some(Utc::now());
                None
            }
            (ConnectionState::Degraded, true) => {
                self.consecutive_failures = 0;
                self.reconnect_attempts = 0;
                self.last_ok_ping = Some(Utc::now());
                self.state = ConnectionState::Connected;
                Some(HealthTransition::Recovered)
            }
            (ConnectionState::Connected, false) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= failure_threshold {
                    self.state = ConnectionState::Degraded;
                    Some(HealthTransition::Degraded)
                } else {
                    None
                }
            }
            (ConnectionState::Degraded, false) => {
                self.consecutive_failures += 1;
                None
            }
            _ => None,
        }
    }

    /// Counts a failed reconnect probe; returns `true` once the connection
    /// gives up and drops to `Disconnected`.
    pub fn record_reconnect_failure(&mut self, max_attempts: u32) -> bool {
        if self.state != ConnectionState::Degraded {
            return false;
        }
        self.reconnect_attempts += 1;
        if self.reconnect_attempts >= max_attempts {
            self.state = ConnectionState::Disconnected;
            self.tools.clear();
            true
        } else {
            false
        }
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.tools.clear();
    }
}

/// Reason a tool call was refused before reaching the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyViolation {
    ToolNotAllowed { tool_name: String },
    ToolExplicitlyDenied { tool_name: String },
    BlockedArgument { pattern: String },
    PathOutsideBoundary { path: PathBuf },
    PathTraversalAttempt { path: PathBuf },
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolNotAllowed { tool_name } => write!(f, "tool '{}' is not allowed", tool_name),
            Self::ToolExplicitlyDenied { tool_name } => write!(f, "tool '{}' is denied", tool_name),
            Self::BlockedArgument { pattern } => write!(f, "argument matches blocked pattern '{}'", pattern),
            Self::PathOutsideBoundary { path } => write!(f, "path {:?} is outside the allowed roots", path),
            Self::PathTraversalAttempt { path } => write!(f, "path {:?} attempts traversal", path),
        }
    }
}

/// Per-server constraints checked before an invocation leaves the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,

    #[serde(default)]
    pub denied_tools: Vec<String>,

    /// Substrings rejected in `command`/`cmd` arguments
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,

    /// Roots that `path` arguments must stay under; empty means unrestricted
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
}

fn default_allowed_tools() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_blocked_patterns() -> Vec<String> {
    vec!["rm -rf".to_string(), "mkfs".to_string(), "dd if=".to_string()]
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            allowed_tools: default_allowed_tools(),
            denied_tools: Vec::new(),
            blocked_patterns: default_blocked_patterns(),
            allowed_paths: Vec::new(),
        }
    }
}

fn pattern_matches(pattern: &str, tool_name: &str) -> bool {
    if pattern == "*" {
        true
    } else if let Some(prefix) = pattern.strip_suffix(".*") {
        tool_name.starts_with(prefix)
    } else {
        pattern == tool_name
    }
}

impl ToolPolicy {
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        self.allowed_tools.iter().any(|p| pattern_matches(p, tool_name))
    }

    pub fn is_tool_denied(&self, tool_name: &str) -> bool {
        self.denied_tools.iter().any(|p| pattern_matches(p, tool_name))
    }

    pub fn validate_invocation(&self, tool_name: &str, arguments: &Value) -> Result<(), PolicyViolation> {
        if !self.is_tool_allowed(tool_name) {
            return Err(PolicyViolation::ToolNotAllowed {
                tool_name: tool_name.to_string(),
            });
        }
        // explicit denials override the allowlist
        if self.is_tool_denied(tool_name) {
            return Err(PolicyViolation::ToolExplicitlyDenied {
                tool_name: tool_name.to_string(),
            });
        }

        for key in ["command", "cmd"] {
            if let Some(command) = arguments.get(key).and_then(Value::as_str) {
                if let Some(pattern) = self.blocked_patterns.iter().find(|p| command.contains(p.as_str())) {
                    return Err(PolicyViolation::BlockedArgument {
                        pattern: pattern.clone(),
                    });
                }
            }
        }

        if let Some(path) = arguments.get("path").and_then(Value::as_str) {
            self.validate_path(path)?;
        }
        Ok(())
    }

    fn validate_path(&self, raw: &str) -> Result<(), PolicyViolation> {
        if self.allowed_paths.is_empty() {
            return Ok(());
        }
        let path = PathBuf::from(raw);
        if raw.contains("..") {
            return Err(PolicyViolation::PathTraversalAttempt { path });
        }
        if !self.allowed_paths.iter().any(|root| path.starts_with(root)) {
            return Err(PolicyViolation::PathOutsideBoundary { path });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    #[error("MCP server '{0}' is not registered")]
    UnknownServer(String),

    #[error("MCP server '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("MCP connection limit of {max} reached")]
    CapacityExceeded { max: usize },

    #[error("MCP server '{0}' is degraded")]
    ServerDegraded(String),

    #[error("MCP server '{0}' is unreachable")]
    ServerUnreachable(String),

    #[error("call to {server}/{tool} timed out after {timeout:?}")]
    Timeout { server: String, tool: String, timeout: Duration },

    #[error("tool call denied: {0}")]
    ToolDenied(PolicyViolation),

    #[error("MCP server returned error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("MCP transport error: {0}")]
    Transport(String),
}

impl McpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServerDegraded(_) => ErrorKind::ServerDegraded,
            Self::UnknownServer(_) | Self::ServerUnreachable(_) | Self::Transport(_) => {
                ErrorKind::ServerUnreachable
            }
            Self::AlreadyRegistered(_) | Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ToolDenied(_) => ErrorKind::ToolDenied,
            Self::Protocol { .. } => ErrorKind::Terminal,
        }
    }
}

/// Wire-level access to one MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Protocol handshake; returns the tools the server exposes.
    async fn initialize(&self) -> Result<Vec<McpTool>, McpError>;

    async fn ping(&self) -> Result<(), McpError>;

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError>;
}
