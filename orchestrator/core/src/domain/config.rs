// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator Configuration
//!
//! Kubernetes-style manifest (apiVersion/kind/metadata/spec) holding:
//! - Agent catalog and hook descriptors (hot-reloadable)
//! - Queue, retry and drain policy
//! - MCP gateway limits and server list
//! - Status feed cadence
//! - Session persistence and retention
//! - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::agent::AgentDescriptor;
use crate::domain::hook::{HookAction, HookDescriptor};
use crate::domain::mcp::ToolPolicy;
use crate::domain::retry::BackoffPolicy;

pub const API_VERSION: &str = "cadence.dev/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// API version (must be "cadence.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: OrchestratorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,

    #[serde(default)]
    pub hooks: Vec<HookDescriptor>,

    #[serde(default)]
    pub hook_engine: HookEngineConfig,

    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

impl Default for OrchestratorSpec {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            agents: Vec::new(),
            hooks: Vec::new(),
            hook_engine: HookEngineConfig::default(),
            mcp: McpConfig::default(),
            status: StatusConfig::default(),
            sessions: SessionConfig::default(),
            event_bus_capacity: default_event_bus_capacity(),
            observability: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending-task bound for agents without their own `queue_capacity`
    #[serde(default = "default_queue_capacity")]
    pub default_capacity: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// At least one in `low_priority_share` dispatches serves the low class
    /// while a low-priority task is waiting
    #[serde(default = "default_low_priority_share")]
    pub low_priority_share: u32,

    #[serde(default = "default_execution_timeout", with = "humantime_serde")]
    pub execution_timeout: Duration,

    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// How long terminal tasks stay pollable in memory
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            low_priority_share: default_low_priority_share(),
            execution_timeout: default_execution_timeout(),
            drain_timeout: default_drain_timeout(),
            retention: default_retention(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEngineConfig {
    /// Hook executions allowed to run at once across all chains
    #[serde(default = "default_hook_workers")]
    pub workers: usize,
}

impl Default for HookEngineConfig {
    fn default() -> Self {
        Self {
            workers: default_hook_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Hard cap on registered servers
    #[serde(default = "default_max_servers")]
    pub max_servers: usize,

    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Consecutive failed pings before a server is degraded
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,

    #[serde(default = "default_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default)]
    pub reconnect_backoff: BackoffPolicy,

    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            max_servers: default_max_servers(),
            health_check_interval: default_health_interval(),
            failure_threshold: default_failure_threshold(),
            call_timeout: default_call_timeout(),
            max_reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff: BackoffPolicy::default(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,

    /// JSON-RPC endpoint URL
    pub endpoint: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra HTTP headers (values support "env:VAR_NAME")
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub policy: ToolPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Snapshots buffered per subscriber before it is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval: default_status_interval(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sled,
}

/// What restart recovery does with a task found `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    #[default]
    RequeueOnce,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub storage: StorageBackend,

    /// Directory for the embedded store (default: ~/.cadence/data)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_inactivity_timeout", with = "humantime_serde")]
    pub inactivity_timeout: Duration,

    /// Archived sessions and finished tasks are purged after this window
    #[serde(default = "default_audit_retention", with = "humantime_serde")]
    pub audit_retention: Duration,

    #[serde(default)]
    pub recovery: RecoveryPolicy,

    #[serde(default = "default_janitor_interval", with = "humantime_serde")]
    pub janitor_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            data_dir: None,
            inactivity_timeout: default_inactivity_timeout(),
            audit_retention: default_audit_retention(),
            recovery: RecoveryPolicy::default(),
            janitor_interval: default_janitor_interval(),
        }
    }
}

impl SessionConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cadence")
                .join("data")
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8700
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_low_priority_share() -> u32 {
    4
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retention() -> Duration {
    Duration::from_secs(3600)
}

fn default_hook_workers() -> usize {
    4
}

fn default_max_servers() -> usize {
    3
}

fn default_health_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_status_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_subscriber_buffer() -> usize {
    16
}

fn default_inactivity_timeout() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_audit_retention() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_janitor_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "cadence".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorSpec::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CADENCE_CONFIG_PATH environment variable
    /// 2. ./cadence-config.yaml (working directory)
    /// 3. ~/.cadence/config.yaml (user home)
    /// 4. /etc/cadence/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CADENCE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./cadence-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cadence").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/cadence/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CADENCE_STATUS_INTERVAL_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    tracing::info!("Environment override: CADENCE_STATUS_INTERVAL_MS={}", ms);
                    self.spec.status.interval = Duration::from_millis(ms);
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CADENCE_STATUS_INTERVAL_MS: '{}'. Expected milliseconds. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("CADENCE_DATA_DIR") {
            tracing::info!("Environment override: CADENCE_DATA_DIR={}", val);
            self.spec.sessions.data_dir = Some(PathBuf::from(val));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        let mut agent_names = HashSet::new();
        for agent in &spec.agents {
            if agent.name.trim().is_empty() {
                anyhow::bail!("Agent name cannot be empty");
            }
            if !agent_names.insert(agent.name.to_lowercase()) {
                anyhow::bail!("Duplicate agent name: {}", agent.name);
            }
            if agent.max_concurrency == 0 {
                anyhow::bail!("Agent '{}' must allow at least one concurrent execution", agent.name);
            }
            if agent.queue_capacity == Some(0) {
                anyhow::bail!("Agent '{}' queue_capacity must be positive", agent.name);
            }
        }

        let mut commands: HashMap<String, &str> = HashMap::new();
        for agent in &spec.agents {
            for command in &agent.commands {
                let key = command.trim_start_matches('/').to_lowercase();
                if agent_names.contains(&key) {
                    anyhow::bail!("Command '{}' collides with an agent name", command);
                }
                if let Some(owner) = commands.insert(key, &agent.name) {
                    anyhow::bail!(
                        "Command '{}' is mapped to both '{}' and '{}'",
                        command,
                        owner,
                        agent.name
                    );
                }
            }
        }

        let mut hook_names = HashSet::new();
        for hook in &spec.hooks {
            if !hook_names.insert(hook.name.as_str()) {
                anyhow::bail!("Duplicate hook name: {}", hook.name);
            }
            if hook.triggers.is_empty() {
                anyhow::bail!("Hook '{}' must declare at least one trigger", hook.name);
            }
            if hook.timeout.is_zero() {
                anyhow::bail!("Hook '{}' timeout must be positive", hook.name);
            }
            match &hook.action {
                HookAction::Resubmit { agent } if !agent_names.contains(&agent.to_lowercase()) => {
                    anyhow::bail!("Hook '{}' resubmits to unknown agent '{}'", hook.name, agent);
                }
                HookAction::McpInvoke { server, .. }
                    if !spec.mcp.servers.iter().any(|s| &s.name == server) =>
                {
                    anyhow::bail!("Hook '{}' calls unknown MCP server '{}'", hook.name, server);
                }
                _ => {}
            }
        }

        if spec.hook_engine.workers == 0 {
            anyhow::bail!("spec.hook_engine.workers must be positive");
        }

        if spec.queue.low_priority_share == 0 {
            anyhow::bail!("spec.queue.low_priority_share must be positive");
        }

        if spec.mcp.failure_threshold == 0 {
            anyhow::bail!("spec.mcp.failure_threshold must be positive");
        }

        let enabled_servers = spec.mcp.servers.iter().filter(|s| s.enabled).count();
        if enabled_servers > spec.mcp.max_servers {
            anyhow::bail!(
                "{} MCP servers enabled but spec.mcp.max_servers is {}",
                enabled_servers,
                spec.mcp.max_servers
            );
        }

        let mut server_names = HashSet::new();
        for server in &spec.mcp.servers {
            if !server_names.insert(server.name.as_str()) {
                anyhow::bail!("Duplicate MCP server name: {}", server.name);
            }
            if server.endpoint.is_empty() {
                anyhow::bail!("MCP server endpoint cannot be empty for: {}", server.name);
            }
        }

        if spec.status.interval.is_zero() {
            anyhow::bail!("spec.status.interval must be positive");
        }

        Ok(())
    }
}
