// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator runtime
//!
//! Wires every component from one [`OrchestratorConfig`] and owns the
//! process lifecycle:
//!
//! 1. `build`: repositories, event bus, registry, store, queue, dispatcher,
//!    gateway, hook engine, status aggregator
//! 2. `start`: restart recovery, lane workers, MCP handshakes, background
//!    loops (hooks, health checks, status ticks, janitor)
//! 3. `reload`: hot swap of agents, hooks and MCP servers
//! 4. `shutdown`: stop admitting, drain, cancel what is left

use anyhow::Context;
use chrono::Utc;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::dispatcher::TaskDispatcher;
use crate::application::handler::{AgentHandler, EchoHandler};
use crate::application::hook_engine::{ActionRunner, HookContext, HookEngine};
use crate::application::mcp_gateway::McpGateway;
use crate::application::queue::ExecutionQueue;
use crate::application::registry::AgentRegistry;
use crate::application::session_store::{SessionError, SessionStore};
use crate::application::status_aggregator::StatusAggregator;
use crate::domain::agent::HandlerSpec;
use crate::domain::config::{McpServerConfig, OrchestratorConfig, StorageBackend};
use crate::domain::mcp::{McpError, McpTransport};
use crate::domain::repository::{SessionRepository, TaskRepository};
use crate::domain::session::{Session, SessionId};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::mcp_http::HttpMcpTransport;
use crate::infrastructure::process::{CommandSpec, ProcessAgentHandler};
use crate::infrastructure::repositories::{
    open_sled, InMemorySessionRepository, InMemoryTaskRepository, SledSessionRepository, SledTaskRepository,
};

/// Handler for a configured [`HandlerSpec`].
pub fn handler_for(spec: &HandlerSpec) -> Arc<dyn AgentHandler> {
    match spec {
        HandlerSpec::Echo => Arc::new(EchoHandler),
        HandlerSpec::Command {
            program,
            args,
            env,
            working_dir,
        } => Arc::new(ProcessAgentHandler::new(CommandSpec {
            program: program.clone(),
            args: args.clone(),
            env: env.clone(),
            working_dir: working_dir.clone(),
        })),
    }
}

pub struct Orchestrator {
    config: RwLock<OrchestratorConfig>,
    bus: EventBus,
    registry: Arc<AgentRegistry>,
    store: Arc<SessionStore>,
    queue: Arc<ExecutionQueue>,
    dispatcher: Arc<TaskDispatcher>,
    gateway: Arc<McpGateway>,
    hooks: Arc<HookEngine>,
    status: Arc<StatusAggregator>,
    /// Agents whose handler was bound in code; reloads leave them alone
    programmatic: DashSet<String>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build with the repositories selected by `spec.sessions.storage`.
    pub fn build(config: OrchestratorConfig) -> anyhow::Result<Arc<Self>> {
        let (sessions, tasks): (Arc<dyn SessionRepository>, Arc<dyn TaskRepository>) =
            match config.spec.sessions.storage {
                StorageBackend::Memory => (
                    Arc::new(InMemorySessionRepository::new()),
                    Arc::new(InMemoryTaskRepository::new()),
                ),
                StorageBackend::Sled => {
                    let dir = config.spec.sessions.resolved_data_dir();
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create data directory {:?}", dir))?;
                    let db = open_sled(&dir).with_context(|| format!("Failed to open store at {:?}", dir))?;
                    info!(path = ?dir, "Opened session store");
                    (
                        Arc::new(SledSessionRepository::new(&db)?),
                        Arc::new(SledTaskRepository::new(&db)?),
                    )
                }
            };
        Self::with_repositories(config, sessions, tasks)
    }

    pub fn with_repositories(
        config: OrchestratorConfig,
        sessions: Arc<dyn SessionRepository>,
        tasks: Arc<dyn TaskRepository>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let spec = &config.spec;

        let bus = EventBus::new(spec.event_bus_capacity);
        let registry = Arc::new(AgentRegistry::new(spec.agents.clone()));
        let store = Arc::new(SessionStore::new(sessions, tasks, bus.clone(), spec.sessions.clone()));
        let queue = ExecutionQueue::new(registry.clone(), store.clone(), bus.clone(), spec.queue.clone());
        let dispatcher = Arc::new(TaskDispatcher::new(registry.clone(), queue.clone(), store.clone()));
        let gateway = McpGateway::new(spec.mcp.clone(), bus.clone());

        let runner = Arc::new(ActionRunner::new(HookContext {
            gateway: gateway.clone(),
            store: store.clone(),
            dispatcher: dispatcher.clone(),
        }));
        let hooks = HookEngine::new(spec.hooks.clone(), runner, spec.hook_engine.workers, bus.clone());
        let status = StatusAggregator::new(
            registry.clone(),
            queue.clone(),
            hooks.clone(),
            gateway.clone(),
            spec.status.clone(),
        );

        let orchestrator = Arc::new(Self {
            config: RwLock::new(config.clone()),
            bus,
            registry,
            store,
            queue,
            dispatcher,
            gateway,
            hooks,
            status,
            programmatic: DashSet::new(),
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        });
        orchestrator.bind_configured_handlers();
        orchestrator.register_servers(&config.spec.mcp.servers);
        Ok(orchestrator)
    }

    fn bind_configured_handlers(&self) {
        for record in self.registry.records() {
            let name = record.name().to_string();
            if self.programmatic.contains(&name) {
                continue;
            }
            if let Some(spec) = &record.descriptor.handler {
                self.registry.bind_handler(&name, handler_for(spec));
            }
        }
    }

    fn register_servers(&self, servers: &[McpServerConfig]) {
        for server in servers.iter().filter(|s| s.enabled) {
            if self.gateway.names().contains(&server.name) {
                continue;
            }
            let transport = Arc::new(HttpMcpTransport::new(server.endpoint.clone(), &server.headers));
            if let Err(e) = self.gateway.register(server.clone(), transport) {
                warn!(server = %server.name, error = %e, "MCP server not registered");
            }
        }
    }

    /// Bind a handler in code; it wins over any configured handler.
    pub fn bind_handler(&self, agent: &str, handler: Arc<dyn AgentHandler>) {
        let name = agent.trim().to_lowercase();
        self.programmatic.insert(name.clone());
        self.registry.bind_handler(&name, handler);
    }

    /// Register an MCP server with a caller-provided transport.
    pub fn register_mcp_server(
        &self,
        server: McpServerConfig,
        transport: Arc<dyn McpTransport>,
    ) -> Result<(), McpError> {
        self.gateway.register(server, transport)
    }

    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.queue.sync_lanes();

        let report = self.store.recover_all().await.context("Restart recovery failed")?;
        if !report.is_empty() {
            info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Restart recovery complete"
            );
        }
        self.requeue_recovered().await;

        self.gateway.connect_all().await;

        let mut background = self.background.lock();
        background.push(self.hooks.spawn(self.shutdown.child_token()));
        background.push(self.gateway.spawn_health_loop(self.shutdown.child_token()));
        background.push(self.status.spawn(self.shutdown.child_token()));
        background.push(self.spawn_janitor());
        info!(agents = self.registry.names().len(), "Orchestrator started");
        Ok(())
    }

    async fn requeue_recovered(&self) {
        for task in self.store.take_pending_requeues() {
            let id = task.id;
            if let Err(e) = self.queue.enqueue_recovered(task).await {
                error!(task_id = %id, error = %e, "Recovered task could not be re-queued");
            }
        }
    }

    fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            let period = orchestrator.store.config().janitor_interval;
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => orchestrator.sweep().await,
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    /// One janitor pass: idle sessions, expired records, evicted tasks and
    /// tasks re-queued by lazy recovery.
    pub async fn sweep(&self) {
        let now = Utc::now();
        match self.store.archive_inactive(now).await {
            Ok(0) => {}
            Ok(n) => info!(archived = n, "Archived idle sessions"),
            Err(e) => warn!(error = %e, "Idle session sweep failed"),
        }
        if let Err(e) = self.store.purge_expired(now).await {
            warn!(error = %e, "Retention purge failed");
        }
        self.queue.evict_expired();
        self.requeue_recovered().await;
    }

    /// Apply a new configuration without restarting. Agents are added or
    /// updated (never removed, only disabled), the hook set is swapped and
    /// MCP servers are added or removed. Queue, status and storage settings
    /// need a restart.
    pub async fn reload(&self, config: OrchestratorConfig) -> anyhow::Result<()> {
        config.validate().context("Rejected configuration reload")?;
        let spec = &config.spec;

        self.queue.lower_limits(&spec.agents);
        let added = self.registry.apply(spec.agents.clone());
        self.bind_configured_handlers();
        self.queue.sync_lanes();
        self.hooks.replace(spec.hooks.clone());

        let wanted: Vec<&str> = spec.mcp.servers.iter().filter(|s| s.enabled).map(|s| s.name.as_str()).collect();
        for name in self.gateway.names() {
            if !wanted.contains(&name.as_str()) {
                self.gateway.unregister(&name);
            }
        }
        self.register_servers(&spec.mcp.servers);
        self.gateway.connect_all().await;

        info!(added = ?added, hooks = spec.hooks.len(), "Configuration reloaded");
        *self.config.write() = config;
        Ok(())
    }

    pub async fn open_session(&self) -> Result<Session, SessionError> {
        self.store.create().await
    }

    /// Load a session; tasks it had running before a restart are re-queued
    /// or failed according to the recovery policy.
    pub async fn load_session(&self, id: SessionId) -> Result<Session, SessionError> {
        let session = self.store.load(id).await?;
        self.requeue_recovered().await;
        Ok(session)
    }

    /// Graceful stop: drain the queue, then stop background loops.
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.queue.shutdown().await;
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock());
        let joined = futures::future::join_all(handles);
        if tokio::time::timeout(Duration::from_secs(5), joined).await.is_err() {
            warn!("Background tasks did not stop in time");
        }
        info!("Orchestrator stopped");
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config.read().clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn gateway(&self) -> &Arc<McpGateway> {
        &self.gateway
    }

    pub fn hooks(&self) -> &Arc<HookEngine> {
        &self.hooks
    }

    pub fn status(&self) -> &Arc<StatusAggregator> {
        &self.status
    }
}
