// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MCP Gateway
//!
//! Owns the bounded table of MCP server connections. Nothing else writes
//! connection state.
//!
//! A health loop pings every `Connected` server on a fixed interval. After
//! `failure_threshold` consecutive failures the server is `Degraded`: calls
//! fail fast and a per-server reconnect loop probes it with exponential
//! backoff. A verified successful ping is the only way back to `Connected`;
//! exhausting the reconnect budget leaves the server `Disconnected`.
//!
//! `invoke` never retries. Callers own their retry policy.

use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::config::{McpConfig, McpServerConfig};
use crate::domain::events::{EventKind, LifecycleEvent};
use crate::domain::mcp::{ConnectionState, HealthTransition, McpError, McpServerConnection, McpTransport};
use crate::domain::status::McpHealth;
use crate::infrastructure::event_bus::EventBus;

struct ServerSlot {
    config: McpServerConfig,
    connection: RwLock<McpServerConnection>,
    transport: Arc<dyn McpTransport>,
    reconnecting: AtomicBool,
}

impl ServerSlot {
    fn state(&self) -> ConnectionState {
        self.connection.read().state
    }
}

pub struct McpGateway {
    config: McpConfig,
    servers: RwLock<HashMap<String, Arc<ServerSlot>>>,
    bus: EventBus,
    shutdown: CancellationToken,
}

impl McpGateway {
    pub fn new(config: McpConfig, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            servers: RwLock::new(HashMap::new()),
            bus,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    pub fn register(&self, server: McpServerConfig, transport: Arc<dyn McpTransport>) -> Result<(), McpError> {
        let mut servers = self.servers.write();
        if servers.contains_key(&server.name) {
            return Err(McpError::AlreadyRegistered(server.name));
        }
        if servers.len() >= self.config.max_servers {
            return Err(McpError::CapacityExceeded {
                max: self.config.max_servers,
            });
        }
        info!(server = %server.name, endpoint = %server.endpoint, "Registered MCP server");
        let connection = McpServerConnection::new(server.name.clone(), server.endpoint.clone());
        servers.insert(
            server.name.clone(),
            Arc::new(ServerSlot {
                config: server,
                connection: RwLock::new(connection),
                transport,
                reconnecting: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        match self.servers.write().remove(name) {
            Some(slot) => {
                slot.connection.write().disconnect();
                info!(server = %name, "Unregistered MCP server");
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn slot(&self, name: &str) -> Result<Arc<ServerSlot>, McpError> {
        self.servers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))
    }

    /// Handshake with a disconnected server.
    pub async fn connect(&self, name: &str) -> Result<(), McpError> {
        let slot = self.slot(name)?;
        if slot.connection.write().begin_connect().is_err() {
            debug!(server = %name, state = ?slot.state(), "Connect skipped; server not disconnected");
            return Ok(());
        }

        let handshake = tokio::time::timeout(self.config.call_timeout, slot.transport.initialize()).await;
        let result = match handshake {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: name.to_string(),
                tool: "initialize".to_string(),
                timeout: self.config.call_timeout,
            }),
        };

        let mut connection = slot.connection.write();
        match result {
            Ok(tools) => {
                let count = tools.len();
                connection
                    .connected(tools)
                    .map_err(|e| McpError::Transport(e.to_string()))?;
                info!(server = %name, tools = count, "MCP server connected");
                metrics::gauge!("cadence_mcp_connected", "server" => name.to_string()).set(1.0);
                Ok(())
            }
            Err(e) => {
                connection
                    .connect_failed()
                    .map_err(|e| McpError::Transport(e.to_string()))?;
                warn!(server = %name, error = %e, "MCP handshake failed");
                Err(e)
            }
        }
    }

    /// Connect every enabled, disconnected server. Failures are logged; the
    /// servers stay disconnected.
    pub async fn connect_all(&self) {
        let names: Vec<String> = self
            .servers
            .read()
            .values()
            .filter(|slot| slot.config.enabled && slot.state() == ConnectionState::Disconnected)
            .map(|slot| slot.config.name.clone())
            .collect();
        let attempts = names.iter().map(|name| self.connect(name));
        futures::future::join_all(attempts).await;
    }

    /// Call a tool. Fails fast unless the server is `Connected`; bounded by
    /// `timeout` (or the configured call timeout); never retried.
    pub async fn invoke(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let slot = self.slot(server)?;
        match slot.state() {
            ConnectionState::Connected => {}
            ConnectionState::Degraded => return Err(McpError::ServerDegraded(server.to_string())),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(McpError::ServerUnreachable(server.to_string()))
            }
        }

        if let Err(violation) = slot.config.policy.validate_invocation(tool, &arguments) {
            warn!(server = %server, tool = %tool, violation = %violation, "Tool call denied by policy");
            metrics::counter!("cadence_mcp_calls_denied_total", "server" => server.to_string()).increment(1);
            return Err(McpError::ToolDenied(violation));
        }

        let timeout = timeout.unwrap_or(self.config.call_timeout);
        let result = match tokio::time::timeout(timeout, slot.transport.call_tool(tool, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: server.to_string(),
                tool: tool.to_string(),
                timeout,
            }),
        };

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("cadence_mcp_calls_total", "server" => server.to_string(), "outcome" => outcome)
            .increment(1);
        if let Err(e) = &result {
            debug!(server = %server, tool = %tool, error = %e, "Tool call failed");
        }
        result
    }

    pub fn health(&self, server: &str) -> Result<McpServerConnection, McpError> {
        Ok(self.slot(server)?.connection.read().clone())
    }

    pub fn health_all(&self) -> Vec<McpHealth> {
        let mut health: Vec<McpHealth> = self
            .servers
            .read()
            .values()
            .map(|slot| {
                let conn = slot.connection.read();
                McpHealth {
                    name: conn.name.clone(),
                    state: conn.state,
                    consecutive_failures: conn.consecutive_failures,
                    last_ok_ping: conn.last_ok_ping,
                    tool_count: conn.tools.len(),
                }
            })
            .collect();
        health.sort_by(|a, b| a.name.cmp(&b.name));
        health
    }

    async fn ping(&self, slot: &ServerSlot) -> bool {
        matches!(
            tokio::time::timeout(self.config.call_timeout, slot.transport.ping()).await,
            Ok(Ok(()))
        )
    }

    /// One health pass over every connected server.
    pub async fn check_health(self: &Arc<Self>) {
        let connected: Vec<Arc<ServerSlot>> = self
            .servers
            .read()
            .values()
            .filter(|slot| slot.state() == ConnectionState::Connected)
            .cloned()
            .collect();

        for slot in connected {
            let healthy = self.ping(&slot).await;
            let transition = slot
                .connection
                .write()
                .record_health(healthy, self.config.failure_threshold);
            if !healthy {
                debug!(server = %slot.config.name, "Health check failed");
            }
            if transition == Some(HealthTransition::Degraded) {
                self.on_degraded(&slot);
                self.spawn_reconnect(slot);
            }
        }
    }

    fn on_degraded(&self, slot: &ServerSlot) {
        let failures = slot.connection.read().consecutive_failures;
        warn!(server = %slot.config.name, failures, "MCP server degraded");
        metrics::gauge!("cadence_mcp_connected", "server" => slot.config.name.clone()).set(0.0);
        self.bus.publish(LifecycleEvent::mcp(
            EventKind::McpServerDegraded,
            &slot.config.name,
            json!({ "consecutive_failures": failures }),
        ));
    }

    fn spawn_reconnect(self: &Arc<Self>, slot: Arc<ServerSlot>) {
        if slot.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            gateway.reconnect_loop(&slot).await;
            slot.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect_loop(&self, slot: &ServerSlot) {
        let name = slot.config.name.clone();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let delay = self.config.reconnect_backoff.delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return,
            }
            if slot.state() != ConnectionState::Degraded {
                return;
            }

            if self.ping(slot).await {
                let transition = slot
                    .connection
                    .write()
                    .record_health(true, self.config.failure_threshold);
                if transition == Some(HealthTransition::Recovered) {
                    info!(server = %name, attempt, "MCP server recovered");
                    metrics::gauge!("cadence_mcp_connected", "server" => name.clone()).set(1.0);
                    self.bus.publish(LifecycleEvent::mcp(
                        EventKind::McpServerRecovered,
                        &name,
                        json!({ "attempts": attempt }),
                    ));
                }
                return;
            }

            let gave_up = slot
                .connection
                .write()
                .record_reconnect_failure(self.config.max_reconnect_attempts);
            if gave_up {
                error!(server = %name, attempts = attempt, "MCP reconnect attempts exhausted; disconnected");
                return;
            }
            debug!(server = %name, attempt, "Reconnect probe failed");
        }
    }

    /// Health loop on a fixed interval until `shutdown` fires.
    pub fn spawn_health_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(gateway.config.health_check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => gateway.check_health().await,
                    _ = shutdown.cancelled() => break,
                }
            }
            gateway.shutdown.cancel();
            debug!("MCP health loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mcp::{McpTool, ToolPolicy};
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct ScriptedTransport {
        down: AtomicBool,
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn initialize(&self) -> Result<Vec<McpTool>, McpError> {
            Ok(vec![McpTool {
                name: "search".into(),
                description: None,
                input_schema: None,
            }])
        }

        async fn ping(&self) -> Result<(), McpError> {
            if self.down.load(Ordering::SeqCst) {
                Err(McpError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
            Ok(json!({ "tool": tool, "echo": arguments }))
        }
    }

    fn server(name: &str) -> McpServerConfig {
        McpServerConfig {
            name: name.to_string(),
            endpoint: format!("http://localhost/{}", name),
            enabled: true,
            headers: HashMap::new(),
            policy: ToolPolicy::default(),
        }
    }

    async fn connected_gateway() -> (Arc<McpGateway>, Arc<ScriptedTransport>) {
        let gateway = McpGateway::new(McpConfig::default(), EventBus::new(16));
        let transport = Arc::new(ScriptedTransport::default());
        gateway.register(server("search"), transport.clone()).unwrap();
        gateway.connect("search").await.unwrap();
        (gateway, transport)
    }

    #[tokio::test]
    async fn test_registration_cap() {
        let gateway = McpGateway::new(McpConfig::default(), EventBus::new(16));
        for name in ["a", "b", "c"] {
            gateway.register(server(name), Arc::new(ScriptedTransport::default())).unwrap();
        }
        let err = gateway
            .register(server("d"), Arc::new(ScriptedTransport::default()))
            .unwrap_err();
        assert!(matches!(err, McpError::CapacityExceeded { max: 3 }));
        assert!(matches!(
            gateway.register(server("a"), Arc::new(ScriptedTransport::default())),
            Err(McpError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_and_policy() {
        let (gateway, _) = connected_gateway().await;
        let result = gateway.invoke("search", "search", json!({"q": "rust"}), None).await.unwrap();
        assert_eq!(result["echo"]["q"], "rust");

        let denied = gateway
            .invoke("search", "exec", json!({"command": "rm -rf /"}), None)
            .await
            .unwrap_err();
        assert!(matches!(denied, McpError::ToolDenied(_)));

        assert!(matches!(
            gateway.invoke("missing", "search", json!({}), None).await,
            Err(McpError::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn test_degrades_after_threshold_and_fails_fast() {
        let (gateway, transport) = connected_gateway().await;
        let mut events = gateway.bus.subscribe();
        transport.down.store(true, Ordering::SeqCst);

        gateway.check_health().await;
        gateway.check_health().await;
        assert_eq!(gateway.health("search").unwrap().state, ConnectionState::Connected);
        assert_eq!(gateway.health("search").unwrap().consecutive_failures, 2);

        gateway.check_health().await;
        assert_eq!(gateway.health("search").unwrap().state, ConnectionState::Degraded);
        assert_eq!(events.recv().await.unwrap().kind, EventKind::McpServerDegraded);

        assert!(matches!(
            gateway.invoke("search", "search", json!({}), None).await,
            Err(McpError::ServerDegraded(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_loop_recovers_after_verified_ping() {
        let (gateway, transport) = connected_gateway().await;
        let mut events = gateway.bus.subscribe_kinds(vec![EventKind::McpServerRecovered]);
        transport.down.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            gateway.check_health().await;
        }
        assert_eq!(gateway.health("search").unwrap().state, ConnectionState::Degraded);

        // still down for the first probes
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(gateway.health("search").unwrap().state, ConnectionState::Degraded);

        transport.down.store(false, Ordering::SeqCst);
        let event = events.recv().await.unwrap();
        assert_eq!(event.correlation_id, "search");
        let health = gateway.health("search").unwrap();
        assert_eq!(health.state, ConnectionState::Connected);
        assert_eq!(health.consecutive_failures, 0);
    }
}
