// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Status Aggregator
//!
//! Timer-driven producer of immutable [`StatusSnapshot`]s. Each tick reads
//! every component through its own accessor in turn (no global lock), so a
//! snapshot is coherent to within one tick.
//!
//! Subscribers get a bounded channel. A subscriber whose buffer is full when
//! a snapshot is published is dropped; the producer never waits.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::hook_engine::HookEngine;
use crate::application::mcp_gateway::McpGateway;
use crate::application::queue::ExecutionQueue;
use crate::application::registry::AgentRegistry;
use crate::domain::config::StatusConfig;
use crate::domain::status::{AgentLoad, StatusSnapshot};

pub type SnapshotReceiver = mpsc::Receiver<Arc<StatusSnapshot>>;

#[derive(Default)]
struct Clock {
    sequence: u64,
    last: Option<DateTime<Utc>>,
}

pub struct StatusAggregator {
    registry: Arc<AgentRegistry>,
    queue: Arc<ExecutionQueue>,
    hooks: Arc<HookEngine>,
    gateway: Arc<McpGateway>,
    config: StatusConfig,
    clock: Mutex<Clock>,
    latest: RwLock<Option<Arc<StatusSnapshot>>>,
    subscribers: Mutex<Vec<mpsc::Sender<Arc<StatusSnapshot>>>>,
}

impl StatusAggregator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        queue: Arc<ExecutionQueue>,
        hooks: Arc<HookEngine>,
        gateway: Arc<McpGateway>,
        config: StatusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            queue,
            hooks,
            gateway,
            config,
            clock: Mutex::new(Clock::default()),
            latest: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Most recent snapshot, if any tick has run.
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.latest.read().clone()
    }

    /// Receive snapshots published from now on.
    pub fn subscribe(&self) -> SnapshotReceiver {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Build and publish one snapshot.
    pub fn tick(&self, degraded: bool) -> Arc<StatusSnapshot> {
        let depths = self.queue.depths();
        let agents = self
            .registry
            .records()
            .into_iter()
            .map(|record| {
                let depth = depths.get(record.name()).copied().unwrap_or_default();
                AgentLoad {
                    name: record.name().to_string(),
                    queued: depth.queued,
                    running: depth.running,
                    max_concurrency: record.descriptor.max_concurrency,
                    succeeded: record.succeeded,
                    failed: record.failed,
                    success_rate: record.success_rate(),
                    avg_duration_ms: record.avg_duration_ms,
                    cost_tier: record.descriptor.cost_tier,
                    enabled: record.descriptor.enabled,
                }
            })
            .collect();
        let hooks = self.hooks.hook_health();
        let chains = self.hooks.take_chain_tally();
        let mcp = self.gateway.health_all();

        let (sequence, generated_at) = {
            let mut clock = self.clock.lock();
            clock.sequence += 1;
            let now = Utc::now();
            let at = match clock.last {
                Some(last) if now <= last => last + chrono::Duration::microseconds(1),
                _ => now,
            };
            clock.last = Some(at);
            (clock.sequence, at)
        };

        let snapshot = Arc::new(StatusSnapshot {
            sequence,
            generated_at,
            agents,
            hooks,
            chains,
            mcp,
            degraded,
        });
        *self.latest.write() = Some(Arc::clone(&snapshot));
        self.publish(&snapshot);
        snapshot
    }

    fn publish(&self, snapshot: &Arc<StatusSnapshot>) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| match tx.try_send(Arc::clone(snapshot)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(sequence = snapshot.sequence, "Status subscriber too slow; dropping it");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        let dropped = before - subscribers.len();
        if dropped > 0 {
            metrics::counter!("cadence_status_subscribers_dropped_total").increment(dropped as u64);
        }
    }

    /// Tick on the configured interval until `shutdown` fires. A tick that
    /// starts more than twice the interval after the previous one is flagged
    /// degraded.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let period = aggregator.config.interval;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut previous: Option<tokio::time::Instant> = None;
            info!(interval = ?period, "Status aggregator started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // tick() yields the scheduled deadline, not when the tick actually fired
                        let at = tokio::time::Instant::now();
                        let gap = previous.map(|p| at.saturating_duration_since(p)).unwrap_or(period);
                        let degraded = drifted(gap, period);
                        if degraded {
                            warn!(gap = ?gap, interval = ?period, "Status tick drifted; degraded mode");
                        }
                        previous = Some(at);
                        let snapshot = aggregator.tick(degraded);
                        debug!(sequence = snapshot.sequence, "Status snapshot published");
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            info!("Status aggregator stopped");
        })
    }
}

fn drifted(gap: Duration, interval: Duration) -> bool {
    gap > interval * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::hook_engine::HookRunner;
    use crate::application::session_store::SessionStore;
    use crate::domain::agent::{AgentCategory, AgentDescriptor};
    use crate::domain::config::{McpConfig, QueueConfig, SessionConfig};
    use crate::domain::events::LifecycleEvent;
    use crate::domain::hook::{HookDescriptor, HookError};
    use crate::infrastructure::event_bus::EventBus;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoHooks;

    #[async_trait]
    impl HookRunner for NoHooks {
        async fn run(&self, _: &HookDescriptor, _: &LifecycleEvent) -> Result<Option<Value>, HookError> {
            Ok(None)
        }
    }

    fn aggregator(buffer: usize) -> Arc<StatusAggregator> {
        let bus = EventBus::new(64);
        let registry = Arc::new(AgentRegistry::new(vec![AgentDescriptor::new(
            "backend",
            AgentCategory::Backend,
            2,
        )]));
        let store = Arc::new(SessionStore::in_memory(bus.clone(), SessionConfig::default()));
        let queue = ExecutionQueue::new(registry.clone(), store, bus.clone(), QueueConfig::default());
        queue.sync_lanes();
        let hooks = HookEngine::new(Vec::new(), Arc::new(NoHooks), 1, bus.clone());
        let gateway = McpGateway::new(McpConfig::default(), bus);
        StatusAggregator::new(
            registry,
            queue,
            hooks,
            gateway,
            StatusConfig {
                interval: Duration::from_millis(10),
                subscriber_buffer: buffer,
            },
        )
    }

    #[tokio::test]
    async fn test_snapshots_are_strictly_increasing() {
        let aggregator = aggregator(8);
        let mut previous = aggregator.tick(false);
        for _ in 0..50 {
            let next = aggregator.tick(false);
            assert!(next.sequence > previous.sequence);
            assert!(next.generated_at > previous.generated_at);
            previous = next;
        }
        assert_eq!(aggregator.latest().unwrap().sequence, 51);
        assert_eq!(previous.agent("backend").unwrap().max_concurrency, 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped_without_blocking() {
        let aggregator = aggregator(2);
        let mut fast = aggregator.subscribe();
        let _slow = aggregator.subscribe();

        for _ in 0..2 {
            aggregator.tick(false);
            assert!(fast.recv().await.is_some());
        }
        assert_eq!(aggregator.subscriber_count(), 2);

        // the slow subscriber's buffer is full now
        aggregator.tick(false);
        assert_eq!(aggregator.subscriber_count(), 1);
        assert_eq!(fast.recv().await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_snapshots() {
        let aggregator = aggregator(4);
        aggregator.tick(false);
        let mut late = aggregator.subscribe();
        aggregator.tick(false);
        assert_eq!(late.recv().await.unwrap().sequence, 2);
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_drift_threshold() {
        let interval = Duration::from_millis(100);
        assert!(!drifted(Duration::from_millis(200), interval));
        assert!(drifted(Duration::from_millis(201), interval));
    }
}
