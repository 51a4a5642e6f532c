// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Bus Implementation - Pub/Sub for Lifecycle Events
//!
//! In-memory fan-out over a tokio broadcast channel. The queue, session
//! store and MCP gateway publish; the hook chain engine, SSE endpoints and
//! tests subscribe. Events are not persisted.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{EventKind, LifecycleEvent};
use crate::domain::task::TaskId;

/// Event bus for publishing and subscribing to lifecycle events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<LifecycleEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Slow receivers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1024)
    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LifecycleEvent) {
        debug!(kind = %event.kind, correlation_id = %event.correlation_id, "Publishing event");

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all lifecycle events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for one task's events
    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventReceiver {
        TaskEventReceiver {
            receiver: self.sender.subscribe(),
            task_id,
        }
    }

    /// Subscribe and filter for a set of event kinds
    pub fn subscribe_kinds(&self, kinds: Vec<EventKind>) -> KindEventReceiver {
        KindEventReceiver {
            receiver: self.sender.subscribe(),
            kinds,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all lifecycle events
pub struct EventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<LifecycleEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<LifecycleEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for task-specific events (filtered)
pub struct TaskEventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    task_id: TaskId,
}

impl TaskEventReceiver {
    pub async fn recv(&mut self) -> Result<LifecycleEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.task_id == Some(self.task_id) {
                return Ok(event);
            }
        }
    }
}

/// Receiver for a fixed set of event kinds (filtered)
pub struct KindEventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    kinds: Vec<EventKind>,
}

impl KindEventReceiver {
    pub async fn recv(&mut self) -> Result<LifecycleEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.kinds.contains(&event.kind) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{Priority, Task};
    use serde_json::json;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let task = Task::new("backend", json!({}), Priority::Normal);
        event_bus.publish(LifecycleEvent::task_queued(&task));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::TaskQueued);
        assert_eq!(received.task_id, Some(task.id));
    }

    #[tokio::test]
    async fn test_task_event_filtering() {
        let event_bus = EventBus::new(10);
        let ours = Task::new("backend", json!({}), Priority::Normal);
        let other = Task::new("backend", json!({}), Priority::Normal);

        let mut receiver = event_bus.subscribe_task(ours.id);
        event_bus.publish(LifecycleEvent::task_started(&other));
        event_bus.publish(LifecycleEvent::task_started(&ours));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.task_id, Some(ours.id));
    }

    #[tokio::test]
    async fn test_kind_filtering_and_subscriber_count() {
        let event_bus = EventBus::new(10);
        let mut aborted = event_bus.subscribe_kinds(vec![EventKind::ChainAborted]);
        let _all = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        let task = Task::new("backend", json!({}), Priority::Normal);
        event_bus.publish(LifecycleEvent::task_started(&task));
        event_bus.publish(LifecycleEvent::new(EventKind::ChainAborted, task.id.to_string()));

        let received = aborted.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::ChainAborted);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_drop() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for _ in 0..5 {
            event_bus.publish(LifecycleEvent::new(EventKind::TaskQueued, "x"));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert!(receiver.try_recv().is_ok());
    }
}
