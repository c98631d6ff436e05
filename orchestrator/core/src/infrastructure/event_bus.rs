// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Upgrade Events
//
// In-memory event streaming over a tokio broadcast channel. The CLI's
// `run --follow` subscribes to one run; events are not persisted (the
// execution history is the durable record).

use crate::domain::events::UpgradeEvent;
use crate::domain::execution::RunId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to upgrade events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<UpgradeEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Slow subscribers lose the oldest events once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: UpgradeEvent) {
        debug!(run_id = %event.run_id(), "Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all upgrade events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single run
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventReceiver {
        RunEventReceiver {
            receiver: self.sender.subscribe(),
            run_id,
        }
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

/// Receiver for all upgrade events
pub struct EventReceiver {
    receiver: broadcast::Receiver<UpgradeEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<UpgradeEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }
}

/// Receiver filtered to one run id
pub struct RunEventReceiver {
    receiver: broadcast::Receiver<UpgradeEvent>,
    run_id: RunId,
}

impl RunEventReceiver {
    /// Next event of this run; events of other runs are skipped
    pub async fn recv(&mut self) -> Result<UpgradeEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.run_id() == &self.run_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

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
    use chrono::Utc;

    fn started(run: &str) -> UpgradeEvent {
        UpgradeEvent::UpgradeStarted {
            run_id: RunId::new(run).unwrap(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(started("run-1"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.run_id().as_str(), "run-1");
    }

    #[tokio::test]
    async fn test_lagging_receiver_reports_dropped_events() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();

        for run in ["run-1", "run-2", "run-3"] {
            event_bus.publish(started(run));
        }

        assert!(matches!(receiver.recv().await, Err(EventBusError::Lagged(1))));
        let next = receiver.recv().await.unwrap();
        assert_eq!(next.run_id().as_str(), "run-2");
    }

    #[tokio::test]
    async fn test_run_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_run(RunId::new("run-42").unwrap());

        event_bus.publish(started("run-7"));
        event_bus.publish(UpgradeEvent::UpgradeSucceeded {
            run_id: RunId::new("run-42").unwrap(),
            completed_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.run_id().as_str(), "run-42");
        assert!(received.is_terminal());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        event_bus.publish(started("run-1"));

        assert_eq!(receiver1.recv().await.unwrap().run_id().as_str(), "run-1");
        assert_eq!(receiver2.recv().await.unwrap().run_id().as_str(), "run-1");
    }
}
