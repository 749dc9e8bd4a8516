//! Typed event bus (C13).
//!
//! Every publish fans out over a `tokio::sync::broadcast` channel and is
//! appended to a bounded ring (capacity 1,000) for snapshot/replay. The bus
//! keeps one internal no-op receiver alive for its whole lifetime so that
//! publishing an `error` event with zero external subscribers never turns
//! into a dropped-channel condition the caller has to special-case.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

const RING_CAPACITY: usize = 1000;
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Metrics,
    Request,
    Error,
    Audit,
    Healing,
    Breaker,
    Session,
    Store,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    ring: Arc<Mutex<VecDeque<Event>>>,
    _default_subscriber: broadcast::Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, default_subscriber) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
            _default_subscriber: default_subscriber,
        }
    }

    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let event = Event {
            kind,
            timestamp: Utc::now(),
            payload,
        };

        let mut ring = self.ring.lock();
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(event.clone());
        drop(ring);

        // Err here just means no subscriber wants this event right now; the
        // default subscriber above keeps the send from ever failing outright.
        let _ = self.sender.send(event);
    }

    /// Subscribes to one kind, or every kind when `kind` is `None` (the `*`
    /// subscription). Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(&self, kind: Option<EventKind>) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: kind,
        }
    }

    /// Most recent events, newest last, optionally filtered to one kind —
    /// used by the push channel's connect-time snapshot.
    pub fn recent(&self, kind: Option<EventKind>, limit: usize) -> Vec<Event> {
        let ring = self.ring.lock();
        ring.iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventKind>,
}

impl Subscription {
    /// Waits for the next event matching this subscription's filter. Lagged
    /// broadcast receivers are resynced transparently (skipped forward).
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.map_or(true, |k| event.kind == k) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_matching_kind_only() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(EventKind::Healing));
        bus.publish(EventKind::Metrics, serde_json::json!({}));
        bus.publish(EventKind::Healing, serde_json::json!({"fault": "memory"}));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Healing);
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_every_kind() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        bus.publish(EventKind::Store, serde_json::json!({}));
        bus.publish(EventKind::Breaker, serde_json::json!({}));

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Store);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Breaker);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(EventKind::Error, serde_json::json!({"message": "boom"}));
    }

    #[tokio::test]
    async fn ring_caps_at_1000_and_keeps_newest() {
        let bus = EventBus::new();
        for i in 0..1100 {
            bus.publish(EventKind::Audit, serde_json::json!({"i": i}));
        }
        let recent = bus.recent(Some(EventKind::Audit), 5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent.last().unwrap().payload["i"], 1099);
    }
}
