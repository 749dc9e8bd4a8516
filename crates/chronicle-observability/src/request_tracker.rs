//! Request tracker (C14, request-tracking half).
//!
//! Dedicated to the push channel's own WebSocket-upgrade HTTP surface — the
//! only inbound HTTP endpoint this core owns. Assigns each request a short
//! random id, records `{method, path, status, duration}` on completion, and
//! keeps per-route aggregates.

use crate::event_bus::{EventBus, EventKind};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_RING_CAPACITY: usize = 1000;
const ERROR_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteAggregate {
    pub count: u64,
    pub error_count: u64,
    pub total_duration_ms: f64,
}

pub struct RequestTracker {
    requests: Arc<RwLock<VecDeque<RequestRecord>>>,
    errors: Arc<RwLock<VecDeque<RequestRecord>>>,
    aggregates: Arc<RwLock<HashMap<String, RouteAggregate>>>,
    bus: Arc<EventBus>,
}

/// Short random identifier assigned to each inbound request.
pub fn new_request_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

impl RequestTracker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            requests: Arc::new(RwLock::new(VecDeque::with_capacity(REQUEST_RING_CAPACITY))),
            errors: Arc::new(RwLock::new(VecDeque::with_capacity(ERROR_RING_CAPACITY))),
            aggregates: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    pub fn record(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let record = RequestRecord {
            id: new_request_id(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            duration_ms: duration.as_secs_f64() * 1000.0,
            at: Utc::now(),
        };

        {
            let mut requests = self.requests.write();
            if requests.len() == REQUEST_RING_CAPACITY {
                requests.pop_front();
            }
            requests.push_back(record.clone());
        }

        let is_error = status >= 400;
        if is_error {
            let mut errors = self.errors.write();
            if errors.len() == ERROR_RING_CAPACITY {
                errors.pop_front();
            }
            errors.push_back(record.clone());
        }

        {
            let mut aggregates = self.aggregates.write();
            let entry = aggregates.entry(path.to_string()).or_default();
            entry.count += 1;
            entry.total_duration_ms += record.duration_ms;
            if is_error {
                entry.error_count += 1;
            }
        }

        self.bus.publish(
            if is_error { EventKind::Error } else { EventKind::Request },
            serde_json::to_value(&record).unwrap_or_default(),
        );
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.read().iter().cloned().collect()
    }

    pub fn errors(&self) -> Vec<RequestRecord> {
        self.errors.read().iter().cloned().collect()
    }

    pub fn aggregates(&self) -> HashMap<String, RouteAggregate> {
        self.aggregates.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_lands_in_both_rings_and_marks_aggregate() {
        let bus = Arc::new(EventBus::new());
        let tracker = RequestTracker::new(bus);
        tracker.record("GET", "/debug/ws", 500, Duration::from_millis(12));

        assert_eq!(tracker.requests().len(), 1);
        assert_eq!(tracker.errors().len(), 1);
        let agg = tracker.aggregates();
        assert_eq!(agg["/debug/ws"].count, 1);
        assert_eq!(agg["/debug/ws"].error_count, 1);
    }

    #[test]
    fn successful_request_does_not_enter_error_ring() {
        let bus = Arc::new(EventBus::new());
        let tracker = RequestTracker::new(bus);
        tracker.record("GET", "/debug/ws", 101, Duration::from_millis(2));
        assert_eq!(tracker.errors().len(), 0);
    }

    #[test]
    fn request_ids_are_unique_enough_across_many_calls() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| new_request_id()).collect();
        assert!(ids.len() > 90);
    }

    #[test]
    fn ring_caps_request_history_at_1000() {
        let bus = Arc::new(EventBus::new());
        let tracker = RequestTracker::new(bus);
        for _ in 0..1100 {
            tracker.record("GET", "/debug/ws", 200, Duration::from_millis(1));
        }
        assert_eq!(tracker.requests().len(), 1000);
    }
}
