//! Event bus, metrics/request tracker, self-healing controller (C13-C15).

mod event_bus;
mod metrics;
mod request_tracker;
mod self_healing;

pub use event_bus::{Event, EventBus, EventKind, Subscription};
pub use metrics::{MetricSample, MetricsSampler};
pub use request_tracker::{new_request_id, RequestRecord, RequestTracker, RouteAggregate};
pub use self_healing::{HealingAction, SelfHealingController};
