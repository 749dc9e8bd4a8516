//! Push channel (C16): a WebSocket endpoint the operator dashboard connects
//! to for a live view of the pipeline.
//!
//! On connect, pushes a snapshot, subscribes the socket to every event-bus
//! kind (`*`) and relays each one, answers a small fixed set of client
//! requests, and pushes a metrics update every 5s regardless of activity.

mod socket;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chronicle_observability::{EventBus, MetricsSampler, RequestTracker, SelfHealingController};
use chronicle_resilience::BreakerRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

pub struct PushServer {
    bus: Arc<EventBus>,
    metrics: Arc<MetricsSampler>,
    requests: Arc<RequestTracker>,
    healing: Arc<SelfHealingController>,
    breakers: Arc<BreakerRegistry>,
    connections: DashMap<String, tokio::sync::mpsc::UnboundedSender<axum::extract::ws::Message>>,
}

impl PushServer {
    pub fn new(bus: Arc<EventBus>, metrics: Arc<MetricsSampler>, requests: Arc<RequestTracker>, healing: Arc<SelfHealingController>, breakers: Arc<BreakerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            metrics,
            requests,
            healing,
            breakers,
            connections: DashMap::new(),
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/debug/ws", get(ws_upgrade))
            .layer(middleware::from_fn_with_state(self.clone(), track_requests))
            .with_state(self)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "metrics": self.metrics.latest(),
            "metrics_history": self.metrics.history(),
            "requests": self.requests.requests(),
            "request_aggregates": self.requests.aggregates(),
            "errors": self.requests.errors(),
            "healing_status": self.healing.actions(),
            "breaker_states": self.breakers.all_states(),
        })
    }
}

async fn ws_upgrade(State(server): State<Arc<PushServer>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket::handle(server, socket))
}

/// Records every inbound request against [`RequestTracker`] (spec §4.14,
/// request-tracking half) — the only HTTP surface this core owns is the one
/// websocket upgrade route, so this is the single place requests are seen.
async fn track_requests(State(server): State<Arc<PushServer>>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    server.requests.record(&method, &path, response.status().as_u16(), start.elapsed());
    response
}
