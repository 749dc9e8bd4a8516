//! Per-connection handling: snapshot on connect, `*`-kind event relay, a 5s
//! metrics heartbeat, and inbound client requests — three independent tasks
//! feeding one `mpsc` channel so the socket's write half is only ever
//! touched from a single task (axum's `WebSocket` sink is not `Clone`).

use crate::PushServer;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const METRICS_PUSH_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) async fn handle(server: Arc<PushServer>, socket: WebSocket) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    server.connections.insert(connection_id.clone(), tx.clone());

    let _ = tx.send(reply("snapshot", server.snapshot()));

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let relay_tx = tx.clone();
    let mut subscription = server.bus.subscribe(None);
    let relay = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let payload = serde_json::to_value(&event).unwrap_or_default();
            if relay_tx.send(reply("event", payload)).is_err() {
                break;
            }
        }
    });

    let tick_tx = tx.clone();
    let metrics = server.metrics.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_PUSH_INTERVAL);
        loop {
            interval.tick().await;
            let payload = serde_json::json!({ "metrics": metrics.latest() });
            if tick_tx.send(reply("metrics_update", payload)).is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Message::Text(text) = message {
            if let Some(response) = handle_request(&server, &text) {
                let _ = tx.send(response);
            }
        }
    }

    debug!(connection_id, "push connection closed");
    server.connections.remove(&connection_id);
    writer.abort();
    relay.abort();
    ticker.abort();
}

fn handle_request(server: &PushServer, text: &str) -> Option<Message> {
    let request: serde_json::Value = serde_json::from_str(text).ok()?;
    let kind = request.get("type")?.as_str()?;

    let (reply_kind, payload) = match kind {
        "get_metrics" => ("metrics", serde_json::json!(server.metrics.latest())),
        "get_metrics_history" => ("metrics_history", serde_json::json!(server.metrics.history())),
        "get_requests" => ("requests", serde_json::json!(server.requests.requests())),
        "get_errors" => ("errors", serde_json::json!(server.requests.errors())),
        "get_health" => (
            "health",
            serde_json::json!({
                "metrics": server.metrics.latest(),
                "breaker_states": server.breakers.all_states(),
            }),
        ),
        "get_healing_status" => ("healing_status", serde_json::json!(server.healing.actions())),
        "ping" => ("pong", serde_json::json!({ "server_time": Utc::now() })),
        _ => return None,
    };

    Some(reply(reply_kind, payload))
}

fn reply(kind: &str, payload: serde_json::Value) -> Message {
    Message::Text(
        serde_json::json!({
            "type": kind,
            "payload": payload,
            "timestamp": Utc::now(),
        })
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_observability::{EventBus, MetricsSampler, RequestTracker, SelfHealingController};
    use chronicle_resilience::BreakerRegistry;
    use chronicle_store::StoreAdapter;
    use std::sync::Arc;

    fn json_of(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            _ => panic!("expected a text frame"),
        }
    }

    #[test]
    fn ping_replies_with_pong_and_server_time() {
        let response = handle_request(&test_server(), r#"{"type":"ping"}"#).unwrap();
        let value = json_of(response);
        assert_eq!(value["type"], "pong");
        assert!(value["payload"]["server_time"].is_string());
    }

    #[test]
    fn unrecognized_request_type_is_ignored() {
        assert!(handle_request(&test_server(), r#"{"type":"not_a_real_command"}"#).is_none());
    }

    #[test]
    fn malformed_json_is_ignored() {
        assert!(handle_request(&test_server(), "not json").is_none());
    }

    #[test]
    fn get_metrics_wraps_latest_sample_in_named_payload() {
        let response = handle_request(&test_server(), r#"{"type":"get_metrics"}"#).unwrap();
        assert_eq!(json_of(response)["type"], "metrics");
    }

    /// A lazy pool never opens a connection until first queried, so this is
    /// safe to construct without a live database for request-dispatch tests.
    fn test_server() -> PushServer {
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsSampler::new(bus.clone(), Duration::from_secs(10)));
        let requests = Arc::new(RequestTracker::new(bus.clone()));
        let breakers = Arc::new(BreakerRegistry::default());
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/chronicle_test").unwrap();
        let store = Arc::new(StoreAdapter::from_pool(pool));
        let healing = Arc::new(SelfHealingController::new(metrics.clone(), store, breakers.clone(), bus.clone(), Duration::from_secs(30)));

        PushServer {
            bus,
            metrics,
            requests,
            healing,
            breakers,
            connections: dashmap::DashMap::new(),
        }
    }
}
