//! Self-healing controller (C15).
//!
//! Periodic fire (default 30s) inspecting the latest metrics sample, the
//! store's health, and breaker states, taking a cooldown-gated remediation
//! per fault kind (spec §4.15 table). Every attempt — whether or not the
//! cooldown let it run — is recorded as a `healing` event; the ones that
//! actually ran also land in a 200-entry ring.
//!
//! Rust has no VM-managed heap to request a collection from (see
//! `metrics.rs`); "request GC twice with a pause, record freed bytes" is
//! reinterpreted here as two RSS samples taken a short pause apart, with the
//! observed delta reported as bytes reclaimed (never negative).

use crate::event_bus::{EventBus, EventKind};
use crate::metrics::MetricsSampler;
use chronicle_resilience::BreakerRegistry;
use chronicle_store::StoreAdapter;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{info, warn};

const RING_CAPACITY: usize = 200;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
const MEMORY_PRESSURE_RATIO: f64 = 0.85;
const BLOCKED_LATENCY_THRESHOLD_MS: f64 = 100.0;

const FAULT_MEMORY_PRESSURE: &str = "memory_pressure";
const FAULT_STORE_DOWN: &str = "store_down";
const FAULT_EVENT_LOOP_BLOCKED: &str = "event_loop_blocked";
const FAULT_BREAKER_STUCK_OPEN: &str = "breaker_stuck_open";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAction {
    pub fault: String,
    pub action: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

pub struct SelfHealingController {
    metrics: Arc<MetricsSampler>,
    store: Arc<StoreAdapter>,
    breakers: Arc<BreakerRegistry>,
    bus: Arc<EventBus>,
    interval: Duration,
    cooldown: Duration,
    last_action_at: RwLock<HashMap<&'static str, Instant>>,
    ring: RwLock<VecDeque<HealingAction>>,
}

impl SelfHealingController {
    pub fn new(metrics: Arc<MetricsSampler>, store: Arc<StoreAdapter>, breakers: Arc<BreakerRegistry>, bus: Arc<EventBus>, interval: Duration) -> Self {
        Self {
            metrics,
            store,
            breakers,
            bus,
            interval,
            cooldown: DEFAULT_COOLDOWN,
            last_action_at: RwLock::new(HashMap::new()),
            ring: RwLock::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    pub fn actions(&self) -> Vec<HealingAction> {
        self.ring.read().iter().cloned().collect()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    info!("self-healing controller shutting down");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        if let Some(sample) = self.metrics.latest() {
            let ratio = sample.heap_used_bytes as f64 / sample.heap_total_bytes.max(1) as f64;
            if ratio > MEMORY_PRESSURE_RATIO {
                self.gated(FAULT_MEMORY_PRESSURE, || self.reclaim_memory()).await;
            }

            if sample.blocked && sample.event_loop_latency_ms > BLOCKED_LATENCY_THRESHOLD_MS {
                self.gated(FAULT_EVENT_LOOP_BLOCKED, || async {
                    warn!(latency_ms = sample.event_loop_latency_ms, "event loop blocked, no automated fix available");
                    "recorded alert; flagged for operator".to_string()
                })
                .await;
            }
        }

        if self.store.probe().await.is_err() {
            self.bus.publish(EventKind::Store, serde_json::json!({ "status": "down" }));
            self.gated(FAULT_STORE_DOWN, || self.recover_store()).await;
        }

        for breaker in self.breakers.stuck_open() {
            let name = breaker.name().to_string();
            self.gated(FAULT_BREAKER_STUCK_OPEN, || async {
                breaker.force_half_open();
                format!("breaker '{name}' forced from open to half-open")
            })
            .await;
        }
    }

    /// Runs `action` only if `fault`'s cooldown has elapsed since its last
    /// run; otherwise just notes the fault recurred without acting.
    async fn gated<F, Fut>(&self, fault: &'static str, action: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = String>,
    {
        let now = Instant::now();
        let on_cooldown = self
            .last_action_at
            .read()
            .get(fault)
            .map(|at| now.duration_since(*at) < self.cooldown)
            .unwrap_or(false);

        if on_cooldown {
            self.publish(fault, "skipped", "on cooldown");
            return;
        }

        let detail = action().await;
        self.last_action_at.write().insert(fault, now);
        self.record(fault, &detail);
    }

    async fn reclaim_memory(&self) -> String {
        let mut sys = System::new_all();
        let pid = sysinfo::get_current_pid().ok();
        let before = Self::rss_of(&mut sys, pid);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = Self::rss_of(&mut sys, pid);
        let freed = before.saturating_sub(after);
        info!(freed_bytes = freed, "requested memory reclaim");
        format!("requested reclaim, freed ~{freed} bytes")
    }

    fn rss_of(sys: &mut System, pid: Option<sysinfo::Pid>) -> u64 {
        if let Some(pid) = pid {
            sys.refresh_process(pid);
            sys.process(pid).map(|p| p.memory()).unwrap_or(0)
        } else {
            0
        }
    }

    async fn recover_store(&self) -> String {
        // sqlx's pool already validates connections before handing them out
        // (test_before_acquire); "disconnect + reconnect" here means giving
        // it a few chances to recycle a bad connection before we give up.
        let policy = chronicle_resilience::RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2.0,
        };
        let result = chronicle_resilience::retry(policy, |_: &()| true, || async { self.store.probe().await.map_err(|_| ()) }).await;
        match result {
            Ok(()) => {
                self.bus.publish(EventKind::Store, serde_json::json!({ "status": "recovered" }));
                "store recovered after re-probe".to_string()
            }
            Err(()) => "store still unreachable after reconnect attempts".to_string(),
        }
    }

    fn record(&self, fault: &str, detail: &str) {
        let action = HealingAction {
            fault: fault.to_string(),
            action: detail.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        };
        self.publish(fault, "ran", detail);

        let mut ring = self.ring.write();
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(action);
    }

    fn publish(&self, fault: &str, status: &str, detail: &str) {
        self.bus.publish(
            EventKind::Healing,
            serde_json::json!({ "fault": fault, "status": status, "detail": detail }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_resilience::BreakerConfig;

    /// A lazy pool never opens a connection until first queried; `probe()`
    /// against it fails immediately, letting us exercise the store-down
    /// branch without a live database.
    fn controller_with_store_down(breakers: Arc<BreakerRegistry>, bus: Arc<EventBus>) -> SelfHealingController {
        let metrics = Arc::new(MetricsSampler::new(bus.clone(), Duration::from_secs(10)));
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/chronicle_test").unwrap();
        let store = Arc::new(StoreAdapter::from_pool(pool));
        SelfHealingController::new(metrics, store, breakers, bus, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn stuck_open_breaker_is_forced_half_open_on_tick() {
        let bus = Arc::new(EventBus::new());
        let breakers = Arc::new(BreakerRegistry::with_hook(
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_millis(1),
            },
            |_| {},
        ));
        let breaker = breakers.get("llm");
        let _ = breaker.execute(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(breaker.state(), chronicle_resilience::BreakerState::Open);

        let controller = controller_with_store_down(breakers, bus);
        controller.tick().await;

        assert_eq!(breaker.state(), chronicle_resilience::BreakerState::HalfOpen);
        assert!(controller.actions().iter().any(|a| a.fault == FAULT_BREAKER_STUCK_OPEN));
    }

    #[tokio::test]
    async fn store_down_publishes_a_store_event() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe(Some(EventKind::Store));
        let breakers = Arc::new(BreakerRegistry::default());
        let controller = controller_with_store_down(breakers, bus);

        controller.tick().await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.payload["status"], "down");
    }

    #[tokio::test]
    async fn store_down_action_is_recorded_and_cooldown_gated() {
        let bus = Arc::new(EventBus::new());
        let breakers = Arc::new(BreakerRegistry::default());
        let controller = controller_with_store_down(breakers, bus);

        controller.tick().await;
        assert_eq!(controller.actions().iter().filter(|a| a.fault == FAULT_STORE_DOWN).count(), 1);

        // Second tick within the cooldown window must not run the action
        // again (spec §4.15: cooldown-gated to prevent oscillation).
        controller.tick().await;
        assert_eq!(controller.actions().iter().filter(|a| a.fault == FAULT_STORE_DOWN).count(), 1);
    }

    #[test]
    fn cooldown_tracking_uses_fault_specific_keys() {
        let mut map: HashMap<&'static str, Instant> = HashMap::new();
        map.insert(FAULT_MEMORY_PRESSURE, Instant::now());
        assert!(map.contains_key(FAULT_MEMORY_PRESSURE));
        assert!(!map.contains_key(FAULT_STORE_DOWN));
    }
}
