//! Metrics sampler (C14, metrics half).
//!
//! Samples process metrics every `sample_interval` (default 10s) with
//! `sysinfo`, keeping an hour's worth (360 samples) in a bounded ring.
//! Rust has no VM-managed heap the way the original target runtime does;
//! `heap_used`/`heap_total` are reported as process RSS / system total
//! memory, the closest equivalent this process can observe about itself
//! (see DESIGN.md).

use crate::event_bus::{EventBus, EventKind};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::debug;

const RING_CAPACITY: usize = 360;
/// Past this latency between a tick's scheduled and observed time, the
/// sampler considers the async runtime blocked (spec §4.14).
const BLOCKED_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSample {
    pub at: DateTime<Utc>,
    pub cpu_percent: f32,
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
    pub rss_bytes: u64,
    pub uptime_secs: u64,
    pub event_loop_latency_ms: f64,
    pub blocked: bool,
}

pub struct MetricsSampler {
    ring: Arc<RwLock<VecDeque<MetricSample>>>,
    sample_interval: Duration,
    started_at: Instant,
    bus: Arc<EventBus>,
}

impl MetricsSampler {
    pub fn new(bus: Arc<EventBus>, sample_interval: Duration) -> Self {
        Self {
            ring: Arc::new(RwLock::new(VecDeque::with_capacity(RING_CAPACITY))),
            sample_interval,
            started_at: Instant::now(),
            bus,
        }
    }

    pub fn latest(&self) -> Option<MetricSample> {
        self.ring.read().back().copied()
    }

    pub fn history(&self) -> Vec<MetricSample> {
        self.ring.read().iter().copied().collect()
    }

    /// Moving average of `field` over the last `window` samples (newest-
    /// weighted window, not wall-clock time).
    pub fn moving_average(&self, window: usize, field: impl Fn(&MetricSample) -> f64) -> Option<f64> {
        let ring = self.ring.read();
        if ring.is_empty() {
            return None;
        }
        let take = window.min(ring.len());
        let sum: f64 = ring.iter().rev().take(take).map(field).sum();
        Some(sum / take as f64)
    }

    pub fn peak(&self, window: usize, field: impl Fn(&MetricSample) -> f64) -> Option<f64> {
        let ring = self.ring.read();
        if ring.is_empty() {
            return None;
        }
        let take = window.min(ring.len());
        ring.iter().rev().take(take).map(field).fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Runs forever, sampling on the configured interval, until `shutdown`
    /// fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut sys = System::new_all();
        let pid = sysinfo::get_current_pid().ok();
        let mut last_tick = Instant::now();
        let mut interval = tokio::time::interval(self.sample_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Instant::now();
                    let observed_delta = now.duration_since(last_tick);
                    last_tick = now;
                    let latency = observed_delta.saturating_sub(self.sample_interval);

                    sys.refresh_cpu();
                    sys.refresh_memory();
                    if let Some(pid) = pid {
                        sys.refresh_process(pid);
                    }

                    let sample = self.take_sample(&sys, pid, latency);
                    self.bus.publish(EventKind::Metrics, serde_json::to_value(&sample).unwrap_or_default());

                    let mut ring = self.ring.write();
                    if ring.len() == RING_CAPACITY {
                        ring.pop_front();
                    }
                    ring.push_back(sample);
                }
                _ = shutdown.changed() => {
                    debug!("metrics sampler shutting down");
                    return;
                }
            }
        }
    }

    fn take_sample(&self, sys: &System, pid: Option<Pid>, latency: Duration) -> MetricSample {
        let rss = pid.and_then(|p| sys.process(p)).map(|p| p.memory()).unwrap_or(0);
        MetricSample {
            at: Utc::now(),
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            heap_used_bytes: rss,
            heap_total_bytes: sys.total_memory(),
            rss_bytes: rss,
            uptime_secs: self.started_at.elapsed().as_secs(),
            event_loop_latency_ms: latency.as_secs_f64() * 1000.0,
            blocked: latency > BLOCKED_THRESHOLD,
        }
    }
}
