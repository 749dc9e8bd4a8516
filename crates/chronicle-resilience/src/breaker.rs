//! Per-dependency circuit breaker state machine (C2).
//!
//! Closed (forward, count failures in a rolling window) → Open on N
//! consecutive failures (reject immediately) → Half-Open after
//! `reset_timeout` (allow exactly one probe; success → Closed, failure →
//! Open, reset timer). Grounded on the teacher's `EndpointCircuitBreaker`,
//! simplified from a sliding failure-rate buffer to the spec's "N consecutive
//! failures" / "one probe" rule.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error(transparent)]
    Inner(E),
}

/// A state transition the caller may want to publish on the event bus.
#[derive(Debug, Clone)]
pub struct BreakerTransition {
    pub name: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Breaker {
    name: String,
    state: RwLock<BreakerState>,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    config: BreakerConfig,
    on_transition: Box<dyn Fn(BreakerTransition) + Send + Sync>,
}

impl Breaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_hook(name, config, |_| {})
    }

    pub fn with_hook(
        name: impl Into<String>,
        config: BreakerConfig,
        on_transition: impl Fn(BreakerTransition) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            config,
            on_transition: Box::new(on_transition),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        *self.state.read()
    }

    fn transition(&self, to: BreakerState) {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == to {
                return;
            }
            *state = to;
            from
        };
        if to == BreakerState::Open {
            *self.opened_at.write() = Some(Instant::now());
        }
        info!(breaker = %self.name, ?from, ?to, "circuit breaker transition");
        (self.on_transition)(BreakerTransition {
            name: self.name.clone(),
            from,
            to,
        });
    }

    /// Whether the Self/Half-Open gate currently lets a call through. Open →
    /// Half-Open happens lazily here, the first time `reset_timeout` has
    /// elapsed since the trip.
    fn allow(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = *self.opened_at.read();
                match opened_at {
                    Some(at) if at.elapsed() >= self.config.reset_timeout => {
                        self.transition(BreakerState::HalfOpen);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.state() == BreakerState::HalfOpen {
            self.transition(BreakerState::Closed);
        }
    }

    fn record_failure(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.transition(BreakerState::Open);
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition(BreakerState::Open);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Runs `op` iff the breaker is Closed or admitting a Half-Open probe;
    /// otherwise fails fast with [`BreakerError::CircuitOpen`] and never
    /// calls `op`.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(BreakerError::CircuitOpen(self.name.clone()));
        }
        match op().await {
            Ok(val) => {
                self.record_success();
                Ok(val)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Force the breaker back to Half-Open, bypassing `reset_timeout`. Used
    /// by the self-healing controller for "breaker stuck open" remediation
    /// (spec §4.15).
    pub fn force_half_open(&self) {
        if self.state() == BreakerState::Open {
            self.transition(BreakerState::HalfOpen);
        }
    }

    pub fn is_past_reset_timeout(&self) -> bool {
        match *self.opened_at.read() {
            Some(at) => at.elapsed() >= self.config.reset_timeout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn breaker(threshold: u32, reset: Duration) -> Breaker {
        Breaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                reset_timeout: reset,
            },
        )
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(b.state(), BreakerState::Closed);
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_rejects_without_calling_op() {
        let b = breaker(1, Duration::from_secs(60));
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(b.state(), BreakerState::Open);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = b
            .execute(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &str>(()) }
            })
            .await;
        assert!(matches!(result, Err(BreakerError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes() {
        let b = breaker(1, Duration::from_millis(10));
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = b.execute(|| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let b = breaker(1, Duration::from_millis(10));
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = b.execute(|| async { Err::<(), _>("boom again") }).await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn transition_hook_fires() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let b = Breaker::with_hook("hooked", BreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_secs(60) }, move |t| {
            seen2.lock().push((t.from, t.to));
        });
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(seen.lock().as_slice(), &[(BreakerState::Closed, BreakerState::Open)]);
    }
}
