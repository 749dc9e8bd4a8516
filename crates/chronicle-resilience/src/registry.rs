//! Registry of named breakers, one per recognized external dependency
//! (spec §4.2: `fast_scraper`, `llm`, `store`). Grounded on the teacher's
//! `CircuitBreakerRegistry`, trimmed to the spec's fixed dependency set and
//! consecutive-failure semantics.

use crate::breaker::{Breaker, BreakerConfig, BreakerState, BreakerTransition};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
    config: BreakerConfig,
    on_transition: Arc<dyn Fn(BreakerTransition) + Send + Sync>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_hook(config, |_| {})
    }

    /// `on_transition` is how C13 (the event bus) learns about breaker state
    /// changes without this crate depending on the observability crate.
    pub fn with_hook(
        config: BreakerConfig,
        on_transition: impl Fn(BreakerTransition) + Send + Sync + 'static,
    ) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            on_transition: Arc::new(on_transition),
        }
    }

    pub fn get(&self, name: &str) -> Arc<Breaker> {
        if let Some(b) = self.breakers.read().get(name) {
            return b.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let hook = self.on_transition.clone();
                Arc::new(Breaker::with_hook(name, self.config, move |t| hook(t)))
            })
            .clone()
    }

    pub fn all_states(&self) -> HashMap<String, BreakerState> {
        self.breakers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.state()))
            .collect()
    }

    /// Every breaker currently Open past its reset timeout — the "stuck
    /// open" fault the self-healing controller looks for (spec §4.15).
    pub fn stuck_open(&self) -> Vec<Arc<Breaker>> {
        self.breakers
            .read()
            .values()
            .filter(|b| b.state() == BreakerState::Open && b.is_past_reset_timeout())
            .cloned()
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_idempotent_per_name() {
        let reg = BreakerRegistry::default();
        let a = reg.get("llm");
        let b = reg.get("llm");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn hook_fires_through_registry() {
        let seen = Arc::new(parking_lot::Mutex::new(0));
        let seen2 = seen.clone();
        let reg = BreakerRegistry::with_hook(
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            move |_| *seen2.lock() += 1,
        );
        let breaker = reg.get("store");
        let _ = breaker.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(*seen.lock(), 1);
    }
}
