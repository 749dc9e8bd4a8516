//! Bounded worker pool (C5).
//!
//! Caps concurrent heavyweight browser operations at a fixed capacity with
//! fair FIFO service order. Grounded on the teacher's `ProcessPool`
//! (`fc-router/src/pool.rs`), stripped of its per-message-group queueing and
//! rate limiting — this pipeline just needs one global semaphore-backed cap
//! plus the introspection the spec calls for.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("timed out waiting {0:?} for a pool slot")]
    AcquireTimeout(Duration),
    #[error("operation {0} exceeded its deadline and was force-released")]
    OperationTimeout(String),
}

#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub op_id: String,
    pub started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub active: u32,
    pub waiting: u32,
    pub max: u32,
    pub active_operations: Vec<ActiveOperation>,
}

/// An acquired slot. Releases on drop; [`BoundedPool::release`] is also
/// available for explicit (idempotent) early release.
pub struct PoolToken {
    op_id: String,
    permit: Option<OwnedSemaphorePermit>,
    active_operations: Arc<DashMap<String, Instant>>,
    active: Arc<AtomicU32>,
}

impl PoolToken {
    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    fn release(&mut self) {
        if self.permit.take().is_some() {
            self.active_operations.remove(&self.op_id);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for PoolToken {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct BoundedPool {
    semaphore: Arc<Semaphore>,
    max: u32,
    waiting: Arc<AtomicU32>,
    active: Arc<AtomicU32>,
    active_operations: Arc<DashMap<String, Instant>>,
    default_acquire_timeout: Duration,
    default_op_timeout: Duration,
}

impl BoundedPool {
    pub fn new(capacity: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            max: capacity,
            waiting: Arc::new(AtomicU32::new(0)),
            active: Arc::new(AtomicU32::new(0)),
            active_operations: Arc::new(DashMap::new()),
            default_acquire_timeout: Duration::from_secs(60),
            default_op_timeout: Duration::from_secs(60),
        }
    }

    /// Blocks until a slot is free or `timeout` elapses (default 60s, spec
    /// §4.5). The semaphore gives FIFO wake order for free.
    pub async fn acquire(&self, op_id: impl Into<String>) -> Result<PoolToken, PoolError> {
        self.acquire_timeout(op_id, self.default_acquire_timeout).await
    }

    pub async fn acquire_timeout(
        &self,
        op_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<PoolToken, PoolError> {
        let op_id = op_id.into();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = match permit {
            Ok(Ok(p)) => p,
            // The semaphore is never closed in this pipeline's lifetime.
            Ok(Err(_)) => unreachable!("pool semaphore closed"),
            Err(_) => return Err(PoolError::AcquireTimeout(timeout)),
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        self.active_operations.insert(op_id.clone(), Instant::now());

        Ok(PoolToken {
            op_id,
            permit: Some(permit),
            active_operations: self.active_operations.clone(),
            active: self.active.clone(),
        })
    }

    /// Explicit (idempotent) release, same as dropping the token.
    pub fn release(&self, mut token: PoolToken) {
        token.release();
    }

    /// Runs `op` under a slot, imposing an additional per-operation deadline
    /// (default 60s). On timeout the slot is force-released (token dropped)
    /// and the operation is reported stuck.
    pub async fn execute<F, Fut, T>(&self, op_id: impl Into<String>, op: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.execute_timeout(op_id, self.default_op_timeout, op).await
    }

    pub async fn execute_timeout<F, Fut, T>(
        &self,
        op_id: impl Into<String>,
        op_timeout: Duration,
        op: F,
    ) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let op_id = op_id.into();
        let token = self.acquire(op_id.clone()).await?;

        match tokio::time::timeout(op_timeout, op()).await {
            Ok(result) => {
                self.release(token);
                Ok(result)
            }
            Err(_) => {
                warn!(op_id, timeout = ?op_timeout, "pool operation exceeded its deadline, force-releasing slot");
                self.release(token);
                Err(PoolError::OperationTimeout(op_id))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
            max: self.max,
            active_operations: self
                .active_operations
                .iter()
                .map(|entry| ActiveOperation {
                    op_id: entry.key().clone(),
                    started_at: *entry.value(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_concurrent_slots_at_capacity() {
        let pool = BoundedPool::new(2);
        let a = pool.acquire("a").await.unwrap();
        let b = pool.acquire("b").await.unwrap();
        assert_eq!(pool.stats().active, 2);

        let result = pool.acquire_timeout("c", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));

        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn release_frees_a_slot_for_the_next_waiter() {
        let pool = BoundedPool::new(1);
        let a = pool.acquire("a").await.unwrap();
        pool.release(a);
        let b = pool.acquire_timeout("b", Duration::from_millis(50)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn execute_force_releases_on_operation_timeout() {
        let pool = BoundedPool::new(1);
        let result = pool
            .execute_timeout("slow", Duration::from_millis(10), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;
        assert!(matches!(result, Err(PoolError::OperationTimeout(_))));
        assert_eq!(pool.stats().active, 0);

        // The slot must actually be free afterwards.
        let next = pool.acquire_timeout("next", Duration::from_millis(50)).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn double_release_is_a_noop() {
        let pool = BoundedPool::new(1);
        let mut token = pool.acquire("a").await.unwrap();
        token.release();
        token.release();
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn stats_report_active_operation_ids() {
        let pool = BoundedPool::new(2);
        let _a = pool.acquire("scrape:target-1").await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.max, 2);
        assert_eq!(stats.active_operations.len(), 1);
        assert_eq!(stats.active_operations[0].op_id, "scrape:target-1");
    }
}
