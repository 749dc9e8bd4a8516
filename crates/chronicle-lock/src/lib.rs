//! Named distributed mutex with TTL (C4).
//!
//! `acquire(name, ttl) -> handle | nil`, `release(handle)`, `with_lock(name,
//! ttl, fn)`. A single holder across processes when `LOCK_BACKEND_URL` names
//! a Redis instance (atomic `SET NX EX` plus a Lua check-and-extend /
//! check-and-delete script pair, as the teacher's leader-election module
//! does); otherwise falls back to a process-local mutex table. TTL is a
//! failsafe against crashed holders; stale in-process entries are swept
//! every 5 minutes (spec §4.4).

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// A held lock. Must be passed to [`DistributedLock::release`] to free it;
/// dropping it without releasing just lets the TTL expire it.
#[derive(Debug, Clone)]
pub struct LockHandle {
    name: String,
    token: String,
}

enum Backend {
    Redis(ConnectionManager),
    InProcess(Arc<Mutex<HashMap<String, InProcessEntry>>>),
}

struct InProcessEntry {
    token: String,
    expires_at: Instant,
}

pub struct DistributedLock {
    backend: Backend,
}

impl DistributedLock {
    /// Connects to the shared backend when `backend_url` is `Some`,
    /// otherwise builds the in-process fallback and starts its sweeper.
    pub async fn new(backend_url: Option<&str>) -> Result<Self, LockError> {
        match backend_url {
            Some(url) => {
                let client =
                    redis::Client::open(url).map_err(|e| LockError::Backend(e.to_string()))?;
                let conn = ConnectionManager::new(client)
                    .await
                    .map_err(|e| LockError::Backend(e.to_string()))?;
                info!("distributed lock backed by redis");
                Ok(Self {
                    backend: Backend::Redis(conn),
                })
            }
            None => {
                warn!("no LOCK_BACKEND_URL configured; using in-process lock fallback");
                let table = Arc::new(Mutex::new(HashMap::new()));
                spawn_sweeper(table.clone());
                Ok(Self {
                    backend: Backend::InProcess(table),
                })
            }
        }
    }

    fn key(name: &str) -> String {
        format!("cron:lock:{name}")
    }

    /// Attempts to acquire `name` for `ttl`. Returns `None` if already held.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockHandle>, LockError> {
        let token = Uuid::new_v4().to_string();
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let key = Self::key(name);
                let result: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&token)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend(e.to_string()))?;

                Ok(result.map(|_| LockHandle {
                    name: name.to_string(),
                    token,
                }))
            }
            Backend::InProcess(table) => {
                let mut table = table.lock();
                let now = Instant::now();
                let occupied = table
                    .get(name)
                    .map(|e| e.expires_at > now)
                    .unwrap_or(false);
                if occupied {
                    return Ok(None);
                }
                table.insert(
                    name.to_string(),
                    InProcessEntry {
                        token: token.clone(),
                        expires_at: now + ttl,
                    },
                );
                Ok(Some(LockHandle {
                    name: name.to_string(),
                    token,
                }))
            }
        }
    }

    /// Releases `handle` iff it still holds the lock (check-and-delete); a
    /// no-op if the lock already expired or was taken by someone else.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                const SCRIPT: &str = r#"
                    if redis.call("GET", KEYS[1]) == ARGV[1] then
                        redis.call("DEL", KEYS[1])
                        return 1
                    else
                        return 0
                    end
                "#;
                let _: i32 = redis::Script::new(SCRIPT)
                    .key(Self::key(&handle.name))
                    .arg(&handle.token)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend(e.to_string()))?;
                Ok(())
            }
            Backend::InProcess(table) => {
                let mut table = table.lock();
                if let Some(entry) = table.get(&handle.name) {
                    if entry.token == handle.token {
                        table.remove(&handle.name);
                    }
                }
                Ok(())
            }
        }
    }

    /// Extends a held lock's TTL iff `handle` still holds it
    /// (check-and-extend).
    pub async fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<bool, LockError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                const SCRIPT: &str = r#"
                    if redis.call("GET", KEYS[1]) == ARGV[1] then
                        redis.call("EXPIRE", KEYS[1], ARGV[2])
                        return 1
                    else
                        return 0
                    end
                "#;
                let result: i32 = redis::Script::new(SCRIPT)
                    .key(Self::key(&handle.name))
                    .arg(&handle.token)
                    .arg(ttl.as_secs().max(1))
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| LockError::Backend(e.to_string()))?;
                Ok(result == 1)
            }
            Backend::InProcess(table) => {
                let mut table = table.lock();
                if let Some(entry) = table.get_mut(&handle.name) {
                    if entry.token == handle.token {
                        entry.expires_at = Instant::now() + ttl;
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Runs `f` under `name`'s lock; returns `None` without calling `f` if
    /// the lock is already held elsewhere (spec §4.12: overlapping fires are
    /// dropped, not queued).
    pub async fn with_lock<F, Fut, T>(&self, name: &str, ttl: Duration, f: F) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let handle = match self.acquire(name, ttl).await? {
            Some(h) => h,
            None => {
                debug!(lock = name, "skipped: lock already held");
                return Ok(None);
            }
        };
        let result = f().await;
        self.release(&handle).await?;
        Ok(Some(result))
    }
}

fn spawn_sweeper(table: Arc<Mutex<HashMap<String, InProcessEntry>>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let now = Instant::now();
            let mut table = table.lock();
            let before = table.len();
            table.retain(|_, entry| entry.expires_at > now);
            let evicted = before - table.len();
            if evicted > 0 {
                debug!(evicted, "swept stale in-process locks");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn in_process_lock() -> DistributedLock {
        DistributedLock::new(None).await.unwrap()
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let lock = in_process_lock().await;
        let a = lock.acquire("scrape", Duration::from_secs(30)).await.unwrap();
        assert!(a.is_some());
        let b = lock.acquire("scrape", Duration::from_secs(30)).await.unwrap();
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn release_frees_the_name_for_reacquire() {
        let lock = in_process_lock().await;
        let handle = lock.acquire("classify", Duration::from_secs(30)).await.unwrap().unwrap();
        lock.release(&handle).await.unwrap();
        let again = lock.acquire("classify", Duration::from_secs(30)).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn expired_ttl_allows_reacquire_without_release() {
        let lock = in_process_lock().await;
        let _handle = lock
            .acquire("generate", Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let again = lock.acquire("generate", Duration::from_secs(30)).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn with_lock_skips_when_already_held() {
        let lock = Arc::new(in_process_lock().await);
        let _held = lock.acquire("dispatch", Duration::from_secs(30)).await.unwrap().unwrap();

        let ran = lock
            .with_lock("dispatch", Duration::from_secs(30), || async { true })
            .await
            .unwrap();
        assert!(ran.is_none());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_noop() {
        let lock = in_process_lock().await;
        let handle = lock.acquire("scrape", Duration::from_secs(30)).await.unwrap().unwrap();
        let forged = LockHandle {
            name: handle.name.clone(),
            token: "not-the-real-token".to_string(),
        };
        lock.release(&forged).await.unwrap();
        // Real holder's lock should still be in place.
        let still_held = lock.acquire("scrape", Duration::from_secs(30)).await.unwrap();
        assert!(still_held.is_none());
    }
}
