//! Scheduler (C12): a declarative `{stage_name, cadence, handler}` table.
//!
//! Cadence strings are parsed once at startup into `cron::Schedule` values
//! (spec §9: "the scheduler does not interpret strings at tick time"). Each
//! tick calls `lock.with_lock(stage_name, ttl, handler)`; a handler error is
//! captured and reported through the `on_error` hook, never propagated —
//! one failing stage does not kill the scheduler (spec §4.12).

use chronicle_lock::DistributedLock;
use chrono::Utc;
use cron::Schedule;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid cadence '{cadence}': {reason}")]
    InvalidCadence { cadence: String, reason: String },
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type HandlerFn = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct Entry {
    stage_name: String,
    schedule: Schedule,
    handler: HandlerFn,
    lock_ttl: Duration,
}

pub struct Scheduler {
    lock: Arc<DistributedLock>,
    entries: Vec<Entry>,
    on_error: ErrorHook,
}

impl Scheduler {
    pub fn new(lock: Arc<DistributedLock>) -> Self {
        Self::with_hook(lock, |_, _| {})
    }

    /// `on_error(stage_name, message)` is how C13 (the event bus) and the
    /// audit log learn about handler failures without this crate depending
    /// on the observability crate.
    pub fn with_hook(lock: Arc<DistributedLock>, on_error: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        Self {
            lock,
            entries: Vec::new(),
            on_error: Arc::new(on_error),
        }
    }

    /// Registers a stage. `cadence` is a 7-field (sec min hour dom month dow
    /// year) cron expression, parsed once here.
    pub fn register<F, Fut>(&mut self, stage_name: impl Into<String>, cadence: &str, lock_ttl: Duration, handler: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let schedule = Schedule::from_str(cadence).map_err(|e| SchedulerError::InvalidCadence {
            cadence: cadence.to_string(),
            reason: e.to_string(),
        })?;

        self.entries.push(Entry {
            stage_name: stage_name.into(),
            schedule,
            handler: Arc::new(move || Box::pin(handler())),
            lock_ttl,
        });
        Ok(())
    }

    /// Spawns one task per registered stage; every task exits once `shutdown`
    /// is signalled (spec §5: the scheduler stops firing on termination).
    pub fn run(self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        self.entries
            .into_iter()
            .map(|entry| {
                let lock = self.lock.clone();
                let on_error = self.on_error.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let Some(next_fire) = entry.schedule.upcoming(Utc).next() else {
                            warn!(stage = %entry.stage_name, "cadence has no future occurrences, stopping");
                            return;
                        };
                        let wait = (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                fire(&lock, &entry, &on_error).await;
                            }
                            _ = shutdown.changed() => {
                                debug!(stage = %entry.stage_name, "scheduler shutting down");
                                return;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

async fn fire(lock: &DistributedLock, entry: &Entry, on_error: &ErrorHook) {
    let handler = entry.handler.clone();
    let result = lock.with_lock(&entry.stage_name, entry.lock_ttl, || async move { handler().await }).await;

    match result {
        Ok(Some(Ok(()))) => debug!(stage = %entry.stage_name, "handler completed"),
        Ok(Some(Err(message))) => {
            error!(stage = %entry.stage_name, %message, "handler returned an error");
            on_error(&entry.stage_name, &message);
        }
        Ok(None) => debug!(stage = %entry.stage_name, "skipped: overlapping run, lock already held"),
        Err(e) => {
            error!(stage = %entry.stage_name, error = %e, "could not acquire lock");
            on_error(&entry.stage_name, &e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn invalid_cadence_is_rejected_at_register_time() {
        let lock = Arc::new(DistributedLock::new(None).await.unwrap());
        let mut scheduler = Scheduler::new(lock);
        let result = scheduler.register("scrape", "not a cron expression", Duration::from_secs(60), || async { Ok(()) });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fires_handler_every_second_until_shutdown() {
        let lock = Arc::new(DistributedLock::new(None).await.unwrap());
        let mut scheduler = Scheduler::new(lock);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        scheduler
            .register("test_stage", "* * * * * * *", Duration::from_secs(30), move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handles = scheduler.run(rx);
        tokio::time::sleep(Duration::from_millis(2200)).await;
        tx.send(true).unwrap();
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), h).await;
        }

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn handler_error_is_reported_not_propagated() {
        let lock = Arc::new(DistributedLock::new(None).await.unwrap());
        let seen_errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_errors2 = seen_errors.clone();
        let mut scheduler = Scheduler::with_hook(lock, move |stage, msg| {
            seen_errors2.lock().unwrap().push((stage.to_string(), msg.to_string()));
        });

        scheduler
            .register("failing_stage", "* * * * * * *", Duration::from_secs(30), || async { Err("boom".to_string()) })
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handles = scheduler.run(rx);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        tx.send(true).unwrap();
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), h).await;
        }

        assert!(!seen_errors.lock().unwrap().is_empty());
    }
}
