//! Stage: Dispatch (C11).

use crate::PipelineError;
use chronicle_common::{AuditEntry, DispatchStatus, SessionState, SessionStatus};
use chronicle_observability::{EventBus, EventKind};
use chronicle_pool::BoundedPool;
use chrono::{Duration as ChronoDuration, Utc};
use chronicle_store::StoreAdapter;
use std::path::PathBuf;
use std::sync::Arc;
use thirtyfour::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

/// The closed set of phrases that mean "this account can never message this
/// person again", vs. everything else (transient, retried next tick) — spec
/// Open Question #2, resolved in SPEC_FULL.md §9.
const FATAL_SEND_PHRASES: &[&str] = &[
    "not a member",
    "this content isn't available",
    "you can't message this person",
    "account restricted",
];

#[derive(Error, Debug)]
pub enum DispatchSendError {
    #[error("transient send error: {0}")]
    Transient(String),
    #[error("fatal send error: {0}")]
    Fatal(String),
}

fn classify_send_error(message: &str) -> DispatchSendError {
    let lower = message.to_ascii_lowercase();
    if FATAL_SEND_PHRASES.iter().any(|p| lower.contains(p)) {
        DispatchSendError::Fatal(message.to_string())
    } else {
        DispatchSendError::Transient(message.to_string())
    }
}

/// Drives the authenticated browser to open a profile and submit a
/// message. Grounded on `chronicle_scrape::BrowserScraper`'s launch/profile-
/// lock idiom, specialized for the send rather than the read path.
pub struct BrowserDispatcher {
    profile_dir: PathBuf,
    webdriver_url: String,
}

impl BrowserDispatcher {
    pub fn new(profile_dir: impl Into<PathBuf>, webdriver_url: impl Into<String>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            webdriver_url: webdriver_url.into(),
        }
    }

    pub async fn send_message(&self, profile_url: &str, text: &str) -> Result<(), DispatchSendError> {
        self.sweep_stale_lock().await;
        let driver = self.launch().await.map_err(DispatchSendError::Transient)?;
        let result = self.send_once(&driver, profile_url, text).await;
        let _ = driver.quit().await;
        result
    }

    async fn launch(&self) -> Result<WebDriver, String> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_arg(&format!("--user-data-dir={}", self.profile_dir.display())).map_err(|e| e.to_string())?;
        caps.set_headless().map_err(|e| e.to_string())?;
        caps.add_arg("--no-sandbox").map_err(|e| e.to_string())?;
        WebDriver::new(&self.webdriver_url, caps).await.map_err(|e| e.to_string())
    }

    async fn send_once(&self, driver: &WebDriver, profile_url: &str, text: &str) -> Result<(), DispatchSendError> {
        driver
            .goto(profile_url)
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;

        let message_entry = driver
            .query(By::Css("[aria-label='Message'], [data-testid='message-button']"))
            .wait(std::time::Duration::from_secs(10), std::time::Duration::from_millis(250))
            .first()
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;
        message_entry.click().await.map_err(|e| classify_send_error(&e.to_string()))?;

        let input = driver
            .query(By::Css("[role='textbox'], textarea"))
            .wait(std::time::Duration::from_secs(10), std::time::Duration::from_millis(250))
            .first()
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;
        input.send_keys(text).await.map_err(|e| classify_send_error(&e.to_string()))?;
        input
            .send_keys(Key::Enter)
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;
        Ok(())
    }

    async fn sweep_stale_lock(&self) {
        let lock_path = self.profile_dir.join("SingletonLock");
        if tokio::fs::metadata(&lock_path).await.is_ok() {
            let _ = tokio::fs::remove_file(&lock_path).await;
        }
    }
}

pub struct DispatchStage {
    store: Arc<StoreAdapter>,
    pool: Arc<BoundedPool>,
    sender: BrowserDispatcher,
    daily_limit: i64,
    bus: Arc<EventBus>,
}

impl DispatchStage {
    pub fn new(store: Arc<StoreAdapter>, pool: Arc<BoundedPool>, sender: BrowserDispatcher, daily_limit: i64, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            pool,
            sender,
            daily_limit,
            bus,
        }
    }

    pub async fn run(&self) -> Result<(), PipelineError> {
        let sent_in_window = self.store.count_sent_in_window(ChronoDuration::hours(24)).await?;
        if sent_in_window >= self.daily_limit {
            info!(sent_in_window, daily_limit = self.daily_limit, "dispatch quota reached");
            self.audit("quota reached").await;
            return Ok(());
        }

        let remaining = (self.daily_limit - sent_in_window).max(0) as u32;
        let candidates = self.store.candidates_for_dispatch(remaining).await?;

        for (raw, draft) in candidates {
            let Some(author_link) = raw.author_link.clone() else {
                continue;
            };

            let op_id = format!("dispatch:{}", raw.id);
            let outcome = self
                .pool
                .execute(op_id, || self.sender.send_message(&author_link, &draft.text))
                .await;

            match outcome {
                Ok(Ok(())) => {
                    self.store.insert_dispatch_attempt(&raw.id, &draft.id, DispatchStatus::Sent, None).await?;
                }
                Ok(Err(DispatchSendError::Fatal(reason))) => {
                    self.store.insert_dispatch_attempt(&raw.id, &draft.id, DispatchStatus::Failed, Some(&reason)).await?;
                    let message = format!("raw item {}: fatal send error {reason}", raw.id);
                    self.audit(&message).await;
                    self.emit_error(&message);
                    self.invalidate_session(&reason).await?;
                }
                Ok(Err(DispatchSendError::Transient(reason))) => {
                    self.store.insert_dispatch_attempt(&raw.id, &draft.id, DispatchStatus::Failed, Some(&reason)).await?;
                    let message = format!("raw item {}: transient send error {reason}", raw.id);
                    self.audit(&message).await;
                    self.emit_error(&message);
                }
                Err(pool_err) => {
                    warn!(raw_item_id = %raw.id, error = %pool_err, "dispatch stage: pool error");
                    let message = format!("raw item {}: pool error {pool_err}", raw.id);
                    self.audit(&message).await;
                    self.emit_error(&message);
                }
            }
        }
        Ok(())
    }

    async fn invalidate_session(&self, reason: &str) -> Result<(), PipelineError> {
        let previous = self.store.get_session_state().await?;
        let state = SessionState {
            status: SessionStatus::Invalid,
            last_checked_at: Utc::now(),
            last_valid_at: previous.as_ref().and_then(|s| s.last_valid_at),
            principal_id: previous.as_ref().and_then(|s| s.principal_id.clone()),
            principal_name: previous.as_ref().and_then(|s| s.principal_name.clone()),
            error: Some(reason.to_string()),
        };
        self.store.set_session_state(&state).await?;
        self.bus.publish(EventKind::Session, serde_json::json!({ "status": "invalid", "reason": reason }));
        warn!(reason, "dispatch: fatal send error, session invalidated");
        Ok(())
    }

    async fn audit(&self, message: &str) {
        let entry = AuditEntry::new("dispatch", message);
        self.bus.publish(EventKind::Audit, serde_json::json!({ "stage": "dispatch", "message": message }));
        if let Err(e) = self.store.record_audit(&entry).await {
            warn!(error = %e, "failed to record dispatch audit entry");
        }
    }

    fn emit_error(&self, message: &str) {
        self.bus.publish(EventKind::Error, serde_json::json!({ "stage": "dispatch", "message": message }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_closed_set_of_fatal_phrases() {
        assert!(matches!(classify_send_error("You can't message this person"), DispatchSendError::Fatal(_)));
        assert!(matches!(classify_send_error("This account is restricted"), DispatchSendError::Transient(_)));
        assert!(matches!(classify_send_error("Account restricted due to violations"), DispatchSendError::Fatal(_)));
    }

    #[test]
    fn unrecognized_error_is_transient() {
        assert!(matches!(classify_send_error("Network error, try again"), DispatchSendError::Transient(_)));
    }
}
