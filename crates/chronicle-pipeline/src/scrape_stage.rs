//! Stage: Scrape (C8).

use crate::PipelineError;
use chronicle_common::{AccessMethod, AuditEntry, SessionStatus};
use chronicle_observability::{EventBus, EventKind};
use chronicle_scrape::{BrowserScraper, FastScraper, ScrapeError, ScrapedPost, TargetRouter};
use chronicle_store::StoreAdapter;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ScrapeStage {
    store: Arc<StoreAdapter>,
    router: TargetRouter,
    fast: FastScraper,
    browser: BrowserScraper,
    target_ids: Vec<String>,
    canonical_base_url: String,
    limit: u32,
    bus: Arc<EventBus>,
}

impl ScrapeStage {
    pub fn new(
        store: Arc<StoreAdapter>,
        router: TargetRouter,
        fast: FastScraper,
        browser: BrowserScraper,
        target_ids: Vec<String>,
        canonical_base_url: String,
        limit: u32,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            router,
            fast,
            browser,
            target_ids,
            canonical_base_url,
            limit,
            bus,
        }
    }

    /// Runs one tick: every configured target is scraped at most once,
    /// candidate errors never escape this loop (spec §7).
    pub async fn run(&self) -> Result<(), PipelineError> {
        for target_id in &self.target_ids {
            if let Err(e) = self.run_one(target_id).await {
                warn!(target_id, error = %e, "scrape stage: target failed");
                let message = format!("error: {e}");
                self.audit(target_id, &message).await;
                self.emit_error(target_id, &message);
            }
        }
        Ok(())
    }

    async fn run_one(&self, target_id: &str) -> Result<(), PipelineError> {
        let plan = self.router.plan(target_id).await?;
        if !plan.usable {
            self.audit(target_id, &format!("skipped: {}", plan.reason.as_deref().unwrap_or("unusable"))).await;
            return Ok(());
        }

        let target_url = format!("{}/{}", self.canonical_base_url, target_id);

        let (items, method_used) = match plan.method {
            AccessMethod::Fast => {
                let items = self.fast.scrape(&target_url, self.limit).await;
                match items {
                    Ok(items) if items.is_empty() && self.has_valid_session().await => {
                        info!(target_id, "fast scraper returned 0 items, falling back to browser");
                        (self.browser.scrape(&target_url, self.limit).await, AccessMethod::Browser)
                    }
                    Ok(items) => (Ok(items), AccessMethod::Fast),
                    Err(e) => (Err(e), AccessMethod::Fast),
                }
            }
            AccessMethod::Browser => (self.browser.scrape(&target_url, self.limit).await, AccessMethod::Browser),
            AccessMethod::None => return Ok(()),
        };

        let items = match items {
            Ok(items) => items,
            Err(e) => {
                self.handle_scrape_error(target_id, &e).await?;
                return Err(e.into());
            }
        };

        let total = items.len();
        let mut saved = 0;
        for item in &items {
            self.upsert(target_id, item).await?;
            saved += 1;
        }

        self.router.mark_scraped(target_id, method_used).await?;
        self.audit(target_id, &format!("method={method_used:?} saved={saved}/{total}")).await;
        Ok(())
    }

    async fn upsert(&self, target_id: &str, item: &ScrapedPost) -> Result<(), PipelineError> {
        self.store
            .upsert_raw(
                target_id,
                &item.source_key,
                item.author_name.as_deref(),
                item.author_link.as_deref(),
                item.author_photo.as_deref(),
                &item.text,
            )
            .await?;
        Ok(())
    }

    /// Only browser-side access errors flip `usable=false` (spec §4.8); a
    /// transient failure from either adapter leaves the target alone.
    async fn handle_scrape_error(&self, target_id: &str, error: &ScrapeError) -> Result<(), PipelineError> {
        if let ScrapeError::AccessDenied(msg) = error {
            self.router.mark_error(target_id, msg).await?;
        }
        Ok(())
    }

    async fn has_valid_session(&self) -> bool {
        matches!(
            self.store.get_session_state().await,
            Ok(Some(s)) if s.status == SessionStatus::Valid
        )
    }

    async fn audit(&self, target_id: &str, message: &str) {
        let entry = AuditEntry::new("scrape", format!("target {target_id}: {message}"));
        self.bus.publish(EventKind::Audit, serde_json::json!({ "stage": "scrape", "target_id": target_id, "message": message }));
        if let Err(e) = self.store.record_audit(&entry).await {
            warn!(error = %e, "failed to record scrape audit entry");
        }
    }

    fn emit_error(&self, target_id: &str, message: &str) {
        self.bus.publish(EventKind::Error, serde_json::json!({ "stage": "scrape", "target_id": target_id, "message": message }));
    }
}
