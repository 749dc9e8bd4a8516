//! Stage: Generate (C10).

use crate::llm::LlmClient;
use crate::PipelineError;
use chronicle_common::AuditEntry;
use chronicle_observability::{EventBus, EventKind};
use chronicle_store::StoreAdapter;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_BATCH_SIZE: u32 = 20;
const MAX_BATCH_SIZE: u32 = 50;

/// Not an env-recognized knob (spec §6 omits it); the confidence floor below
/// which a relevant classification still doesn't warrant outreach.
const MIN_CONFIDENCE: i16 = 60;

pub struct GenerateStage {
    store: Arc<StoreAdapter>,
    llm: LlmClient,
    canonical_base_url: String,
    landing_base_url: Option<String>,
    batch_size: u32,
    bus: Arc<EventBus>,
}

impl GenerateStage {
    pub fn new(
        store: Arc<StoreAdapter>,
        llm: LlmClient,
        canonical_base_url: String,
        landing_base_url: Option<String>,
        batch_size: u32,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            llm,
            canonical_base_url,
            landing_base_url,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            bus,
        }
    }

    pub fn with_default_batch_size(
        store: Arc<StoreAdapter>,
        llm: LlmClient,
        canonical_base_url: String,
        landing_base_url: Option<String>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self::new(store, llm, canonical_base_url, landing_base_url, DEFAULT_BATCH_SIZE, bus)
    }

    pub async fn run(&self) -> Result<(), PipelineError> {
        let candidates = self.store.candidates_for_generate(self.batch_size, MIN_CONFIDENCE).await?;
        if candidates.is_empty() {
            return Ok(());
        }

        for (raw, _classification) in candidates {
            let link = self.share_link(&raw.id, &raw.text);
            let first_name = first_name(raw.author_name.as_deref());
            let prompt_text = match &first_name {
                Some(name) => format!("Author first name: {name}\n\nPost:\n{}", raw.text),
                None => raw.text.clone(),
            };

            let draft_text = match self.llm.generate(&prompt_text, &link).await {
                Ok(text) => text,
                Err(PipelineError::CircuitOpen(name)) => {
                    let message = format!("breaker {name} open, stopping batch");
                    self.audit(&message).await;
                    self.emit_error(&message);
                    break;
                }
                Err(e) => {
                    warn!(raw_item_id = %raw.id, error = %e, "generate stage: candidate failed");
                    let message = format!("raw item {}: error {e}", raw.id);
                    self.audit(&message).await;
                    self.emit_error(&message);
                    continue;
                }
            };

            if draft_text.trim().is_empty() || !draft_text.contains(&self.canonical_base_url) {
                let message = format!("raw item {}: skipped, invalid message", raw.id);
                self.audit(&message).await;
                self.emit_error(&message);
                continue;
            }

            match self.store.insert_draft(&raw.id, &draft_text, &link).await? {
                Some(_) => debug!(raw_item_id = %raw.id, "draft persisted"),
                None => debug!(raw_item_id = %raw.id, "draft already existed, skipped"),
            }
        }
        Ok(())
    }

    /// `<landing>/submit/<raw_item_id>` when a landing page is configured,
    /// else `<canonical>?ref=<raw_item_id>&text=<urlencoded(text)>` (spec
    /// §4.10).
    fn share_link(&self, raw_item_id: &str, text: &str) -> String {
        build_share_link(&self.canonical_base_url, self.landing_base_url.as_deref(), raw_item_id, text)
    }

    async fn audit(&self, message: &str) {
        let entry = AuditEntry::new("generate", message);
        self.bus.publish(EventKind::Audit, serde_json::json!({ "stage": "generate", "message": message }));
        if let Err(e) = self.store.record_audit(&entry).await {
            warn!(error = %e, "failed to record generate audit entry");
        }
    }

    fn emit_error(&self, message: &str) {
        self.bus.publish(EventKind::Error, serde_json::json!({ "stage": "generate", "message": message }));
    }
}

/// Pure link-shape decision, factored out of [`GenerateStage`] so it is
/// testable without a live store/LLM.
fn build_share_link(canonical_base_url: &str, landing_base_url: Option<&str>, raw_item_id: &str, text: &str) -> String {
    match landing_base_url {
        Some(landing) => format!("{landing}/submit/{raw_item_id}"),
        None => format!("{canonical_base_url}?ref={raw_item_id}&text={}", urlencoding::encode(text)),
    }
}

/// First whitespace-delimited token of a full name, for personalization
/// (spec §4.10).
fn first_name(author_name: Option<&str>) -> Option<String> {
    author_name
        .and_then(|name| name.split_whitespace().next())
        .filter(|n| !n.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landing_link_shape() {
        let link = build_share_link("https://canon.example", Some("https://land.example"), "abc", "ignored");
        assert_eq!(link, "https://land.example/submit/abc");
    }

    #[test]
    fn canonical_link_shape_urlencodes_text() {
        let link = build_share_link("https://canon.example", None, "abc", "hello world");
        assert_eq!(link, "https://canon.example?ref=abc&text=hello%20world");
    }

    #[test]
    fn first_name_takes_leading_token() {
        assert_eq!(first_name(Some("Jane Doe")), Some("Jane".to_string()));
        assert_eq!(first_name(Some("Cher")), Some("Cher".to_string()));
        assert_eq!(first_name(None), None);
        assert_eq!(first_name(Some("   ")), None);
    }
}
