//! Stage: Classify (C9).

use crate::llm::LlmClient;
use crate::PipelineError;
use chronicle_common::AuditEntry;
use chronicle_observability::{EventBus, EventKind};
use chronicle_store::StoreAdapter;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_BATCH_SIZE: u32 = 20;
const MAX_BATCH_SIZE: u32 = 50;

pub struct ClassifyStage {
    store: Arc<StoreAdapter>,
    llm: LlmClient,
    batch_size: u32,
    bus: Arc<EventBus>,
}

impl ClassifyStage {
    pub fn new(store: Arc<StoreAdapter>, llm: LlmClient, batch_size: u32, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            llm,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            bus,
        }
    }

    pub fn with_default_batch_size(store: Arc<StoreAdapter>, llm: LlmClient, bus: Arc<EventBus>) -> Self {
        Self::new(store, llm, DEFAULT_BATCH_SIZE, bus)
    }

    /// Pulls up to `batch_size` candidates and classifies each in turn. A
    /// circuit-open response short-circuits the batch; remaining candidates
    /// are left for the next tick (spec §4.9, §8 scenario 3).
    pub async fn run(&self) -> Result<(), PipelineError> {
        let candidates = self.store.candidates_for_classify(self.batch_size).await?;
        if candidates.is_empty() {
            return Ok(());
        }

        for raw in candidates {
            match self.llm.classify(&raw.text).await {
                Ok(verdict) => {
                    self.store.insert_classification(&raw.id, verdict.is_relevant, verdict.confidence).await?;
                    debug!(raw_item_id = %raw.id, is_relevant = verdict.is_relevant, "classified");
                }
                Err(PipelineError::CircuitOpen(name)) => {
                    let message = format!("breaker {name} open, stopping batch");
                    self.audit(&message).await;
                    self.emit_error(&message);
                    break;
                }
                Err(PipelineError::Malformed(reason)) => {
                    let message = format!("raw item {}: skipped, malformed classifier response: {reason}", raw.id);
                    self.audit(&message).await;
                    self.emit_error(&message);
                }
                Err(e) => {
                    warn!(raw_item_id = %raw.id, error = %e, "classify stage: candidate failed");
                    let message = format!("raw item {}: error {e}", raw.id);
                    self.audit(&message).await;
                    self.emit_error(&message);
                }
            }
        }
        Ok(())
    }

    async fn audit(&self, message: &str) {
        let entry = AuditEntry::new("classify", message);
        self.bus.publish(EventKind::Audit, serde_json::json!({ "stage": "classify", "message": message }));
        if let Err(e) = self.store.record_audit(&entry).await {
            warn!(error = %e, "failed to record classify audit entry");
        }
    }

    /// Every per-candidate failure is also published as a live `error` event
    /// so the operator dashboard sees it, not just the audit table (spec §7).
    fn emit_error(&self, message: &str) {
        self.bus.publish(EventKind::Error, serde_json::json!({ "stage": "classify", "message": message }));
    }
}
