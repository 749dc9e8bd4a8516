//! Stage handlers: scrape, classify, generate, dispatch (C8-C11).
//!
//! Each stage is one struct taking the collaborators it needs through its
//! constructor — store, breakers, retry policy, pool, router, scrapers, LLM
//! client — no process-globals. A stage handler never lets a per-candidate
//! error escape its loop (spec §7): a bad candidate is logged and skipped,
//! not propagated.

mod classify_stage;
mod dispatch_stage;
mod generate_stage;
mod llm;
mod scrape_stage;

pub use classify_stage::ClassifyStage;
pub use dispatch_stage::{BrowserDispatcher, DispatchSendError, DispatchStage};
pub use generate_stage::GenerateStage;
pub use llm::LlmClient;
pub use scrape_stage::ScrapeStage;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] chronicle_common::StoreError),
    #[error("transient dependency error: {0}")]
    Transient(String),
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<chronicle_pool::PoolError> for PipelineError {
    fn from(e: chronicle_pool::PoolError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

impl From<chronicle_scrape::ScrapeError> for PipelineError {
    fn from(e: chronicle_scrape::ScrapeError) -> Self {
        match e {
            chronicle_scrape::ScrapeError::Transient(m) => PipelineError::Transient(m),
            chronicle_scrape::ScrapeError::CircuitOpen(n) => PipelineError::CircuitOpen(n),
            chronicle_scrape::ScrapeError::AccessDenied(m) => PipelineError::Malformed(m),
            chronicle_scrape::ScrapeError::Malformed(m) => PipelineError::Malformed(m),
        }
    }
}
