//! External scraper contract and target router (C6, C7).
//!
//! Two implementations of `scrape(target_id, limit) -> []RawItem` behind one
//! shape: a fast structured third-party API and an authenticated headless
//! browser. The router picks which one to use per target and caches the
//! decision for 24 hours.

mod browser;
mod fast;
mod normalize;
mod router;

pub use browser::BrowserScraper;
pub use fast::FastScraper;
pub use normalize::{canonicalize_author_link, clean_post_text, extract_post_key};
pub use router::{AccessPlan, TargetRouter};

use thiserror::Error;

/// A post as lifted off a forum page, before it has a store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPost {
    pub source_key: String,
    pub author_name: Option<String>,
    pub author_link: Option<String>,
    pub author_photo: Option<String>,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Worth retrying: network blip, timeout, upstream 5xx.
    #[error("transient scrape error: {0}")]
    Transient(String),
    /// A browser-side signal that the account genuinely cannot see this
    /// target ("not a member", "private", "join group") — this is the only
    /// failure class allowed to flip a target's `usable` flag (spec §4.8).
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The fast_scraper breaker is open; no call was attempted.
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    /// Response shape didn't match what either adapter expects.
    #[error("malformed scrape response: {0}")]
    Malformed(String),
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Transient(_))
    }
}
