//! Authenticated-browser scraper (C6).
//!
//! Launches a headless Chrome profile, loads the target, scrolls the feed
//! until either a post-count threshold or an iteration cap, then extracts
//! posts. Runs under C5 (the caller wraps `scrape` in a pool slot) with one
//! bounded retry attempt here. Grounded on the spec's own replacement for
//! the source's "persistent cookie file + OS-level lock directory" pattern:
//! the profile directory is an exclusively-owned resource with a stale-lock
//! sweeper that runs before every launch.

use crate::normalize::{canonicalize_author_link, clean_post_text, extract_post_key};
use crate::{ScrapeError, ScrapedPost};
use std::path::PathBuf;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, warn};

const FEED_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SCROLL_PAUSE: Duration = Duration::from_millis(800);
const MAX_SCROLL_ITERATIONS: u32 = 20;
const LAUNCH_ATTEMPTS: u32 = 2;

const ACCESS_DENIED_PHRASES: &[&str] = &["not a member", "private", "join group", "join this group"];

pub struct BrowserScraper {
    profile_dir: PathBuf,
    webdriver_url: String,
}

impl BrowserScraper {
    pub fn new(profile_dir: impl Into<PathBuf>, webdriver_url: impl Into<String>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            webdriver_url: webdriver_url.into(),
        }
    }

    /// One bounded retry: a launch or navigation failure is retried exactly
    /// once after sweeping the profile lock file (spec §4.6).
    pub async fn scrape(&self, target_url: &str, limit: u32) -> Result<Vec<ScrapedPost>, ScrapeError> {
        let mut last_err = None;
        for attempt in 1..=LAUNCH_ATTEMPTS {
            self.sweep_stale_lock().await;
            match self.scrape_once(target_url, limit).await {
                Ok(posts) => return Ok(posts),
                Err(e @ ScrapeError::AccessDenied(_)) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "browser scrape attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ScrapeError::Transient("browser scrape exhausted retries".into())))
    }

    async fn scrape_once(&self, target_url: &str, limit: u32) -> Result<Vec<ScrapedPost>, ScrapeError> {
        let driver = self.launch().await?;
        let result = self.run_session(&driver, target_url, limit).await;
        if let Err(e) = driver.quit().await {
            debug!(error = %e, "webdriver session quit failed, ignoring");
        }
        result
    }

    async fn launch(&self) -> Result<WebDriver, ScrapeError> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_arg(&format!("--user-data-dir={}", self.profile_dir.display()))
            .map_err(|e| ScrapeError::Transient(e.to_string()))?;
        caps.set_headless().map_err(|e| ScrapeError::Transient(e.to_string()))?;
        caps.add_arg("--no-sandbox").map_err(|e| ScrapeError::Transient(e.to_string()))?;

        WebDriver::new(&self.webdriver_url, caps)
            .await
            .map_err(|e| ScrapeError::Transient(format!("webdriver launch failed: {e}")))
    }

    async fn run_session(
        &self,
        driver: &WebDriver,
        target_url: &str,
        limit: u32,
    ) -> Result<Vec<ScrapedPost>, ScrapeError> {
        driver
            .goto(target_url)
            .await
            .map_err(|e| ScrapeError::Transient(format!("navigation failed: {e}")))?;

        let feed = match driver
            .query(By::Css("[role='feed'], [data-feed-container]"))
            .wait(FEED_WAIT_TIMEOUT, FEED_POLL_INTERVAL)
            .first()
            .await
        {
            Ok(feed) => feed,
            Err(_) => return Err(self.classify_missing_feed(driver).await),
        };

        self.dismiss_overlay(driver).await;

        let mut iterations = 0;
        loop {
            let count = feed
                .find_all(By::Css("[data-post-id], article"))
                .await
                .map_err(|e| ScrapeError::Transient(e.to_string()))?
                .len();
            if count as u32 >= limit || iterations >= MAX_SCROLL_ITERATIONS {
                break;
            }
            driver
                .execute("window.scrollBy(0, document.body.scrollHeight);", vec![])
                .await
                .map_err(|e| ScrapeError::Transient(e.to_string()))?;
            tokio::time::sleep(SCROLL_PAUSE).await;
            iterations += 1;
        }

        let elements = feed
            .find_all(By::Css("[data-post-id], article"))
            .await
            .map_err(|e| ScrapeError::Transient(e.to_string()))?;

        let mut posts = Vec::new();
        for element in elements.into_iter().take(limit as usize) {
            if let Some(post) = self.extract_post(&element).await {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    async fn extract_post(&self, element: &WebElement) -> Option<ScrapedPost> {
        let text = element.text().await.ok()?;
        if text.trim().is_empty() {
            return None;
        }

        let permalink = element
            .find(By::Css("a[href*='/posts/'], a[href*='/permalink/'], a[href*='story_fbid=']"))
            .await
            .ok()?
            .attr("href")
            .await
            .ok()
            .flatten()?;
        let source_key = extract_post_key(&permalink)?;

        let (author_name, author_link) = match element.find(By::Css("a[href*='/profile.php'], a[role='link']")).await {
            Ok(author_el) => {
                let name = author_el.text().await.ok().filter(|s| !s.is_empty());
                let link = author_el.attr("href").await.ok().flatten().map(|h| canonicalize_author_link(&h));
                (name, link)
            }
            Err(_) => (None, None),
        };
        let author_photo = match element.find(By::Css("img")).await {
            Ok(img_el) => img_el.attr("src").await.ok().flatten(),
            Err(_) => None,
        };

        Some(ScrapedPost {
            source_key,
            author_name,
            author_link,
            author_photo,
            text: clean_post_text(&text),
        })
    }

    async fn dismiss_overlay(&self, driver: &WebDriver) {
        if let Ok(close_button) = driver.query(By::Css("[aria-label='Close']")).first().await {
            let _ = close_button.click().await;
        }
    }

    /// The feed container never appeared: read the page body and classify it
    /// against the recognized access-denied phrases rather than assuming
    /// transient (spec §4.6).
    async fn classify_missing_feed(&self, driver: &WebDriver) -> ScrapeError {
        match driver.find(By::Tag("body")).await {
            Ok(body) => match body.text().await {
                Ok(text) if !text.trim().is_empty() => classify_page_error(&text),
                _ => ScrapeError::Transient("feed container did not appear".into()),
            },
            Err(_) => ScrapeError::Transient("feed container did not appear".into()),
        }
    }

    async fn sweep_stale_lock(&self) {
        let lock_path = self.profile_dir.join("SingletonLock");
        if tokio::fs::metadata(&lock_path).await.is_ok() {
            if let Err(e) = tokio::fs::remove_file(&lock_path).await {
                debug!(error = %e, "failed to remove stale profile lock file");
            }
        }
    }
}

/// Classifies page-body text against the closed set of recognized
/// access-denied phrases (spec §4.6, §4.8): only these flip a target's
/// `usable` flag, everything else stays transient.
pub fn classify_page_error(body_text: &str) -> ScrapeError {
    let lower = body_text.to_ascii_lowercase();
    if ACCESS_DENIED_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        ScrapeError::AccessDenied(body_text.to_string())
    } else {
        ScrapeError::Transient(body_text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_access_denied_phrases() {
        assert!(matches!(classify_page_error("You are not a member of this group"), ScrapeError::AccessDenied(_)));
        assert!(matches!(classify_page_error("This group is private"), ScrapeError::AccessDenied(_)));
        assert!(matches!(classify_page_error("Ask to join group to see posts"), ScrapeError::AccessDenied(_)));
    }

    #[test]
    fn unrecognized_page_text_is_transient() {
        assert!(matches!(classify_page_error("Service temporarily unavailable"), ScrapeError::Transient(_)));
    }
}
