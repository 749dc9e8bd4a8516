//! Fast structured scraper (C6): one request to a third-party job-queue API.
//!
//! Grounded on the teacher's `fc-outbox/http_dispatcher.rs` request/response
//! idiom (serde structs over `reqwest`, typed status mapping) and on
//! `chronicle-resilience`'s breaker+retry composition rule — a retry
//! sequence runs *inside* one `breaker.execute` call, never as independent
//! retried calls (spec §4.3).

use crate::normalize::{canonicalize_author_link, clean_post_text, extract_post_key};
use crate::{ScrapeError, ScrapedPost};
use chronicle_resilience::{retry, Breaker, BreakerError, RetryPolicy};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct StartRunResponse {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct DatasetResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    /// The third-party API embeds failures as `{"error": "..."}` in an
    /// otherwise 200 response rather than a non-2xx status.
    #[serde(default)]
    error: Option<String>,
}

pub struct FastScraper {
    client: reqwest::Client,
    token: String,
    api_base_url: String,
    breaker: Arc<Breaker>,
    retry_policy: RetryPolicy,
}

impl FastScraper {
    pub fn new(token: impl Into<String>, api_base_url: impl Into<String>, breaker: Arc<Breaker>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds"),
            token: token.into(),
            api_base_url: api_base_url.into(),
            breaker,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Runs a scrape of `target_url`, capped at `limit` items, through the
    /// `fast_scraper` breaker with retry composed inside the single
    /// `execute` call.
    pub async fn scrape(&self, target_url: &str, limit: u32) -> Result<Vec<ScrapedPost>, ScrapeError> {
        let policy = self.retry_policy;
        let outcome = self
            .breaker
            .execute(|| retry(policy, ScrapeError::is_retryable, || self.run_once(target_url, limit)))
            .await;

        match outcome {
            Ok(posts) => Ok(posts),
            Err(BreakerError::CircuitOpen(name)) => Err(ScrapeError::CircuitOpen(name)),
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    async fn run_once(&self, target_url: &str, limit: u32) -> Result<Vec<ScrapedPost>, ScrapeError> {
        let run_id = self.start_run(target_url, limit).await?;
        let items = self.fetch_dataset(&run_id).await?;
        items.iter().map(normalize_item).collect()
    }

    async fn start_run(&self, target_url: &str, limit: u32) -> Result<String, ScrapeError> {
        let response = self
            .client
            .post(format!("{}/runs", self.api_base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "target_url": target_url, "limit": limit }))
            .send()
            .await
            .map_err(|e| ScrapeError::Transient(e.to_string()))?;

        classify_status(response.status())?;

        let parsed: StartRunResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::Malformed(e.to_string()))?;
        Ok(parsed.run_id)
    }

    async fn fetch_dataset(&self, run_id: &str) -> Result<Vec<serde_json::Value>, ScrapeError> {
        let response = self
            .client
            .get(format!("{}/runs/{}/dataset", self.api_base_url, run_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ScrapeError::Transient(e.to_string()))?;

        classify_status(response.status())?;

        let parsed: DatasetResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::Malformed(e.to_string()))?;

        if let Some(message) = parsed.error {
            // An embedded error is a call failure, not empty data (spec §4.6).
            return Err(ScrapeError::Transient(message));
        }
        Ok(parsed.items)
    }
}

fn classify_status(status: reqwest::StatusCode) -> Result<(), ScrapeError> {
    if status.is_success() {
        return Ok(());
    }
    if matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504) {
        return Err(ScrapeError::Transient(format!("upstream returned {status}")));
    }
    Err(ScrapeError::Malformed(format!("upstream returned {status}")))
}

/// The third-party API's item shape varies: author data may be nested under
/// `author` or spread flat as `author_name`/`author_link`/`author_photo`
/// (or their camelCase spellings); the post identifier may live in a `url`
/// field or a bare `id` field. Every alias is tried in a fixed order.
fn normalize_item(item: &serde_json::Value) -> Result<ScrapedPost, ScrapeError> {
    let url = item.get("url").and_then(|v| v.as_str());
    let source_key = url
        .and_then(extract_post_key)
        .or_else(|| item.get("id").and_then(|v| v.as_str()).map(String::from))
        .ok_or_else(|| ScrapeError::Malformed("item has no recognizable identifier".into()))?;

    let raw_text = item
        .get("text")
        .or_else(|| item.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ScrapeError::Malformed("item has no text field".into()))?;

    let (author_name, author_link, author_photo) = extract_author(item);

    Ok(ScrapedPost {
        source_key,
        author_name,
        author_link,
        author_photo,
        text: clean_post_text(raw_text),
    })
}

fn extract_author(item: &serde_json::Value) -> (Option<String>, Option<String>, Option<String>) {
    if let Some(author) = item.get("author") {
        let name = str_field(author, &["name", "full_name", "fullName"]);
        let link = str_field(author, &["link", "url", "profile_url", "profileUrl"]).map(|l| canonicalize_author_link(&l));
        let photo = str_field(author, &["photo", "avatar", "photo_url", "photoUrl"]);
        if name.is_some() || link.is_some() {
            return (name, link, photo);
        }
    }

    let name = str_field(item, &["author_name", "authorName"]);
    let link = str_field(item, &["author_link", "authorUrl", "author_url"]).map(|l| canonicalize_author_link(&l));
    let photo = str_field(item, &["author_photo", "authorPhoto"]);
    (name, link, photo)
}

fn str_field(value: &serde_json::Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_resilience::BreakerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scraper(api_base_url: String) -> FastScraper {
        FastScraper::new("test-token", api_base_url, Arc::new(Breaker::new("fast_scraper", BreakerConfig::default())))
    }

    #[test]
    fn normalizes_nested_author_shape() {
        let item = serde_json::json!({
            "url": "https://site.example/group/1/posts/777",
            "text": "hello world See more",
            "author": {"name": "Jane Doe", "link": "http://m.site.example/jane", "photo": "https://img.example/jane.jpg"}
        });
        let post = normalize_item(&item).unwrap();
        assert_eq!(post.source_key, "777");
        assert_eq!(post.author_name.as_deref(), Some("Jane Doe"));
        assert_eq!(post.author_link.as_deref(), Some("https://www.site.example/jane"));
        assert_eq!(post.text, "hello world");
    }

    #[test]
    fn normalizes_flat_camelcase_author_shape() {
        let item = serde_json::json!({
            "id": "pfbidAbC999",
            "content": "another post",
            "authorName": "John Roe",
            "authorUrl": "https://site.example/john.roe?ref=1"
        });
        let post = normalize_item(&item).unwrap();
        assert_eq!(post.source_key, "pfbidAbC999");
        assert_eq!(post.author_name.as_deref(), Some("John Roe"));
        assert_eq!(post.author_link.as_deref(), Some("https://site.example/john.roe"));
    }

    #[test]
    fn missing_identifier_is_malformed() {
        let item = serde_json::json!({"text": "no id here"});
        assert!(matches!(normalize_item(&item), Err(ScrapeError::Malformed(_))));
    }

    #[tokio::test]
    async fn embedded_error_body_is_treated_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"run_id": "r1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/runs/r1/dataset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"error": "rate limited upstream"})))
            .mount(&server)
            .await;

        let scraper = scraper(server.uri());
        let result = scraper.scrape("https://site.example/group/1", 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn successful_run_normalizes_every_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"run_id": "r2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/runs/r2/dataset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"url": "https://site.example/posts/1", "text": "a", "author_name": "A"},
                    {"url": "https://site.example/posts/2", "text": "b", "author_name": "B"},
                ]
            })))
            .mount(&server)
            .await;

        let scraper = scraper(server.uri());
        let posts = scraper.scrape("https://site.example/group/1", 10).await.unwrap();
        assert_eq!(posts.len(), 2);
    }
}
