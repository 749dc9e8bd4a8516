//! LLM client used by the Classify and Generate stages (C9, C10).
//!
//! Grounded on the teacher's ambient chat-completion idiom (`ob-agentic`'s
//! `OpenAiClient::call_api`) adapted to this pipeline's breaker/retry
//! composition rule: the retry sequence runs inside one `breaker.execute`
//! call (spec §4.3), never as independent attempts.

use crate::PipelineError;
use chronicle_resilience::{retry, Breaker, BreakerError, RetryPolicy};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const CLASSIFY_SYSTEM_PROMPT: &str = "You are a classifier for a historical-society outreach pipeline. \
Given a social post, respond ONLY with compact JSON {\"is_relevant\": bool, \"confidence\": 0-100} \
indicating whether the post is about local or family history and how confident you are.";

const GENERATE_SYSTEM_PROMPT_TEMPLATE: &str = "You draft short, warm outreach messages inviting the \
author of a historically-themed post to share their story. Match the language of the source post. \
The message MUST include this exact link verbatim: {link}";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyResult {
    pub is_relevant: bool,
    pub confidence: i16,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    is_relevant: bool,
    confidence: i16,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct LlmClient {
    client: reqwest::Client,
    api_base_url: String,
    api_key: String,
    model: String,
    breaker: Arc<Breaker>,
    retry_policy: RetryPolicy,
}

impl LlmClient {
    pub fn new(api_base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, breaker: Arc<Breaker>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds"),
            api_base_url: api_base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            breaker,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Classify a raw post's relevance (spec §4.9).
    pub async fn classify(&self, text: &str) -> Result<ClassifyResult, PipelineError> {
        let raw = self.guarded_complete(CLASSIFY_SYSTEM_PROMPT, text, true).await?;
        let parsed: ClassifyResponse =
            serde_json::from_str(raw.trim()).map_err(|e| PipelineError::Malformed(format!("classify response: {e}")))?;
        Ok(ClassifyResult {
            is_relevant: parsed.is_relevant,
            confidence: parsed.confidence,
        })
    }

    /// Draft an outreach message that must embed `link` verbatim (spec
    /// §4.10 validates this on return; the system prompt merely asks for it).
    pub async fn generate(&self, source_text: &str, link: &str) -> Result<String, PipelineError> {
        let system_prompt = GENERATE_SYSTEM_PROMPT_TEMPLATE.replace("{link}", link);
        self.guarded_complete(&system_prompt, source_text, false).await
    }

    async fn guarded_complete(&self, system_prompt: &str, user_prompt: &str, json_mode: bool) -> Result<String, PipelineError> {
        let policy = self.retry_policy;
        let outcome = self
            .breaker
            .execute(|| retry(policy, PipelineError::is_retryable, || self.complete(system_prompt, user_prompt, json_mode)))
            .await;

        match outcome {
            Ok(text) => Ok(text),
            Err(BreakerError::CircuitOpen(name)) => Err(PipelineError::CircuitOpen(name)),
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str, json_mode: bool) -> Result<String, PipelineError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.2,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let status = response.status();
        if matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504) {
            return Err(PipelineError::Transient(format!("llm returned {status}")));
        }
        if !status.is_success() {
            return Err(PipelineError::Malformed(format!("llm returned {status}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::Malformed("empty choices array".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_resilience::BreakerConfig;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(api_base_url: String) -> LlmClient {
        LlmClient::new(api_base_url, "key", "test-model", Arc::new(Breaker::new("llm", BreakerConfig::default())))
    }

    #[tokio::test]
    async fn classify_parses_well_formed_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"is_relevant\": true, \"confidence\": 82}"}}]
            })))
            .mount(&server)
            .await;

        let result = client(server.uri()).classify("a post about my grandfather").await.unwrap();
        assert!(result.is_relevant);
        assert_eq!(result.confidence, 82);
    }

    #[tokio::test]
    async fn classify_rejects_malformed_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "not json"}}]
            })))
            .mount(&server)
            .await;

        let result = client(server.uri()).classify("text").await;
        assert!(matches!(result, Err(PipelineError::Malformed(_))));
    }

    #[tokio::test]
    async fn transient_status_is_retryable_not_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(server.uri()).classify("text").await;
        assert!(matches!(result, Err(PipelineError::Transient(_))));
    }
}
