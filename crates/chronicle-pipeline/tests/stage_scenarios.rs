//! Scenario-level integration tests driving each stage's `run()` directly,
//! rather than its pure helper functions, against a real store.
//!
//! Requires a running PostgreSQL database (schema is created on connect).
//! Run with: DATABASE_URL="postgresql:///chronicle_test" cargo test -p chronicle-pipeline --test stage_scenarios -- --ignored --nocapture

use chronicle_observability::{EventBus, EventKind};
use chronicle_pipeline::{BrowserDispatcher, ClassifyStage, DispatchStage, GenerateStage, LlmClient};
use chronicle_pool::BoundedPool;
use chronicle_resilience::{Breaker, BreakerConfig};
use chronicle_store::StoreAdapter;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn connect() -> Arc<StoreAdapter> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    Arc::new(StoreAdapter::connect(&url).await.expect("store connects and initializes schema"))
}

/// A fresh suffix per test run, so re-running these tests against the same
/// disposable database never collides with a previous run's rows.
fn unique_suffix() -> u128 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
}

async fn seed_raw_item(store: &StoreAdapter, source_key: &str, text: &str) -> String {
    let raw = store
        .upsert_raw("target-1", source_key, Some("Jane Doe"), Some("https://example.com/jane"), None, text)
        .await
        .expect("raw item inserts");
    raw.id
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn classify_run_short_circuits_batch_on_open_breaker_and_emits_error() {
    let store = connect().await;
    let suffix = unique_suffix();
    seed_raw_item(&store, &format!("classify-scn-1-{suffix}"), "a post about my grandfather's farm").await;
    seed_raw_item(&store, &format!("classify-scn-2-{suffix}"), "another post about local history").await;

    let breaker = Arc::new(Breaker::new(
        "llm",
        BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(3600),
        },
    ));
    // One forced failure trips the breaker open before `run()` ever starts,
    // so every candidate in the batch sees CircuitOpen on its first attempt.
    let _ = breaker.execute(|| async { Err::<(), _>("boom") }).await;

    let llm = LlmClient::new("http://127.0.0.1:1", "key", "test-model", breaker);
    let bus = Arc::new(EventBus::new());
    let mut errors = bus.subscribe(Some(EventKind::Error));
    let stage = ClassifyStage::with_default_batch_size(store.clone(), llm, bus);

    stage.run().await.expect("run does not propagate a per-candidate failure");

    let event = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .expect("an error event is published")
        .unwrap();
    assert!(event.payload["message"].as_str().unwrap().contains("breaker"));

    let remaining = store.candidates_for_classify(10).await.unwrap();
    assert!(
        remaining.iter().any(|r| r.source_key == format!("classify-scn-1-{suffix}") || r.source_key == format!("classify-scn-2-{suffix}")),
        "breaker-open must leave candidates unclassified for the next tick"
    );
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn generate_run_skips_message_missing_canonical_link_and_leaves_it_for_reselection() {
    let store = connect().await;
    let suffix = unique_suffix();
    let raw_id = seed_raw_item(&store, &format!("generate-scn-1-{suffix}"), "a post about the old mill").await;
    store.insert_classification(&raw_id, true, 90).await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "Thanks for sharing your story!"}}]
        })))
        .mount(&server)
        .await;

    let breaker = Arc::new(Breaker::new("llm", BreakerConfig::default()));
    let llm = LlmClient::new(server.uri(), "key", "test-model", breaker);
    let bus = Arc::new(EventBus::new());
    let mut errors = bus.subscribe(Some(EventKind::Error));
    let stage = GenerateStage::with_default_batch_size(store.clone(), llm, "https://canon.example".to_string(), None, bus);

    stage.run().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .expect("the missing-link skip is published as an error event")
        .unwrap();
    assert!(event.payload["message"].as_str().unwrap().contains("skipped"));

    let still_pending = store.candidates_for_generate(10, 60).await.unwrap();
    assert!(
        still_pending.iter().any(|(r, _)| r.id == raw_id),
        "a skipped candidate re-appears on the next tick since no draft was persisted"
    );
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn dispatch_run_halts_at_daily_quota_without_touching_the_sender() {
    let store = connect().await;
    let suffix = unique_suffix();
    let raw_id = seed_raw_item(&store, &format!("dispatch-scn-1-{suffix}"), "a post to dispatch").await;
    store.insert_classification(&raw_id, true, 90).await.unwrap();
    let draft = store
        .insert_draft(&raw_id, "hello, here's a link: https://canon.example/1", "https://canon.example/1")
        .await
        .unwrap()
        .expect("first draft insert wins");

    // Daily limit of 1, already met by a prior sent attempt: `run()` must
    // return before ever invoking the browser dispatcher.
    store
        .insert_dispatch_attempt(&raw_id, &draft.id, chronicle_common::DispatchStatus::Sent, None)
        .await
        .unwrap();

    let bus = Arc::new(EventBus::new());
    let pool = Arc::new(BoundedPool::new(1));
    // The webdriver URL is unreachable; if `run()` attempted a send it would
    // surface as a pool/transient error rather than a silent quota return.
    let dispatcher = BrowserDispatcher::new(std::env::temp_dir(), "http://127.0.0.1:1");
    let stage = DispatchStage::new(store.clone(), pool, dispatcher, 1, bus);

    stage.run().await.expect("quota halt returns Ok without attempting a send");

    let sent = store.count_sent_in_window(chrono::Duration::hours(24)).await.unwrap();
    assert_eq!(sent, 1, "no additional dispatch attempt was recorded past the quota");
}
