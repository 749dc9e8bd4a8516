//! Chronicle pipeline: single long-running process.
//!
//! Wires the store, breaker registry, distributed lock, stage handlers, the
//! cron scheduler, the observability stack, and the operator push channel,
//! then runs them all until an OS termination signal arrives. Exit codes
//! follow spec §6: 0 on graceful shutdown, 1 on configuration failure, 2 on
//! a fatal store error at startup.

use chronicle_config::AppConfig;
use chronicle_lock::DistributedLock;
use chronicle_observability::{EventBus, EventKind, MetricsSampler, RequestTracker, SelfHealingController};
use chronicle_pipeline::{BrowserDispatcher, ClassifyStage, DispatchStage, GenerateStage, LlmClient, ScrapeStage};
use chronicle_pool::BoundedPool;
use chronicle_push::PushServer;
use chronicle_resilience::{dependency, BreakerConfig, BreakerRegistry};
use chronicle_scrape::{BrowserScraper, FastScraper, TargetRouter};
use chronicle_secrets::{EnvProvider, Provider};
use chronicle_store::StoreAdapter;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const GRACEFUL_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const DEFAULT_PUSH_PORT: u16 = 9090;

#[tokio::main]
async fn main() -> ExitCode {
    chronicle_common::logging::init_logging("chronicle-server");

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration validation failed");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(StartupError::Store(e)) => {
            error!(error = %e, "fatal store error at startup");
            ExitCode::from(2)
        }
        Err(StartupError::Other(e)) => {
            error!(error = %e, "fatal startup error");
            ExitCode::from(2)
        }
    }
}

enum StartupError {
    Store(chronicle_common::StoreError),
    Other(anyhow::Error),
}

impl From<chronicle_common::StoreError> for StartupError {
    fn from(e: chronicle_common::StoreError) -> Self {
        StartupError::Store(e)
    }
}

impl From<chronicle_lock::LockError> for StartupError {
    fn from(e: chronicle_lock::LockError) -> Self {
        StartupError::Other(anyhow::anyhow!(e.to_string()))
    }
}

impl From<chronicle_scheduler::SchedulerError> for StartupError {
    fn from(e: chronicle_scheduler::SchedulerError) -> Self {
        StartupError::Other(anyhow::anyhow!(e.to_string()))
    }
}

impl From<std::io::Error> for StartupError {
    fn from(e: std::io::Error) -> Self {
        StartupError::Other(anyhow::anyhow!(e.to_string()))
    }
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    info!("connecting to durable store");
    let store = Arc::new(StoreAdapter::connect(&config.store.url).await?);

    let bus = Arc::new(EventBus::new());

    let breaker_bus = bus.clone();
    let breakers = Arc::new(BreakerRegistry::with_hook(BreakerConfig::default(), move |transition| {
        breaker_bus.publish(
            EventKind::Breaker,
            serde_json::json!({ "name": transition.name, "from": transition.from, "to": transition.to }),
        );
    }));

    let lock = Arc::new(DistributedLock::new(config.lock.backend_url.as_deref()).await?);

    // LLM_API_KEY and FAST_SCRAPER_TOKEN flow through the uniform secrets
    // provider (rather than as bare env reads) so a deployment can later
    // swap in the encrypted-file backend without touching call sites; the
    // config-loaded value is the fallback since the config crate's own
    // validation already guarantees it is present.
    let secrets = EnvProvider::with_prefix("");
    let llm_api_key = secrets.get("LLM_API_KEY").await.unwrap_or_else(|_| config.llm.api_key.clone());
    let fast_scraper_token = secrets.get("FAST_SCRAPER_TOKEN").await.unwrap_or_else(|_| config.fast_scraper.token.clone());

    let router = TargetRouter::new(store.clone());
    let fast_scraper = FastScraper::new(fast_scraper_token, config.fast_scraper.api_base_url.clone(), breakers.get(dependency::FAST_SCRAPER));
    let browser_scraper = BrowserScraper::new(config.browser.profile_dir.clone(), config.browser.webdriver_url.clone());

    let classify_llm = LlmClient::new(config.llm.api_base_url.clone(), llm_api_key.clone(), config.llm.model.clone(), breakers.get(dependency::LLM));
    let generate_llm = LlmClient::new(config.llm.api_base_url.clone(), llm_api_key, config.llm.model.clone(), breakers.get(dependency::LLM));

    let browser_pool = Arc::new(BoundedPool::new(config.browser.max_instances));
    let dispatcher = BrowserDispatcher::new(config.browser.profile_dir.clone(), config.browser.webdriver_url.clone());

    let scrape_stage = Arc::new(ScrapeStage::new(
        store.clone(),
        router,
        fast_scraper,
        browser_scraper,
        config.target.target_ids.clone(),
        config.target.canonical_base_url.clone(),
        config.fast_scraper.limit,
        bus.clone(),
    ));
    let classify_stage = Arc::new(ClassifyStage::new(store.clone(), classify_llm, config.batch.classify_batch_size, bus.clone()));
    let generate_stage = Arc::new(GenerateStage::new(
        store.clone(),
        generate_llm,
        config.target.canonical_base_url.clone(),
        config.target.landing_base_url.clone(),
        config.batch.generate_batch_size,
        bus.clone(),
    ));
    let dispatch_stage = Arc::new(DispatchStage::new(store.clone(), browser_pool.clone(), dispatcher, config.dispatch.daily_limit as i64, bus.clone()));

    let scheduler_hook_bus = bus.clone();
    let mut scheduler = chronicle_scheduler::Scheduler::with_hook(lock, move |stage, err| {
        scheduler_hook_bus.publish(EventKind::Error, serde_json::json!({ "stage": stage, "error": err }));
    });

    let lock_ttl = Duration::from_secs(config.lock.ttl_seconds);

    {
        let stage = scrape_stage.clone();
        scheduler.register("scrape", &config.scheduler.scrape_cadence, lock_ttl, move || {
            let stage = stage.clone();
            async move { stage.run().await.map_err(|e| e.to_string()) }
        })?;
    }
    {
        let stage = classify_stage.clone();
        scheduler.register("classify", &config.scheduler.classify_cadence, lock_ttl, move || {
            let stage = stage.clone();
            async move { stage.run().await.map_err(|e| e.to_string()) }
        })?;
    }
    {
        let stage = generate_stage.clone();
        scheduler.register("generate", &config.scheduler.generate_cadence, lock_ttl, move || {
            let stage = stage.clone();
            async move { stage.run().await.map_err(|e| e.to_string()) }
        })?;
    }
    {
        let stage = dispatch_stage.clone();
        scheduler.register("dispatch", &config.scheduler.dispatch_cadence, lock_ttl, move || {
            let stage = stage.clone();
            async move { stage.run().await.map_err(|e| e.to_string()) }
        })?;
    }

    let metrics = Arc::new(MetricsSampler::new(bus.clone(), Duration::from_secs(config.observability.metrics_sample_interval_seconds)));
    let requests = Arc::new(RequestTracker::new(bus.clone()));
    let healing = Arc::new(SelfHealingController::new(
        metrics.clone(),
        store.clone(),
        breakers.clone(),
        bus.clone(),
        Duration::from_secs(config.observability.self_heal_interval_seconds),
    ));
    let push = PushServer::new(bus.clone(), metrics.clone(), requests, healing.clone(), breakers.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handles = scheduler.run(shutdown_rx.clone());
    let metrics_handle = tokio::spawn(metrics.clone().run(shutdown_rx.clone()));
    let healing_handle = tokio::spawn(healing.run(shutdown_rx.clone()));

    let push_port: u16 = std::env::var("PUSH_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PUSH_PORT);
    let push_addr = SocketAddr::from(([0, 0, 0, 0], push_port));
    let listener = tokio::net::TcpListener::bind(push_addr).await?;
    info!(%push_addr, "push channel listening");

    let mut server_shutdown_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, push.router())
            .with_graceful_shutdown(async move {
                let _ = server_shutdown_rx.changed().await;
            })
            .await
            .ok();
    });

    info!("chronicle-server started");
    shutdown_signal().await;
    info!("shutdown signal received, stopping scheduler and draining in-flight work");

    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_GRACE, async {
        for handle in scheduler_handles {
            let _ = handle.await;
        }
        let _ = metrics_handle.await;
        let _ = healing_handle.await;
        let _ = server_handle.await;
    })
    .await;

    store.pool().close().await;
    info!("chronicle-server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
