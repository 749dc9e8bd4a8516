//! Environment variable loading for [`crate::AppConfig`].

use crate::{
    AppConfig, BatchConfig, BrowserConfig, ConfigError, DispatchConfig, FastScraperConfig,
    LlmConfig, LockConfig, ObservabilityConfig, SchedulerConfig, StoreConfig, TargetConfig,
};
use std::env;
use std::str::FromStr;

const DEFAULT_SCRAPE_CADENCE: &str = "0 */15 * * * * *";
const DEFAULT_CLASSIFY_CADENCE: &str = "0 */5 * * * * *";
const DEFAULT_GENERATE_CADENCE: &str = "0 */10 * * * * *";
const DEFAULT_DISPATCH_CADENCE: &str = "0 */20 * * * * *";
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Reads and validates the recognized set of environment variables (spec §6)
/// into a single [`AppConfig`].
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let target_ids: Vec<String> = env_required("TARGET_IDS")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(AppConfig {
            store: StoreConfig {
                url: env_required("STORE_URL")?,
            },
            llm: LlmConfig {
                api_base_url: env_required("LLM_API_BASE_URL")?,
                api_key: env_required("LLM_API_KEY")?,
                model: env_required("LLM_MODEL")?,
            },
            fast_scraper: FastScraperConfig {
                api_base_url: env_required("FAST_SCRAPER_API_BASE_URL")?,
                token: env_required("FAST_SCRAPER_TOKEN")?,
                limit: env_parse("FAST_SCRAPER_LIMIT")?,
            },
            target: TargetConfig {
                target_ids,
                canonical_base_url: env_required("CANONICAL_BASE_URL")?,
                landing_base_url: env_opt("LANDING_BASE_URL"),
            },
            dispatch: DispatchConfig {
                daily_limit: env_parse("DAILY_DISPATCH_LIMIT")?,
            },
            batch: BatchConfig {
                classify_batch_size: env_parse("CLASSIFY_BATCH_SIZE")?,
                generate_batch_size: env_parse("GENERATE_BATCH_SIZE")?,
            },
            browser: BrowserConfig {
                max_instances: env_parse("MAX_BROWSER_INSTANCES")?,
                profile_dir: env_required("BROWSER_PROFILE_DIR")?,
                webdriver_url: env_opt("WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            },
            lock: LockConfig {
                backend_url: env_opt("LOCK_BACKEND_URL"),
                ttl_seconds: env_parse("LOCK_TTL_SECONDS")?,
            },
            observability: ObservabilityConfig {
                self_heal_interval_seconds: env_parse("SELF_HEAL_INTERVAL_SECONDS")?,
                metrics_sample_interval_seconds: env_parse("METRICS_SAMPLE_INTERVAL_SECONDS")?,
            },
            scheduler: SchedulerConfig {
                scrape_cadence: env_opt("SCRAPE_CADENCE").unwrap_or_else(|| DEFAULT_SCRAPE_CADENCE.to_string()),
                classify_cadence: env_opt("CLASSIFY_CADENCE").unwrap_or_else(|| DEFAULT_CLASSIFY_CADENCE.to_string()),
                generate_cadence: env_opt("GENERATE_CADENCE").unwrap_or_else(|| DEFAULT_GENERATE_CADENCE.to_string()),
                dispatch_cadence: env_opt("DISPATCH_CADENCE").unwrap_or_else(|| DEFAULT_DISPATCH_CADENCE.to_string()),
            },
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Required string variable, or [`ConfigError::Missing`].
fn env_required(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::Missing(var.to_string()))
}

/// Optional string variable; absent or empty both mean `None`.
fn env_opt(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}

/// Required variable parsed into `T`, or [`ConfigError::Missing`] /
/// [`ConfigError::Invalid`].
fn env_parse<T>(var: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_required(var)?;
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        var: var.to_string(),
        value: raw,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn required_vars() -> &'static [(&'static str, &'static str)] {
        &[
            ("STORE_URL", "postgres://localhost/chronicle"),
            ("LLM_API_BASE_URL", "https://llm.example.test"),
            ("LLM_API_KEY", "test-key"),
            ("LLM_MODEL", "gpt-test"),
            ("FAST_SCRAPER_API_BASE_URL", "https://scraper.example.test"),
            ("FAST_SCRAPER_TOKEN", "tok"),
            ("FAST_SCRAPER_LIMIT", "50"),
            ("TARGET_IDS", "t1,t2"),
            ("CANONICAL_BASE_URL", "https://example.test"),
            ("DAILY_DISPATCH_LIMIT", "100"),
            ("CLASSIFY_BATCH_SIZE", "20"),
            ("GENERATE_BATCH_SIZE", "10"),
            ("MAX_BROWSER_INSTANCES", "2"),
            ("BROWSER_PROFILE_DIR", "/tmp/profile"),
            ("LOCK_TTL_SECONDS", "30"),
            ("SELF_HEAL_INTERVAL_SECONDS", "30"),
            ("METRICS_SAMPLE_INTERVAL_SECONDS", "10"),
        ]
    }

    fn set_all() {
        for (k, v) in required_vars() {
            env::set_var(k, v);
        }
        env::remove_var("LANDING_BASE_URL");
        env::remove_var("LOCK_BACKEND_URL");
    }

    fn clear_all() {
        for (k, _) in required_vars() {
            env::remove_var(k);
        }
    }

    #[test]
    fn loads_full_config_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_all();
        let cfg = ConfigLoader::new().load().expect("should load");
        assert_eq!(cfg.target.target_ids, vec!["t1", "t2"]);
        assert_eq!(cfg.fast_scraper.limit, 50);
        assert!(cfg.target.landing_base_url.is_none());
        assert!(cfg.lock.backend_url.is_none());
        clear_all();
    }

    #[test]
    fn missing_required_var_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_all();
        env::remove_var("STORE_URL");
        let err = ConfigLoader::new().load().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(v) if v == "STORE_URL"));
        clear_all();
    }

    #[test]
    fn non_numeric_value_is_invalid_not_panic() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_all();
        env::set_var("FAST_SCRAPER_LIMIT", "not-a-number");
        let err = ConfigLoader::new().load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "FAST_SCRAPER_LIMIT"));
        clear_all();
    }
}
