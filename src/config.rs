use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    /// Model used when a request does not name one.
    pub default_model: String,
    /// Transient-failure retries performed by the HTTP client itself.
    pub llm_max_retries: u32,
    /// Root of the file-backed dataset source (`athletes/<id>.json`, `teams/<id>.json`).
    pub data_dir: String,
    pub insights: InsightConfig,
}

/// Tunables for the insight pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightConfig {
    /// Minimum spacing between two permitted upstream calls.
    pub min_interval: Duration,
    /// Maximum upstream calls within `window`.
    pub max_requests: usize,
    pub window: Duration,
    pub cache_ttl: Duration,
    /// Quiet period absorbing bursts of triggers for the same subject.
    pub debounce: Duration,
    /// Upper bound on a single upstream call.
    pub request_timeout: Duration,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_requests: 1,
            window: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(300),
            debounce: Duration::from_millis(100),
            request_timeout: Duration::from_secs(20),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = InsightConfig::default();

    let llm_api_key = std::env::var("INSIGHTS_LLM_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if llm_api_key.is_none() {
        let env_mode = std::env::var("INSIGHTS_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "INSIGHTS_LLM_API_KEY is not set. Every insight request would degrade \
                 to fallback content; refusing to start in production."
            );
        }
        tracing::warn!("INSIGHTS_LLM_API_KEY is not set; upstream calls will likely fail and fall back");
    }

    let insights = InsightConfig {
        min_interval: Duration::from_secs(env_or("INSIGHTS_MIN_INTERVAL_SECS", 5)),
        max_requests: env_or("INSIGHTS_MAX_REQUESTS", defaults.max_requests),
        window: Duration::from_secs(env_or("INSIGHTS_WINDOW_SECS", 60)),
        cache_ttl: Duration::from_secs(env_or("INSIGHTS_CACHE_TTL_SECS", 300)),
        debounce: Duration::from_millis(env_or("INSIGHTS_DEBOUNCE_MS", 100)),
        request_timeout: Duration::from_secs(env_or("INSIGHTS_REQUEST_TIMEOUT_SECS", 20)),
    };

    if insights.cache_ttl.is_zero() {
        anyhow::bail!("INSIGHTS_CACHE_TTL_SECS must be greater than zero");
    }
    if insights.max_requests == 0 {
        anyhow::bail!("INSIGHTS_MAX_REQUESTS must be at least 1");
    }

    Ok(Config {
        port: env_or("INSIGHTS_PORT", 8080),
        llm_base_url: std::env::var("INSIGHTS_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
        llm_api_key,
        default_model: std::env::var("INSIGHTS_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        llm_max_retries: env_or("INSIGHTS_LLM_MAX_RETRIES", 2),
        data_dir: std::env::var("INSIGHTS_DATA_DIR").unwrap_or_else(|_| "./data".into()),
        insights,
    })
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
