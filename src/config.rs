//! Runtime configuration, read from the environment (and `.env`).

use std::time::Duration;

use crate::lookup::LookupConfig;
use crate::models::DEFAULT_KEY_FIELD;
use crate::sync::BackoffConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub entity_key_field: String,
    pub lookup: LookupConfig,
    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            api_token: None,
            request_timeout: Duration::from_millis(12_000),
            entity_key_field: DEFAULT_KEY_FIELD.to_string(),
            lookup: LookupConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(url) = env_string("KASBON_API_URL") {
            config.api_url = url;
        }
        if let Some(url) = env_string("KASBON_WS_URL") {
            config.ws_url = url;
        }
        config.api_token = env_string("KASBON_API_TOKEN");

        if let Some(ms) = env_parse::<u64>("KASBON_REQUEST_TIMEOUT_MS").filter(|&v| v > 0) {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(field) = env_string("KASBON_ENTITY_KEY_FIELD") {
            config.entity_key_field = field;
        }

        if let Some(ms) = env_parse::<u64>("KASBON_LOOKUP_DEBOUNCE_MS") {
            config.lookup.debounce = Duration::from_millis(ms);
        }
        if let Some(limit) = env_parse::<usize>("KASBON_LOOKUP_LIMIT").filter(|&v| v > 0) {
            config.lookup.limit = limit;
        }
        config.lookup.request_timeout = config.request_timeout;

        if let Some(ms) = env_parse::<u64>("KASBON_RECONNECT_BASE_MS").filter(|&v| v > 0) {
            config.backoff.base = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("KASBON_RECONNECT_CAP_MS").filter(|&v| v > 0) {
            config.backoff.cap = Duration::from_millis(ms);
        }
        if let Some(steps) = env_parse::<u32>("KASBON_RECONNECT_MAX_STEPS").filter(|&v| v > 0) {
            config.backoff.max_steps = steps;
        }

        Ok(config)
    }
}
