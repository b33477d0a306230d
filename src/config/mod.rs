use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::api::UserType;
use crate::error::ClientError;

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub primary_url: String,
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    pub health_path: String,
    pub probe_timeout_secs: u64,
    pub resolution_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    pub min_interval_ms: u64,
    pub max_requests_per_window: u32,
    pub window_secs: u64,
    pub backoff_schedule_ms: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaSettings {
    pub timezone: String,
    pub daily_message_limit: u32,
    pub refresh_after_send: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub user_id: String,
    pub user_type: UserType,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub backend: BackendConfig,
    pub rate_limit: RateLimitSettings,
    pub quota: QuotaSettings,
    pub identity: IdentityConfig,
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    builder
        .set_default("environment", "development")?
        .set_default("backend.primary_url", "http://localhost:3000")?
        .set_default("backend.fallback_urls", Vec::<String>::new())?
        .set_default("backend.health_path", "/api/health")?
        .set_default("backend.probe_timeout_secs", 8)?
        .set_default("backend.resolution_ttl_secs", 30)?
        .set_default("backend.request_timeout_secs", 15)?
        .set_default("rate_limit.min_interval_ms", 2000)?
        .set_default("rate_limit.max_requests_per_window", 10)?
        .set_default("rate_limit.window_secs", 60)?
        .set_default("rate_limit.backoff_schedule_ms", vec![1000i64, 2000, 5000, 10000])?
        .set_default("quota.timezone", "America/New_York")?
        .set_default("quota.daily_message_limit", 5)?
        .set_default("quota.refresh_after_send", true)?
        .set_default("identity.user_id", "anonymous")?
        .set_default("identity.user_type", "client")
}

fn environment_source() -> Environment {
    // E.g., `APP_BACKEND__PRIMARY_URL=https://api.example.com` sets `Settings.backend.primary_url`
    Environment::with_prefix("app")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("backend.fallback_urls")
        .with_list_parse_key("rate_limit.backoff_schedule_ms")
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        with_defaults(Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(environment_source())
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only, ignoring config files and the environment.
    pub fn defaults() -> Result<Self, ConfigError> {
        with_defaults(Config::builder())?.build()?.try_deserialize()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        with_defaults(Config::builder())?
            .set_override("environment", "test")?
            .build()?
            .try_deserialize()
    }

    /// Primary first, then fallbacks in configured order. Duplicates keep
    /// their first position.
    pub fn candidate_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(1 + self.backend.fallback_urls.len());
        for raw in std::iter::once(&self.backend.primary_url).chain(&self.backend.fallback_urls) {
            let trimmed = raw.trim().trim_end_matches('/').to_string();
            if !trimmed.is_empty() && !urls.contains(&trimmed) {
                urls.push(trimmed);
            }
        }
        urls
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        for candidate in self.candidate_urls() {
            let parsed = url::Url::parse(&candidate).map_err(|e| {
                ClientError::Config(format!("invalid backend url '{}': {}", candidate, e))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ClientError::Config(format!(
                    "backend url '{}' must use http or https",
                    candidate
                )));
            }
        }
        self.timezone()?;
        if self.rate_limit.max_requests_per_window == 0 {
            return Err(ClientError::Config(
                "rate_limit.max_requests_per_window must be at least 1".into(),
            ));
        }
        if self.rate_limit.backoff_schedule_ms.is_empty() {
            return Err(ClientError::Config(
                "rate_limit.backoff_schedule_ms must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz, ClientError> {
        self.quota
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ClientError::Config(format!("unknown timezone: {}", e)))
    }
}

impl BackendConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn resolution_ttl(&self) -> Duration {
        Duration::from_secs(self.resolution_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
