use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Environment variable holding the GitHub bearer token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Largest page the search connection returns for this query shape.
pub const MAX_PAGE_SIZE: usize = 20;

const DEFAULT_SEARCH_QUERY: &str = "stars:>1 sort:stars-desc is:public archived:false fork:false";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub github: GithubConfig,
    pub collector: CollectorConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    pub target_count: usize,
    pub page_size: usize,
    pub search_query: String,
    pub page_delay_ms: u64,
    pub repo_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub rate_limit_margin_seconds: u64,
    pub rate_limit_fallback_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub path: String,
}

impl Config {
    /// Loads defaults, then `config.*` in the working directory if present,
    /// then `REPO_CENSUS__SECTION__KEY` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let s = ConfigLoader::builder()
            .set_default("github.url", "https://api.github.com/graphql")?
            .set_default("github.user_agent", concat!("repo-census/", env!("CARGO_PKG_VERSION")))?
            .set_default("github.timeout_seconds", 90_i64)?
            .set_default("collector.target_count", 1000_i64)?
            .set_default("collector.page_size", MAX_PAGE_SIZE as i64)?
            .set_default("collector.search_query", DEFAULT_SEARCH_QUERY)?
            .set_default("collector.page_delay_ms", 1600_i64)?
            .set_default("collector.repo_delay_ms", 600_i64)?
            .set_default("retry.max_attempts", 7_i64)?
            .set_default("retry.base_delay_ms", 1000_i64)?
            .set_default("retry.max_jitter_ms", 1200_i64)?
            .set_default("retry.rate_limit_margin_seconds", 2_i64)?
            .set_default("retry.rate_limit_fallback_seconds", 60_i64)?
            .set_default("output.path", "github_repositories.csv")?
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("REPO_CENSUS").separator("__").try_parsing(true))
            .build()?;

        let mut config: Config = s.try_deserialize()?;
        if config.github.token.trim().is_empty() {
            config.github.token = std::env::var(TOKEN_ENV).unwrap_or_default();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.github.token.trim().is_empty() {
            return Err(ConfigError::Message(format!(
                "{TOKEN_ENV} is not set; export a GitHub token before running"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message("retry.max_attempts must be at least 1".into()));
        }
        if self.collector.page_size == 0 {
            return Err(ConfigError::Message("collector.page_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl CollectorConfig {
    /// Requested page size, capped at what the search API serves.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn repo_delay(&self) -> Duration {
        Duration::from_millis(self.repo_delay_ms)
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
            rate_limit_margin: Duration::from_secs(self.rate_limit_margin_seconds),
            rate_limit_fallback: Duration::from_secs(self.rate_limit_fallback_seconds),
        }
    }
}
