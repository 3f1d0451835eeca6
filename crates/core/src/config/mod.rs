//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (ROOMWATCH_*)
//! 2. TOML config file (if ROOMWATCH_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::store::StoreConfig;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (ROOMWATCH_*)
/// 2. TOML config file (if ROOMWATCH_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database.
    ///
    /// Set via ROOMWATCH_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Query parameter carrying the station facet in search URLs.
    #[serde(default = "default_station_param")]
    pub station_param: String,

    /// Maximum number of station fetches in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Pause between groups of `max_concurrent` dispatches, in milliseconds.
    #[serde(default = "default_delay_between_requests_ms")]
    pub delay_between_requests_ms: u64,

    /// Expose the complete per-station distance list on merged listings.
    #[serde(default = "default_true")]
    pub include_station_info: bool,

    /// Retries after the first failed fetch attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Delay after an HTTP 429 response, in milliseconds.
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    /// Listings committed per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per page for cursor-paginated reads.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Wall-clock budget for one batch transaction, in milliseconds.
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,

    /// TTL for cached existence lookups, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Entry count at which the lookup cache starts evicting expired entries.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./roomwatch.sqlite")
}

fn default_user_agent() -> String {
    "roomwatch/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_station_param() -> String {
    "ek".into()
}

fn default_max_concurrent() -> usize {
    3
}

fn default_delay_between_requests_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_rate_limit_delay_ms() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    5
}

fn default_page_size() -> usize {
    500
}

fn default_transaction_timeout_ms() -> u64 {
    15_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    256
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            station_param: default_station_param(),
            max_concurrent: default_max_concurrent(),
            delay_between_requests_ms: default_delay_between_requests_ms(),
            include_station_info: true,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Politeness delay between dispatch groups.
    pub fn delay_between_requests(&self) -> Duration {
        Duration::from_millis(self.delay_between_requests_ms)
    }

    /// Persistence settings derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            batch_size: self.batch_size,
            page_size: self.page_size,
            transaction_timeout: Duration::from_millis(self.transaction_timeout_ms),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_max_entries: self.cache_max_entries,
            station_param: self.station_param.clone(),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `ROOMWATCH_`
    /// 2. TOML file from `ROOMWATCH_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("ROOMWATCH_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("ROOMWATCH_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./roomwatch.sqlite"));
        assert_eq!(config.user_agent, "roomwatch/0.1");
        assert_eq!(config.station_param, "ek");
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.page_size, 500);
        assert!(config.include_station_info);
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.delay_between_requests(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_store_config_view() {
        let config = AppConfig { batch_size: 3, page_size: 50, cache_ttl_secs: 10, ..Default::default() };
        let store = config.store_config();
        assert_eq!(store.batch_size, 3);
        assert_eq!(store.page_size, 50);
        assert_eq!(store.cache_ttl, Duration::from_secs(10));
        assert_eq!(store.transaction_timeout, Duration::from_millis(15_000));
        assert_eq!(store.station_param, "ek");
    }

    #[test]
    fn test_load_from_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("roomwatch.toml", "batch_size = 4\nstation_param = \"st\"")?;
            jail.set_env("ROOMWATCH_CONFIG_FILE", "roomwatch.toml");
            jail.set_env("ROOMWATCH_MAX_CONCURRENT", "2");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.batch_size, 4);
            assert_eq!(config.station_param, "st");
            assert_eq!(config.max_concurrent, 2);
            Ok(())
        });
    }
}
