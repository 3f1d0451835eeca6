//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` or `station_param` is empty
    /// - `max_concurrent` is outside 1..=16
    /// - `batch_size` is outside 1..=8
    /// - `page_size`, `cache_ttl_secs` or `cache_max_entries` is 0
    /// - `rate_limit_delay_ms` is shorter than `retry_base_delay_ms`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.station_param.trim().is_empty() {
            return Err(invalid("station_param", "must not be empty"));
        }

        if !(1..=16).contains(&self.max_concurrent) {
            return Err(invalid("max_concurrent", "must be between 1 and 16"));
        }
        if self.delay_between_requests_ms > 60_000 {
            return Err(invalid("delay_between_requests_ms", "must not exceed 60000ms"));
        }

        if self.max_retries > 10 {
            return Err(invalid("max_retries", "must not exceed 10"));
        }
        if self.rate_limit_delay_ms < self.retry_base_delay_ms {
            return Err(invalid("rate_limit_delay_ms", "must be at least retry_base_delay_ms"));
        }

        if !(1..=8).contains(&self.batch_size) {
            return Err(invalid("batch_size", "must be between 1 and 8"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "must be greater than 0"));
        }
        if self.transaction_timeout_ms < 100 {
            return Err(invalid("transaction_timeout_ms", "must be at least 100ms"));
        }

        if self.cache_ttl_secs == 0 {
            return Err(invalid("cache_ttl_secs", "must be greater than 0"));
        }
        if self.cache_max_entries == 0 {
            return Err(invalid("cache_max_entries", "must be greater than 0"));
        }

        if self.max_concurrent > 1 && self.delay_between_requests_ms == 0 {
            tracing::warn!(
                max_concurrent = self.max_concurrent,
                "delay_between_requests_ms is 0; station fetches will be dispatched back to back"
            );
        }

        Ok(())
    }
}
