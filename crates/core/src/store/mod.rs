//! SQLite-backed persistence engine for listings, queries and crawl sessions.
//!
//! This module provides idempotent storage of crawl results using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Batched upserts with per-listing fallback when a batch transaction fails
//! - Change-gated writes: unchanged listings only get a last-seen touch
//! - Cursor-paginated bulk identity reads
//! - A TTL lookup cache in front of expensive existence queries

pub mod connection;
pub mod listings;
pub mod lookup_cache;
pub mod migrations;
pub mod pagination;
pub mod queries;
pub mod save;
pub mod sessions;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

pub use connection::{IdentitySet, Store};
pub use lookup_cache::LookupCache;
pub use pagination::IdentityPages;
pub use queries::Query;
pub use save::SaveSummary;
pub use sessions::{CrawlSession, NotifyMode, QueryListing, SessionListing, SessionOptions};

/// Fixed persistence settings. None of these depend on the data being saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Listings per batch transaction.
    pub batch_size: usize,
    /// Rows per page for cursor-paginated reads.
    pub page_size: usize,
    /// Wall-clock budget of one transaction.
    pub transaction_timeout: Duration,
    /// TTL of cached existence lookups.
    pub cache_ttl: Duration,
    /// Soft bound on cached entries.
    pub cache_max_entries: usize,
    /// Station facet parameter, needed to canonicalize query ids.
    pub station_param: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            page_size: 500,
            transaction_timeout: Duration::from_secs(15),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 256,
            station_param: "ek".into(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be greater than 0".into()));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidInput("page_size must be greater than 0".into()));
        }
        if self.transaction_timeout.is_zero() {
            return Err(Error::InvalidInput("transaction_timeout must be greater than 0".into()));
        }
        if self.cache_max_entries == 0 {
            return Err(Error::InvalidInput("cache_max_entries must be greater than 0".into()));
        }
        Ok(())
    }
}
