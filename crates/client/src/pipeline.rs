//! Crawl then persist.

use chrono::{DateTime, Utc};
use roomwatch_core::{Error, NotifyMode, SaveSummary, SessionOptions, Store};
use serde::{Deserialize, Serialize};

use crate::crawl::{StationCrawler, StationError};
use crate::fetch::Fetcher;
use crate::parse::Parser;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub station_count: usize,
    pub successful_stations: usize,
    pub total_found: usize,
    pub merged_count: usize,
    pub duplicate_count: usize,
    pub errors: Vec<StationError>,
    pub save: SaveSummary,
}

/// Runs a crawl and records its results in the store.
pub struct Pipeline<F, P> {
    crawler: StationCrawler<F, P>,
    store: Store,
}

impl<F, P> Pipeline<F, P>
where
    F: Fetcher + 'static,
    P: Parser + 'static,
{
    pub fn new(crawler: StationCrawler<F, P>, store: Store) -> Self {
        Self { crawler, store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Crawl `url` and save the merged listings under a new session.
    ///
    /// Change detection happens per listing inside [`Store::save`].
    pub async fn run(&self, url: &str, notify_mode: NotifyMode) -> Result<RunSummary, Error> {
        let started_at = Utc::now();
        let crawl = self.crawler.crawl(url).await?;

        let options = SessionOptions {
            notify_mode,
            multi_station: crawl.is_multi_station(),
            station_ids: crawl.stations.clone(),
        };
        let save = self.store.save(url, &crawl.listings, &options).await?;

        tracing::info!(
            query_id = %save.query_id,
            session_id = save.session_id,
            saved = save.saved_count,
            new = save.new_count,
            changed = save.changed_count,
            failed = save.failed_count,
            station_errors = crawl.errors.len(),
            "pipeline run complete"
        );

        Ok(RunSummary {
            started_at,
            finished_at: Utc::now(),
            station_count: crawl.station_count,
            successful_stations: crawl.successful_stations,
            total_found: crawl.total_found,
            merged_count: crawl.merged_count,
            duplicate_count: crawl.duplicate_count,
            errors: crawl.errors,
            save,
        })
    }
}
