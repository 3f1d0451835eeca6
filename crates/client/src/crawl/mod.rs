//! Station-faceted crawling.
//!
//! A search URL may target several transit stations at once. Such URLs are
//! split into one single-station URL per station and fetched through a pool
//! of `max_concurrent` permits, so a slow station only holds its own slot.
//! Dispatch pauses for the politeness delay after every `max_concurrent`
//! requests. Results are merged by listing identity. One failing station never aborts the
//! crawl; it is reported in [`CrawlResult::errors`].

mod merge;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use roomwatch_core::{AppConfig, Error, Listing, facet};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::fetch::{Fetcher, RetryConfig};
use crate::parse::Parser;

pub use merge::{Merged, merge_listings};

/// Crawl settings.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Query parameter carrying station ids.
    pub station_param: String,
    /// Fetches in flight at once.
    pub max_concurrent: usize,
    /// Pause before each further group of `max_concurrent` dispatches.
    pub delay_between_requests: Duration,
    /// Whether merged listings collect the distance entries of every station.
    pub include_station_info: bool,
    pub retry: RetryConfig,
    /// Extra request headers passed to the fetcher.
    pub headers: HeaderMap,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            station_param: config.station_param.clone(),
            max_concurrent: config.max_concurrent,
            delay_between_requests: config.delay_between_requests(),
            include_station_info: config.include_station_info,
            retry: RetryConfig::from(config),
            headers: HeaderMap::new(),
        }
    }
}

/// A station whose fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationError {
    /// Empty when the URL carried no station facet.
    pub station_id: String,
    pub message: String,
}

/// Outcome of crawling one search URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub listings: Vec<Listing>,
    /// Station ids found in the URL, in URL order.
    pub stations: Vec<String>,
    pub station_count: usize,
    pub duplicate_count: usize,
    pub total_found: usize,
    pub merged_count: usize,
    /// Listings dropped during merge for lack of an identity.
    pub dropped_count: usize,
    pub errors: Vec<StationError>,
    pub successful_stations: usize,
}

impl CrawlResult {
    pub fn is_multi_station(&self) -> bool {
        self.station_count > 1
    }
}

/// Fetches and merges listings across the stations of a search URL.
pub struct StationCrawler<F, P> {
    fetcher: Arc<F>,
    parser: Arc<P>,
    options: CrawlOptions,
}

impl<F, P> StationCrawler<F, P>
where
    F: Fetcher + 'static,
    P: Parser + 'static,
{
    pub fn new(fetcher: Arc<F>, parser: Arc<P>, options: CrawlOptions) -> Self {
        Self { fetcher, parser, options }
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    /// Crawl a search URL.
    ///
    /// Only a malformed URL is an error; fetch failures are recorded per station.
    pub async fn crawl(&self, url: &str) -> Result<CrawlResult, Error> {
        let start = Instant::now();
        let stations = facet::station_ids(url, &self.options.station_param)?;

        let result = if stations.len() <= 1 {
            self.crawl_single(url, stations).await
        } else {
            self.crawl_multi(url, stations).await?
        };

        tracing::info!(
            url,
            stations = result.station_count,
            successful = result.successful_stations,
            found = result.total_found,
            merged = result.merged_count,
            duplicates = result.duplicate_count,
            errors = result.errors.len(),
            "crawl finished in {}ms",
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Zero or one station: fetch the URL as is and return the parser output unchanged.
    async fn crawl_single(&self, url: &str, stations: Vec<String>) -> CrawlResult {
        let station_id = stations.first().cloned().unwrap_or_default();
        let mut result = CrawlResult { station_count: stations.len(), stations, ..Default::default() };

        match self.fetcher.fetch(url, &self.options.headers, &self.options.retry).await {
            Ok(html) => {
                let listings = self.parser.parse_listings(&html);
                result.total_found = listings.len();
                result.merged_count = listings.len();
                result.listings = listings;
                result.successful_stations = 1;
            }
            Err(e) => {
                tracing::warn!(station_id = %station_id, "fetch failed: {e}");
                result.errors.push(StationError { station_id, message: e.to_string() });
            }
        }
        result
    }

    async fn crawl_multi(&self, url: &str, stations: Vec<String>) -> Result<CrawlResult, Error> {
        let targets = stations
            .iter()
            .map(|id| facet::single_station_url(url, &self.options.station_param, id))
            .collect::<Result<Vec<_>, _>>()?;

        let outcomes = self.fetch_pooled(&stations, targets).await;

        let mut errors = Vec::new();
        let mut successful = Vec::new();
        for (station_id, outcome) in stations.iter().zip(outcomes) {
            match outcome {
                Ok(listings) => successful.push(listings),
                Err(message) => {
                    tracing::warn!(station_id = %station_id, "station failed: {message}");
                    errors.push(StationError { station_id: station_id.clone(), message });
                }
            }
        }

        let successful_stations = successful.len();
        let merged = merge_listings(successful, self.options.include_station_info);

        Ok(CrawlResult {
            station_count: stations.len(),
            duplicate_count: merged.duplicate_count(),
            total_found: merged.total_found,
            merged_count: merged.merged_count(),
            dropped_count: merged.dropped_count,
            listings: merged.listings,
            stations,
            errors,
            successful_stations,
        })
    }

    /// Fetch and parse every station URL, returning outcomes in station order.
    async fn fetch_pooled(&self, stations: &[String], targets: Vec<String>) -> Vec<Result<Vec<Listing>, String>> {
        let mut outcomes: Vec<Result<Vec<Listing>, String>> =
            vec![Err("station task did not complete".to_string()); targets.len()];
        let max_concurrent = self.options.max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        let mut join_set = JoinSet::new();
        for (index, target) in targets.into_iter().enumerate() {
            if index > 0 && index % max_concurrent == 0 && !self.options.delay_between_requests.is_zero() {
                tokio::time::sleep(self.options.delay_between_requests).await;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let fetcher = self.fetcher.clone();
            let parser = self.parser.clone();
            let headers = self.options.headers.clone();
            let retry = self.options.retry;

            join_set.spawn(async move {
                let outcome = fetcher
                    .fetch(&target, &headers, &retry)
                    .await
                    .map(|html| parser.parse_listings(&html))
                    .map_err(|e| e.to_string());
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    tracing::debug!(station_id = %stations[index], ok = outcome.is_ok(), "station fetched");
                    outcomes[index] = outcome;
                }
                Err(e) => tracing::warn!("station task failed: {e}"),
            }
        }

        outcomes
    }
}
