//! Client code for roomwatch.
//!
//! This crate provides the fetch and parse ports, a reqwest-backed fetcher
//! with retry, the station crawl orchestrator and the crawl-then-save
//! pipeline.

pub mod crawl;
pub mod fetch;
pub mod parse;
pub mod pipeline;

pub use crawl::{CrawlOptions, CrawlResult, StationCrawler, StationError};
pub use fetch::{Fetcher, HttpFetcher, RetryConfig};
pub use parse::Parser;
pub use pipeline::{Pipeline, RunSummary};
