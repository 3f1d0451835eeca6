//! Core types and persistence for roomwatch.
//!
//! This crate provides:
//! - Listing model, identity derivation and change detection
//! - SQLite-backed store for listings, queries and crawl sessions
//! - Unified error types
//! - Layered configuration

pub mod change;
pub mod config;
pub mod error;
pub mod facet;
pub mod identity;
pub mod listing;
pub mod store;

pub use change::{ChangeSet, ChangedField};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use listing::{Listing, StationDistance, StoredListing};
pub use store::{NotifyMode, SaveSummary, SessionOptions, Store, StoreConfig};
