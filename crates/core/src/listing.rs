//! Listing records as they flow through crawl, merge and persistence.
//!
//! Parsers hand back loosely filled [`Listing`] values; [`Listing::normalized`]
//! canonicalizes them so change detection and persistence always compare the
//! same shape.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:分|min)").expect("minutes pattern is valid"));
static FIRST_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("number pattern is valid"));

/// Distance from a listing to one transit station.
///
/// Unique per (listing, station id, station name); `station_id` is empty
/// when the page did not expose one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationDistance {
    #[serde(default)]
    pub station_id: String,
    pub station_name: String,
    /// Distance in minutes.
    pub distance: Option<u32>,
    /// Display text as shown by the source, e.g. `"歩5分"`.
    pub raw_text: Option<String>,
}

impl StationDistance {
    /// Build an entry from display text, extracting the minute value.
    pub fn from_display(station_id: impl Into<String>, station_name: impl Into<String>, raw_text: &str) -> Self {
        Self {
            station_id: station_id.into(),
            station_name: station_name.into(),
            distance: parse_minutes(raw_text),
            raw_text: Some(raw_text.to_string()),
        }
        .normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            station_id: self.station_id.trim().to_string(),
            station_name: self.station_name.trim().to_string(),
            distance: self.distance,
            raw_text: clean(self.raw_text),
        }
    }

    /// Composite key used for uniqueness.
    pub fn key(&self) -> (&str, &str) {
        (&self.station_id, &self.station_name)
    }
}

/// Extract a minute count from display text such as `"徒歩7分"` or `"bus 12 min"`.
pub fn parse_minutes(raw: &str) -> Option<u32> {
    let digits = MINUTES_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .or_else(|| FIRST_NUMBER_RE.find(raw))?;
    digits.as_str().parse().ok()
}

/// A single rental listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Source-assigned id, when the page exposes one.
    pub source_id: Option<String>,
    /// Canonical detail link.
    pub link: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    /// Room layout, e.g. `1LDK`.
    pub layout: Option<String>,
    #[serde(default)]
    pub stations: Vec<StationDistance>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Listing {
    pub fn new(link: impl Into<String>) -> Self {
        Self { link: Some(link.into()), ..Default::default() }
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_station(mut self, station: StationDistance) -> Self {
        self.stations.push(station);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images.extend(images.into_iter().map(Into::into));
        self
    }

    /// Canonical form: strings trimmed, empty values dropped, set-like
    /// fields de-duplicated in first-seen order.
    pub fn normalized(self) -> Self {
        let mut seen = HashSet::new();
        let stations = self
            .stations
            .into_iter()
            .map(StationDistance::normalized)
            .filter(|s| !s.station_name.is_empty() || !s.station_id.is_empty())
            .filter(|s| seen.insert((s.station_id.clone(), s.station_name.clone())))
            .collect();

        Self {
            source_id: clean(self.source_id),
            link: clean(self.link),
            title: clean(self.title),
            category: clean(self.category),
            layout: clean(self.layout),
            stations,
            tags: clean_set(self.tags),
            images: clean_set(self.images),
        }
    }

    /// Add station entries not already present (by station id + name).
    ///
    /// Returns the number of entries added.
    pub fn merge_stations(&mut self, other: &[StationDistance]) -> usize {
        let mut added = 0;
        for station in other {
            if !self.stations.iter().any(|s| s.key() == station.key()) {
                self.stations.push(station.clone());
                added += 1;
            }
        }
        added
    }
}

/// A persisted listing with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredListing {
    pub identity: String,
    pub listing: Listing,
    pub content_hash: String,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub active: bool,
}

/// Current time as a fixed-width RFC 3339 UTC string.
///
/// Microsecond precision with a `Z` suffix keeps lexicographic and
/// chronological ordering identical, which the SQL `MAX()` upserts rely on.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn clean_set(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}
