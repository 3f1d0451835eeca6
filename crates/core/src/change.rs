//! Content-aware change detection between a fresh listing and its snapshot.
//!
//! Pure functions only; safe to call from inside a database transaction.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::listing::Listing;

/// A listing field that differs from the stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    NewRecord,
    Title,
    Category,
    Layout,
    Tags,
    Images,
    Stations,
}

impl ChangedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangedField::NewRecord => "new_record",
            ChangedField::Title => "title",
            ChangedField::Category => "category",
            ChangedField::Layout => "layout",
            ChangedField::Tags => "tags",
            ChangedField::Images => "images",
            ChangedField::Stations => "stations",
        }
    }
}

impl fmt::Display for ChangedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a fresh listing with its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub has_changed: bool,
    pub changed_fields: Vec<ChangedField>,
    /// Fingerprint of the fresh listing.
    pub hash: String,
}

impl ChangeSet {
    pub fn touches(&self, field: ChangedField) -> bool {
        self.changed_fields.contains(&field)
    }
}

/// Compare a freshly crawled listing with the last stored snapshot.
pub fn compare(fresh: &Listing, stored: Option<&Listing>) -> ChangeSet {
    let fresh = fresh.clone().normalized();
    let hash = content_hash(&fresh);

    let Some(stored) = stored else {
        return ChangeSet { has_changed: true, changed_fields: vec![ChangedField::NewRecord], hash };
    };
    let stored = stored.clone().normalized();

    let mut changed_fields = Vec::new();
    if !titles_equivalent(fresh.title.as_deref(), stored.title.as_deref()) {
        changed_fields.push(ChangedField::Title);
    }
    if fresh.category != stored.category {
        changed_fields.push(ChangedField::Category);
    }
    if fresh.layout != stored.layout {
        changed_fields.push(ChangedField::Layout);
    }
    if as_set(&fresh.tags) != as_set(&stored.tags) {
        changed_fields.push(ChangedField::Tags);
    }
    if as_set(&fresh.images) != as_set(&stored.images) {
        changed_fields.push(ChangedField::Images);
    }
    if station_pairs(&fresh) != station_pairs(&stored) {
        changed_fields.push(ChangedField::Stations);
    }

    ChangeSet { has_changed: !changed_fields.is_empty(), changed_fields, hash }
}

/// Stable digest over the canonical field set of a listing.
pub fn content_hash(listing: &Listing) -> String {
    let listing = listing.clone().normalized();

    let mut hasher = Sha256::new();
    for value in [&listing.title, &listing.category, &listing.layout] {
        hasher.update(value.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\n");
    }
    for set in [as_set(&listing.tags), as_set(&listing.images)] {
        for item in set {
            hasher.update(item.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\n");
    }
    for (name, distance) in station_pairs(&listing) {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(distance.map(|d| d.to_string()).unwrap_or_default().as_bytes());
        hasher.update(b"\x1f");
    }
    hex::encode(hasher.finalize())
}

/// Minor title edits are not treated as content changes: a trimmed prefix
/// match, or extra whitespace-separated tokens appended to one side.
fn titles_equivalent(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if a == b || a.starts_with(b) || b.starts_with(a) {
                return true;
            }
            let a_tokens: Vec<&str> = a.split_whitespace().collect();
            let b_tokens: Vec<&str> = b.split_whitespace().collect();
            a_tokens.starts_with(&b_tokens) || b_tokens.starts_with(&a_tokens)
        }
        _ => false,
    }
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

fn station_pairs(listing: &Listing) -> BTreeSet<(&str, Option<u32>)> {
    listing
        .stations
        .iter()
        .map(|s| (s.station_name.as_str(), s.distance))
        .collect()
}
