//! Cross-station deduplication.

use std::collections::HashMap;

use roomwatch_core::Listing;
use roomwatch_core::identity::identity_key;

/// Listings merged across stations, with counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    pub listings: Vec<Listing>,
    /// Listings with an identity, across all stations, before merging.
    pub total_found: usize,
    /// Listings dropped because no identity could be derived.
    pub dropped_count: usize,
}

impl Merged {
    pub fn merged_count(&self) -> usize {
        self.listings.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.total_found - self.listings.len()
    }
}

/// Merge per-station listing lists, given in station order.
///
/// The first occurrence of an identity seeds the merged listing. Later
/// occurrences only contribute station distance entries, and only when
/// `include_station_info` is set.
pub fn merge_listings<I>(per_station: I, include_station_info: bool) -> Merged
where
    I: IntoIterator<Item = Vec<Listing>>,
{
    let mut merged = Merged::default();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for listings in per_station {
        for listing in listings {
            let Some(key) = identity_key(&listing) else {
                tracing::warn!(title = ?listing.title, "dropping listing without identity");
                merged.dropped_count += 1;
                continue;
            };
            merged.total_found += 1;

            match positions.get(&key) {
                Some(&index) => {
                    if include_station_info {
                        let added = merged.listings[index].merge_stations(&listing.stations);
                        tracing::debug!(identity = %key, added, "merged duplicate listing");
                    }
                }
                None => {
                    positions.insert(key, merged.listings.len());
                    merged.listings.push(listing);
                }
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomwatch_core::StationDistance;

    fn room(id: &str, station: &str, minutes: &str) -> Listing {
        Listing::new(format!("https://example.com/room/{id}"))
            .with_title(format!("Room {id}"))
            .with_station(StationDistance::from_display(station, format!("Station {station}"), minutes))
    }

    #[test]
    fn test_merge_adds_station_annotations() {
        let merged = merge_listings(
            vec![
                vec![room("1", "A", "5分"), room("2", "A", "7分")],
                vec![room("2", "B", "3分"), room("3", "B", "9分")],
            ],
            true,
        );

        assert_eq!(merged.merged_count(), 3);
        assert_eq!(merged.total_found, 4);
        assert_eq!(merged.duplicate_count(), 1);

        let shared = &merged.listings[1];
        let stations: Vec<_> = shared.stations.iter().map(|s| (s.station_id.as_str(), s.distance)).collect();
        assert_eq!(stations, vec![("A", Some(7)), ("B", Some(3))]);
    }

    #[test]
    fn test_merge_without_station_info_keeps_first_occurrence() {
        let merged = merge_listings(vec![vec![room("2", "A", "7分")], vec![room("2", "B", "3分")]], false);
        assert_eq!(merged.listings.len(), 1);
        assert_eq!(merged.listings[0].stations.len(), 1);
        assert_eq!(merged.listings[0].stations[0].station_id, "A");
    }

    #[test]
    fn test_merge_drops_listings_without_identity() {
        let nameless = Listing::default().with_title("No link");
        let merged = merge_listings(vec![vec![nameless, room("1", "A", "5分")]], true);
        assert_eq!(merged.listings.len(), 1);
        assert_eq!(merged.dropped_count, 1);
        assert_eq!(merged.total_found, 1);
        assert_eq!(merged.duplicate_count(), 0);
    }

    #[test]
    fn test_source_id_wins_over_link() {
        let a = Listing::new("https://example.com/room/1?ref=a").with_source_id("r-1");
        let b = Listing::new("https://example.com/other").with_source_id("r-1");
        let merged = merge_listings(vec![vec![a], vec![b]], true);
        assert_eq!(merged.listings.len(), 1);
    }
}
