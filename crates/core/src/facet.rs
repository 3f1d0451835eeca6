//! Station facet handling for search URLs.
//!
//! A search URL targets one or more stations through a single query
//! parameter, either repeated (`?ek=1&ek=2`) or comma-joined (`?ek=1,2`).

use url::Url;

use crate::Error;
use crate::identity::parse_http_url;

/// Station ids named by a search URL, in first-seen order without duplicates.
pub fn station_ids(search_url: &str, station_param: &str) -> Result<Vec<String>, Error> {
    let url = parse_http_url(search_url)?;
    Ok(station_ids_of(&url, station_param))
}

fn station_ids_of(url: &Url, station_param: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for (_, value) in url.query_pairs().filter(|(key, _)| key == station_param) {
        for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Rewrite a search URL so it targets exactly one station.
///
/// Every other query pair keeps its position; the station parameter is
/// emitted once, where it first appeared.
pub fn single_station_url(search_url: &str, station_param: &str, station_id: &str) -> Result<String, Error> {
    let mut url = parse_http_url(search_url)?;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        let mut emitted = false;
        for (key, value) in &pairs {
            if key == station_param {
                if !emitted {
                    query.append_pair(key, station_id);
                    emitted = true;
                }
            } else {
                query.append_pair(key, value);
            }
        }
        if !emitted {
            query.append_pair(station_param, station_id);
        }
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_parameter() {
        let ids = station_ids("https://example.com/list?ar=030&ek=001&ek=002", "ek").unwrap();
        assert_eq!(ids, vec!["001", "002"]);
    }

    #[test]
    fn test_comma_joined_parameter() {
        let ids = station_ids("https://example.com/list?ek=001,002,%20003", "ek").unwrap();
        assert_eq!(ids, vec!["001", "002", "003"]);
    }

    #[test]
    fn test_mixed_and_duplicate_ids() {
        let ids = station_ids("https://example.com/list?ek=001,002&ek=002&ek=004", "ek").unwrap();
        assert_eq!(ids, vec!["001", "002", "004"]);
    }

    #[test]
    fn test_no_station_parameter() {
        let ids = station_ids("https://example.com/list?ar=030", "ek").unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_single_station_url_keeps_other_pairs() {
        let url = single_station_url("https://example.com/list?ar=030&ek=001&ek=002&rn=0005", "ek", "002").unwrap();
        assert_eq!(url, "https://example.com/list?ar=030&ek=002&rn=0005");
    }

    #[test]
    fn test_single_station_url_from_comma_list() {
        let url = single_station_url("https://example.com/list?ek=001,002", "ek", "001").unwrap();
        assert_eq!(station_ids(&url, "ek").unwrap(), vec!["001"]);
    }
}
