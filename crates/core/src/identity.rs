//! Stable identity keys for listings and search definitions.
//!
//! Both keys must survive re-crawls: a listing seen under two stations, or a
//! search URL whose parameters arrive in a different order, maps to the same
//! key every run.

use sha2::{Digest, Sha256};
use url::Url;

use crate::Error;
use crate::listing::Listing;

/// Derive the identity key of a listing.
///
/// A source id wins when present (`id:<source_id>`); otherwise the canonical
/// link is used (`url:<link>`). Returns `None` when neither is usable.
pub fn identity_key(listing: &Listing) -> Option<String> {
    if let Some(id) = listing.source_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return Some(format!("id:{id}"));
    }

    let link = listing.link.as_deref()?;
    canonicalize_link(link).ok().map(|url| format!("url:{url}"))
}

/// Query parameters that never distinguish one listing from another.
///
/// `ek` is the station facet: the same detail page is linked from every
/// station it appears under.
const IGNORED_LINK_PARAMS: &[&str] = &["ek", "fbclid", "gclid", "yclid", "ref", "_ga"];

fn is_ignored_link_param(key: &str) -> bool {
    key.starts_with("utm_") || IGNORED_LINK_PARAMS.contains(&key)
}

/// Canonicalize a listing link.
///
/// Normalization steps:
/// 1. Trim whitespace, default the scheme to https
/// 2. Lowercase the host, drop the fragment
/// 3. Drop the station facet and tracking parameters, sort the remaining pairs
/// 4. Strip the trailing slash of the path
pub fn canonicalize_link(input: &str) -> Result<String, Error> {
    let mut url = parse_http_url(input)?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_ignored_link_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs.dedup();

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    if pairs.is_empty() {
        url.set_query(None);
        return Ok(url.as_str().trim_end_matches('/').to_string());
    }

    url.query_pairs_mut().clear().extend_pairs(&pairs);
    Ok(url.to_string())
}

/// Canonical id of a search definition.
///
/// Query pairs are sorted and empty values dropped; the station parameter is
/// split on commas, de-duplicated and sorted so that
/// `?ek=2&ek=1` and `?ek=1,2` describe the same search.
pub fn query_id(search_url: &str, station_param: &str) -> Result<String, Error> {
    let url = parse_http_url(search_url)?;

    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == station_param {
            pairs.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v.to_string())),
            );
        } else if !value.trim().is_empty() {
            pairs.push((key.to_string(), value.trim().to_string()));
        }
    }
    pairs.sort();
    pairs.dedup();

    let mut hasher = Sha256::new();
    hasher.update(url.scheme().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.host_str().unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.path().trim_end_matches('/').as_bytes());
    for (key, value) in &pairs {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn parse_http_url(input: &str) -> Result<Url, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty URL".into()));
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut parsed = Url::parse(&url_str).map_err(|e| Error::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(Error::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed
            .set_host(Some(&host))
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_wins() {
        let listing = Listing::new("https://example.com/room/1").with_source_id(" 100234 ");
        assert_eq!(identity_key(&listing).as_deref(), Some("id:100234"));
    }

    #[test]
    fn test_link_identity_ignores_facet_fragment_and_case() {
        let a = Listing::new("https://EXAMPLE.com/room/1/?ek=001#photos");
        let b = Listing::new(" https://example.com/room/1?ek=002&utm_source=mail ");
        assert_eq!(identity_key(&a), identity_key(&b));
        assert_eq!(identity_key(&a).as_deref(), Some("url:https://example.com/room/1"));
    }

    #[test]
    fn test_link_identity_keeps_id_parameters() {
        let one = Listing::new("https://example.com/detail.php?id=1");
        let two = Listing::new("https://example.com/detail.php?id=2");
        assert_ne!(identity_key(&one), identity_key(&two));
        assert_eq!(identity_key(&one).as_deref(), Some("url:https://example.com/detail.php?id=1"));
    }

    #[test]
    fn test_link_query_pairs_sorted() {
        let a = canonicalize_link("https://example.com/detail.php?id=7&bc=100&ek=001").unwrap();
        let b = canonicalize_link("https://example.com/detail.php/?bc=100&gclid=x&id=7").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "https://example.com/detail.php?bc=100&id=7");
    }

    #[test]
    fn test_missing_identity() {
        assert_eq!(identity_key(&Listing::default()), None);
        let bad = Listing { link: Some("ftp://example.com/x".into()), ..Default::default() };
        assert_eq!(identity_key(&bad), None);
    }

    #[test]
    fn test_query_id_order_independent() {
        let a = query_id("https://example.com/search?ar=030&ek=001&ek=002", "ek").unwrap();
        let b = query_id("https://EXAMPLE.com/search/?ek=002,001&ar=030", "ek").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_query_id_distinguishes_stations() {
        let a = query_id("https://example.com/search?ek=001", "ek").unwrap();
        let b = query_id("https://example.com/search?ek=002", "ek").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_query_id_rejects_bad_url() {
        assert!(matches!(query_id("   ", "ek"), Err(Error::InvalidUrl(_))));
        assert!(matches!(query_id("file:///etc/passwd", "ek"), Err(Error::InvalidUrl(_))));
    }
}
