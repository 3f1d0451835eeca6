//! Cursor-paginated bulk reads of query identities.
//!
//! Pages are ordered by identity key and the last key of each page is the
//! next cursor, so peak memory per round trip is bounded by `page_size`
//! regardless of how many listings a query has accumulated.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_rusqlite::params;

use super::connection::{CachedValue, IdentitySet, Store};
use crate::Error;

/// Result of walking every identity page of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityPages {
    /// Identity keys in ascending order.
    pub identities: Vec<String>,
    /// Non-empty pages fetched.
    pub pages: usize,
}

pub(crate) fn identity_cache_key(query_id: &str) -> String {
    format!("query-identities:{query_id}")
}

impl Store {
    /// Fetch one page of identities strictly after `cursor`.
    pub async fn identity_page(
        &self, query_id: &str, cursor: Option<&str>, limit: usize,
    ) -> Result<Vec<String>, Error> {
        let query_id = query_id.to_string();
        let cursor = cursor.unwrap_or_default().to_string();
        let limit = limit as i64;

        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT identity_key FROM query_listings
                    WHERE query_id = ?1 AND identity_key > ?2
                    ORDER BY identity_key
                    LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![query_id, cursor, limit], |row| row.get(0))?;
                rows.collect::<Result<Vec<String>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }

    /// Walk all identity pages of a query with the configured page size.
    ///
    /// Stops as soon as a page comes back shorter than the page size.
    pub async fn identity_pages(&self, query_id: &str) -> Result<IdentityPages, Error> {
        let page_size = self.config.page_size;
        let mut result = IdentityPages::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.identity_page(query_id, cursor.as_deref(), page_size).await?;
            let short = page.len() < page_size;

            if let Some(last) = page.last() {
                cursor = Some(last.clone());
                result.pages += 1;
                result.identities.extend(page);
            }

            if short {
                break;
            }
        }

        tracing::debug!(query_id, pages = result.pages, rows = result.identities.len(), "paginated identities");
        Ok(result)
    }

    /// Identity keys associated with a query, served through the lookup cache.
    pub async fn existing_identities_for_query(&self, query_id: &str) -> Result<IdentitySet, Error> {
        let ttl = self.config.cache_ttl;
        self.get_cached_or_compute(&identity_cache_key(query_id), ttl, || async {
            let pages = self.identity_pages(query_id).await?;
            Ok(pages.identities.into_iter().collect::<HashSet<String>>())
        })
        .await
    }

    /// Return the value cached under `key`, computing it on a miss or once `ttl` has passed.
    ///
    /// Any value type can be cached. A hit holding a different type than `T`
    /// counts as a miss and is replaced.
    pub async fn get_cached_or_compute<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if let Some(hit) = self.lookup_cache.get(key, ttl).await {
            match hit.downcast::<T>() {
                Ok(value) => {
                    tracing::debug!(key, "lookup cache hit");
                    return Ok(value);
                }
                Err(_) => tracing::warn!(key, "cached value has another type, recomputing"),
            }
        }

        let value = Arc::new(compute().await?);
        self.lookup_cache.insert(key, value.clone() as CachedValue).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Listing;
    use crate::store::{SessionOptions, StoreConfig};

    async fn seeded(rows: u32, page_size: usize) -> (Store, String) {
        let config = StoreConfig { page_size, batch_size: 8, ..Default::default() };
        let db = Store::open_in_memory(config).await.unwrap();
        let listings: Vec<_> = (0..rows)
            .map(|n| Listing::new(format!("https://example.com/room/{n:04}")).with_title(format!("Room {n}")))
            .collect();
        let summary = db
            .save("https://example.com/list?ek=001", &listings, &SessionOptions::default())
            .await
            .unwrap();
        (db, summary.query_id)
    }

    #[tokio::test]
    async fn test_pages_cover_all_rows_without_duplicates() {
        let (db, query_id) = seeded(23, 5).await;
        let result = db.identity_pages(&query_id).await.unwrap();

        assert_eq!(result.pages, 5);
        assert_eq!(result.identities.len(), 23);
        let unique: HashSet<_> = result.identities.iter().collect();
        assert_eq!(unique.len(), 23);
        assert!(result.identities.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_exact_multiple_of_page_size() {
        let (db, query_id) = seeded(10, 5).await;
        let result = db.identity_pages(&query_id).await.unwrap();
        assert_eq!(result.pages, 2);
        assert_eq!(result.identities.len(), 10);
    }

    #[tokio::test]
    async fn test_unknown_query_has_no_pages() {
        let db = Store::open_in_memory(StoreConfig::default()).await.unwrap();
        let result = db.identity_pages("missing").await.unwrap();
        assert_eq!(result, IdentityPages::default());
    }

    #[tokio::test]
    async fn test_cached_lookup_matches_fresh_computation() {
        let (db, query_id) = seeded(7, 3).await;
        let cached = db.existing_identities_for_query(&query_id).await.unwrap();
        let fresh: HashSet<String> = db.identity_pages(&query_id).await.unwrap().identities.into_iter().collect();
        assert_eq!(*cached, fresh);
        assert_eq!(db.lookup_cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_cached_or_compute_respects_ttl() {
        let db = Store::open_in_memory(StoreConfig::default()).await.unwrap();
        let ttl = Duration::from_millis(40);
        let one = || async { Ok(HashSet::from(["a".to_string()])) };
        let two = || async { Ok(HashSet::from(["b".to_string()])) };

        assert!(db.get_cached_or_compute("k", ttl, one).await.unwrap().contains("a"));
        assert!(db.get_cached_or_compute("k", ttl, two).await.unwrap().contains("a"));

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(db.get_cached_or_compute("k", ttl, two).await.unwrap().contains("b"));
    }

    #[tokio::test]
    async fn test_get_cached_or_compute_any_value_type() {
        let db = Store::open_in_memory(StoreConfig::default()).await.unwrap();
        let ttl = Duration::from_secs(60);

        let count = db.get_cached_or_compute("count", ttl, || async { Ok(42u64) }).await.unwrap();
        assert_eq!(*count, 42);
        let cached = db.get_cached_or_compute("count", ttl, || async { Ok(7u64) }).await.unwrap();
        assert_eq!(*cached, 42);

        let name = db
            .get_cached_or_compute("count", ttl, || async { Ok("forty-two".to_string()) })
            .await
            .unwrap();
        assert_eq!(name.as_str(), "forty-two");
        assert_eq!(db.lookup_cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let db = Store::open_in_memory(StoreConfig::default()).await.unwrap();
        let ttl = Duration::from_secs(60);

        let failed = db
            .get_cached_or_compute("k", ttl, || async { Err::<u32, _>(Error::InvalidInput("boom".into())) })
            .await;
        assert!(failed.is_err());
        assert!(db.lookup_cache.is_empty().await);
    }
}
