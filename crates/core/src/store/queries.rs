//! Search definition (query) records.

use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

use super::connection::Store;
use crate::listing::now_timestamp;
use crate::{Error, facet, identity};

/// A persisted search definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Canonical id derived from the search parameters.
    pub id: String,
    pub url: String,
    pub station_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_crawled_at: Option<String>,
}

impl Store {
    /// Create the query on first sight, otherwise refresh its descriptive fields.
    pub async fn upsert_query(&self, search_url: &str) -> Result<Query, Error> {
        let station_param = &self.config.station_param;
        let id = identity::query_id(search_url, station_param)?;
        let station_ids = facet::station_ids(search_url, station_param)?;
        let station_ids_json = serde_json::to_string(&station_ids)?;
        let url = search_url.trim().to_string();
        let now = now_timestamp();

        let query_id = id.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO queries (id, url, station_ids_json, created_at, updated_at, last_crawled_at)
                    VALUES (?1, ?2, ?3, ?4, ?4, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        url = excluded.url,
                        station_ids_json = excluded.station_ids_json,
                        updated_at = excluded.updated_at,
                        last_crawled_at = excluded.last_crawled_at",
                    params![query_id, url, station_ids_json, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        self.get_query(&id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("query {id} vanished after upsert")))
    }

    /// Get a query by id.
    pub async fn get_query(&self, id: &str) -> Result<Option<Query>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Query>, Error> {
                let result = conn.query_row(
                    "SELECT id, url, station_ids_json, created_at, updated_at, last_crawled_at
                    FROM queries WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    },
                );

                match result {
                    Ok((id, url, station_ids_json, created_at, updated_at, last_crawled_at)) => Ok(Some(Query {
                        id,
                        url,
                        station_ids: serde_json::from_str(&station_ids_json)?,
                        created_at,
                        updated_at,
                        last_crawled_at,
                    })),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }
}
