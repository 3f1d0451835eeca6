//! Crawl sessions and the query/session association rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

use super::connection::Store;
use crate::Error;
use crate::listing::now_timestamp;

/// How the downstream notifier should treat listings first seen in a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// Record only; nothing is announced.
    Off,
    /// Announce without alerting.
    #[default]
    Silent,
    /// Announce with an alert.
    Loud,
}

impl NotifyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyMode::Off => "off",
            NotifyMode::Silent => "silent",
            NotifyMode::Loud => "loud",
        }
    }
}

impl fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(NotifyMode::Off),
            "silent" => Ok(NotifyMode::Silent),
            "loud" => Ok(NotifyMode::Loud),
            other => Err(Error::InvalidInput(format!("unknown notify mode: {other}"))),
        }
    }
}

/// Run options recorded on the session row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub notify_mode: NotifyMode,
    /// Whether the crawl fanned out over several stations.
    #[serde(default)]
    pub multi_station: bool,
    #[serde(default)]
    pub station_ids: Vec<String>,
}

impl SessionOptions {
    pub fn new(notify_mode: NotifyMode) -> Self {
        Self { notify_mode, ..Default::default() }
    }
}

/// One pipeline execution against one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSession {
    pub id: i64,
    pub query_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub options: SessionOptions,
    /// Number of participation rows.
    pub total_count: i64,
    /// Participation rows flagged `was_new`.
    pub new_count: i64,
}

/// Association of a listing with a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryListing {
    pub query_id: String,
    pub identity: String,
    pub first_appeared_at: String,
    pub last_appeared_at: String,
    pub notified: bool,
    pub notified_at: Option<String>,
}

/// Participation of a listing in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionListing {
    pub session_id: i64,
    pub identity: String,
    pub was_new: bool,
    pub was_notified: bool,
}

/// Upsert the query association. Returns true when the listing is new to the query.
///
/// `last_appeared_at` only ever moves forward.
pub(crate) fn record_query_listing(
    conn: &rusqlite::Connection, query_id: &str, identity: &str, now: &str,
) -> Result<bool, Error> {
    let existed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM query_listings WHERE query_id = ?1 AND identity_key = ?2)",
        params![query_id, identity],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO query_listings (query_id, identity_key, first_appeared_at, last_appeared_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT(query_id, identity_key) DO UPDATE SET
            last_appeared_at = MAX(query_listings.last_appeared_at, excluded.last_appeared_at)",
        params![query_id, identity, now],
    )?;

    Ok(!existed)
}

pub(crate) fn record_session_listing(
    conn: &rusqlite::Connection, session_id: i64, identity: &str, was_new: bool, was_notified: bool,
) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO session_listings (session_id, identity_key, was_new, was_notified)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(session_id, identity_key) DO UPDATE SET
            was_new = MAX(session_listings.was_new, excluded.was_new),
            was_notified = MAX(session_listings.was_notified, excluded.was_notified)",
        params![session_id, identity, was_new as i32, was_notified as i32],
    )?;
    Ok(())
}

impl Store {
    /// Open a session row for a query.
    pub async fn create_session(&self, query_id: &str, options: &SessionOptions) -> Result<i64, Error> {
        let query_id = query_id.to_string();
        let notify_mode = options.notify_mode.as_str();
        let options_json = serde_json::to_string(options)?;
        let now = now_timestamp();

        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO crawl_sessions (query_id, started_at, notify_mode, options_json)
                    VALUES (?1, ?2, ?3, ?4)",
                    params![query_id, now, notify_mode, options_json],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// Close a session, deriving its counts from the participation rows.
    pub async fn finish_session(&self, session_id: i64) -> Result<(), Error> {
        let now = now_timestamp();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE crawl_sessions SET
                        finished_at = ?2,
                        total_count = (SELECT COUNT(*) FROM session_listings WHERE session_id = ?1),
                        new_count = (SELECT COUNT(*) FROM session_listings WHERE session_id = ?1 AND was_new = 1)
                    WHERE id = ?1",
                    params![session_id, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<CrawlSession>, Error> {
        self.conn
            .call(move |conn| -> Result<Option<CrawlSession>, Error> {
                let result = conn.query_row(
                    "SELECT id, query_id, started_at, finished_at, options_json, total_count, new_count
                    FROM crawl_sessions WHERE id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    },
                );

                match result {
                    Ok((id, query_id, started_at, finished_at, options_json, total_count, new_count)) => {
                        Ok(Some(CrawlSession {
                            id,
                            query_id,
                            started_at,
                            finished_at,
                            options: serde_json::from_str(&options_json)?,
                            total_count,
                            new_count,
                        }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Participation rows of a session, ordered by identity.
    pub async fn session_listings(&self, session_id: i64) -> Result<Vec<SessionListing>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<SessionListing>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT session_id, identity_key, was_new, was_notified FROM session_listings
                    WHERE session_id = ?1 ORDER BY identity_key",
                )?;
                let rows = stmt.query_map(params![session_id], |row| {
                    Ok(SessionListing {
                        session_id: row.get(0)?,
                        identity: row.get(1)?,
                        was_new: row.get::<_, i32>(2)? == 1,
                        was_notified: row.get::<_, i32>(3)? == 1,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn query_listing(&self, query_id: &str, identity: &str) -> Result<Option<QueryListing>, Error> {
        let query_id = query_id.to_string();
        let identity = identity.to_string();
        self.conn
            .call(move |conn| -> Result<Option<QueryListing>, Error> {
                let result = conn.query_row(
                    "SELECT query_id, identity_key, first_appeared_at, last_appeared_at, notified, notified_at
                    FROM query_listings WHERE query_id = ?1 AND identity_key = ?2",
                    params![query_id, identity],
                    map_query_listing,
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Query associations the notifier has not announced yet, oldest first.
    pub async fn pending_notifications(&self, query_id: &str) -> Result<Vec<QueryListing>, Error> {
        let query_id = query_id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<QueryListing>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT query_id, identity_key, first_appeared_at, last_appeared_at, notified, notified_at
                    FROM query_listings WHERE query_id = ?1 AND notified = 0
                    ORDER BY first_appeared_at, identity_key",
                )?;
                let rows = stmt.query_map(params![query_id], map_query_listing)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }

    /// Mark query associations as announced. Returns the number of rows updated.
    pub async fn mark_notified(&self, query_id: &str, identities: &[String]) -> Result<u64, Error> {
        let query_id = query_id.to_string();
        let identities = identities.to_vec();
        let now = now_timestamp();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut updated = 0;
                for identity in &identities {
                    updated += tx.execute(
                        "UPDATE query_listings SET notified = 1, notified_at = ?3
                        WHERE query_id = ?1 AND identity_key = ?2 AND notified = 0",
                        params![query_id, identity, now],
                    )?;
                }
                tx.commit()?;
                Ok(updated as u64)
            })
            .await
            .map_err(Error::from)
    }
}

fn map_query_listing(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryListing> {
    Ok(QueryListing {
        query_id: row.get(0)?,
        identity: row.get(1)?,
        first_appeared_at: row.get(2)?,
        last_appeared_at: row.get(3)?,
        notified: row.get::<_, i32>(4)? == 1,
        notified_at: row.get(5)?,
    })
}
