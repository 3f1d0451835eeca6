//! Listing and station distance rows.
//!
//! The synchronous helpers run inside batch transactions; the async methods
//! on [`Store`] are read paths and maintenance.

use tokio_rusqlite::{params, rusqlite};

use super::connection::Store;
use crate::Error;
use crate::listing::{Listing, StationDistance, StoredListing};

const LISTING_COLUMNS: &str = "identity_key, source_id, link, title, category, layout,
    tags_json, images_json, content_hash, first_seen_at, last_seen_at, active";

pub(crate) fn load_snapshot(conn: &rusqlite::Connection, identity: &str) -> Result<Option<StoredListing>, Error> {
    let result = conn.query_row(
        &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE identity_key = ?1"),
        params![identity],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                Listing {
                    source_id: row.get(1)?,
                    link: row.get(2)?,
                    title: row.get(3)?,
                    category: row.get(4)?,
                    layout: row.get(5)?,
                    stations: Vec::new(),
                    tags: Vec::new(),
                    images: Vec::new(),
                },
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, i32>(11)? == 1,
            ))
        },
    );

    let (identity, mut listing, tags_json, images_json, content_hash, first_seen_at, last_seen_at, active) =
        match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

    listing.tags = serde_json::from_str(&tags_json)?;
    listing.images = serde_json::from_str(&images_json)?;
    listing.stations = load_stations(conn, &identity)?;

    Ok(Some(StoredListing { identity, listing, content_hash, first_seen_at, last_seen_at, active }))
}

pub(crate) fn load_stations(conn: &rusqlite::Connection, identity: &str) -> Result<Vec<StationDistance>, Error> {
    let mut stmt = conn.prepare(
        "SELECT station_id, station_name, distance, raw_text FROM station_distances
        WHERE identity_key = ?1 ORDER BY station_id, station_name",
    )?;
    let rows = stmt.query_map(params![identity], |row| {
        Ok(StationDistance {
            station_id: row.get(0)?,
            station_name: row.get(1)?,
            distance: row.get(2)?,
            raw_text: row.get(3)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
}

pub(crate) fn insert_listing(
    conn: &rusqlite::Connection, identity: &str, listing: &Listing, hash: &str, now: &str,
) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO listings (
            identity_key, source_id, link, title, category, layout,
            tags_json, images_json, content_hash, first_seen_at, last_seen_at, active
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, 1)",
        params![
            identity,
            &listing.source_id,
            &listing.link,
            &listing.title,
            &listing.category,
            &listing.layout,
            serde_json::to_string(&listing.tags)?,
            serde_json::to_string(&listing.images)?,
            hash,
            now,
        ],
    )?;
    write_stations(conn, identity, &listing.stations, now)
}

/// Full field update with hash refresh; reactivates the listing.
pub(crate) fn update_listing(
    conn: &rusqlite::Connection, identity: &str, listing: &Listing, hash: &str, now: &str,
) -> Result<(), Error> {
    conn.execute(
        "UPDATE listings SET
            source_id = ?2, link = ?3, title = ?4, category = ?5, layout = ?6,
            tags_json = ?7, images_json = ?8, content_hash = ?9,
            last_seen_at = MAX(last_seen_at, ?10), active = 1
        WHERE identity_key = ?1",
        params![
            identity,
            &listing.source_id,
            &listing.link,
            &listing.title,
            &listing.category,
            &listing.layout,
            serde_json::to_string(&listing.tags)?,
            serde_json::to_string(&listing.images)?,
            hash,
            now,
        ],
    )?;
    write_stations(conn, identity, &listing.stations, now)
}

/// Cheap presence update for unchanged listings.
pub(crate) fn touch_listing(conn: &rusqlite::Connection, identity: &str, now: &str) -> Result<(), Error> {
    conn.execute(
        "UPDATE listings SET last_seen_at = MAX(last_seen_at, ?2), active = 1 WHERE identity_key = ?1",
        params![identity, now],
    )?;
    Ok(())
}

/// Upsert the given station rows.
///
/// Rows for stations the listing was not reported under this time are kept:
/// a station missing from one run usually means its fetch failed.
pub(crate) fn write_stations(
    conn: &rusqlite::Connection, identity: &str, stations: &[StationDistance], now: &str,
) -> Result<(), Error> {
    for station in stations {
        conn.execute(
            "INSERT INTO station_distances (identity_key, station_id, station_name, distance, raw_text, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(identity_key, station_id, station_name) DO UPDATE SET
                distance = excluded.distance,
                raw_text = excluded.raw_text,
                updated_at = excluded.updated_at",
            params![identity, &station.station_id, &station.station_name, station.distance, &station.raw_text, now],
        )?;
    }
    Ok(())
}

impl Store {
    /// Get a stored listing, with its station distances, by identity key.
    pub async fn get_listing(&self, identity: &str) -> Result<Option<StoredListing>, Error> {
        let identity = identity.to_string();
        self.conn
            .call(move |conn| load_snapshot(conn, &identity))
            .await
            .map_err(Error::from)
    }

    /// Station distance rows of a listing, ordered by station id then name.
    pub async fn station_distances(&self, identity: &str) -> Result<Vec<StationDistance>, Error> {
        let identity = identity.to_string();
        self.conn
            .call(move |conn| load_stations(conn, &identity))
            .await
            .map_err(Error::from)
    }

    /// Deactivate listings not seen since `cutoff` (an RFC 3339 timestamp).
    ///
    /// Listings are never deleted. Returns the number of rows deactivated.
    pub async fn deactivate_stale(&self, cutoff: &str) -> Result<u64, Error> {
        let cutoff = cutoff.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "UPDATE listings SET active = 0 WHERE active = 1 AND last_seen_at < ?1",
                    params![cutoff],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
