//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use std::any::Any;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio_rusqlite::Connection;

use super::lookup_cache::LookupCache;
use super::{StoreConfig, migrations};
use crate::Error;

/// Identity sets cached per query.
pub type IdentitySet = Arc<HashSet<String>>;

/// Type-erased value held by the store's lookup cache.
pub(crate) type CachedValue = Arc<dyn Any + Send + Sync>;

/// Persistence engine handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations on a
/// background thread, plus the in-process lookup cache shared by clones.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Connection,
    pub(crate) config: StoreConfig,
    pub(crate) lookup_cache: Arc<LookupCache<CachedValue>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Store {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, config).await
    }

    /// Open an in-memory database for testing.
    ///
    /// Creates a temporary in-memory SQLite database with the same
    /// pragma configuration as file-based databases.
    pub async fn open_in_memory(config: StoreConfig) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, config).await
    }

    async fn init(conn: Connection, config: StoreConfig) -> Result<Self, Error> {
        config.validate()?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;
                 PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        let lookup_cache = Arc::new(LookupCache::new(config.cache_max_entries, config.cache_ttl));
        Ok(Self { conn, config, lookup_cache })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Close the underlying connection. Subsequent calls fail as backend-unavailable.
    pub async fn close(self) -> Result<(), Error> {
        self.conn.close().await.map_err(Error::from)
    }
}
