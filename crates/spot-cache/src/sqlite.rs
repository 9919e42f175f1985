//! SQLite-based store implementation.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{Connection, params};
use spot_core::{
    CacheConfig, Coverage, OfferingType, PriceRecord, PriceStore, Result, SpotError,
    TIMESTAMP_FORMAT, TimeWindow, Zone, config::DEFAULT_TABLE, store::ensure_offering,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, instrument};

/// SQLite-based store for price records.
///
/// All offerings share one table keyed by `(offering, zone, timestamp)`;
/// the offering is always a bound parameter, never part of an identifier.
/// Windows recorded with [`PriceStore::record_synced`] live in a companion
/// `<table>_synced` table. Timestamps are stored as `YYYY-MM-DD HH:MM:SS`
/// text, which orders the same way as the instants themselves.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
    synced_table: String,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path, using the default table.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| SpotError::Storage(e.to_string()))?;
        Self::with_connection(conn, DEFAULT_TABLE)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SpotError::Storage(e.to_string()))?;
        Self::with_connection(conn, DEFAULT_TABLE)
    }

    /// Open the store described by a cache configuration.
    ///
    /// Without a path the database is kept in memory.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] for an invalid table name, or
    /// [`SpotError::Storage`] if the database cannot be opened.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| SpotError::Storage(format!("{}: {e}", parent.display())))?;
                }
                Connection::open(path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| SpotError::Storage(e.to_string()))?;
        Self::with_connection(conn, &config.table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        CacheConfig {
            path: None,
            table: table.to_string(),
        }
        .validate()?;

        let store = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
            synced_table: format!("{table}_synced"),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    offering TEXT NOT NULL,
                    zone TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    price REAL NOT NULL CHECK (price >= 0),
                    PRIMARY KEY (offering, zone, timestamp)
                )",
                self.table
            ),
            [],
        )
        .map_err(|e| SpotError::Storage(e.to_string()))?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    offering TEXT NOT NULL,
                    zone TEXT NOT NULL,
                    window_start TEXT NOT NULL,
                    window_end TEXT NOT NULL,
                    PRIMARY KEY (offering, zone, window_start, window_end)
                )",
                self.synced_table
            ),
            [],
        )
        .map_err(|e| SpotError::Storage(e.to_string()))?;

        debug!("SQLite store schema initialized in {}", self.table);
        Ok(())
    }

    fn format_ts(ts: NaiveDateTime) -> String {
        ts.format(TIMESTAMP_FORMAT).to_string()
    }

    fn parse_ts(s: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|e| SpotError::Parse(format!("Invalid cached timestamp {s:?}: {e}")))
    }

    fn parse_extent(bounds: (Option<String>, Option<String>)) -> Result<Option<Coverage>> {
        match bounds {
            (Some(earliest), Some(latest)) => Ok(Some(Coverage::new(
                Self::parse_ts(&earliest)?,
                Self::parse_ts(&latest)?,
            ))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl PriceStore for SqliteStore {
    #[instrument(skip(self, records), fields(offering = %offering, count = records.len()))]
    async fn upsert_many(&self, offering: &OfferingType, records: &[PriceRecord]) -> Result<usize> {
        ensure_offering(offering, records)?;
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT OR IGNORE INTO {} (offering, zone, timestamp, price)
                     VALUES (?1, ?2, ?3, ?4)",
                    self.table
                ))
                .map_err(|e| SpotError::Storage(e.to_string()))?;

            for record in records {
                inserted += stmt
                    .execute(params![
                        offering.as_str(),
                        record.zone.as_str(),
                        Self::format_ts(record.timestamp),
                        record.price
                    ])
                    .map_err(|e| SpotError::Storage(e.to_string()))?;
            }
        }

        tx.commit().map_err(|e| SpotError::Storage(e.to_string()))?;
        debug!("Inserted {} of {} records", inserted, records.len());
        Ok(inserted)
    }

    #[instrument(skip(self), fields(offering = %offering))]
    async fn zones(&self, offering: &OfferingType) -> Result<BTreeSet<Zone>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT zone FROM {} WHERE offering = ?1",
                self.table
            ))
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![offering.as_str()], |row| row.get::<_, String>(0))
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let mut zones = BTreeSet::new();
        for row in rows {
            zones.insert(Zone::new(row.map_err(|e| SpotError::Storage(e.to_string()))?));
        }
        Ok(zones)
    }

    #[instrument(skip(self), fields(offering = %offering, zone = %zone))]
    async fn coverage(&self, offering: &OfferingType, zone: &Zone) -> Result<Option<Coverage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let bounds = conn
            .query_row(
                &format!(
                    "SELECT MIN(timestamp), MAX(timestamp) FROM {}
                     WHERE offering = ?1 AND zone = ?2",
                    self.table
                ),
                params![offering.as_str(), zone.as_str()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        Self::parse_extent(bounds)
    }

    #[instrument(skip(self), fields(offering = %offering, zone = %zone, window = %window))]
    async fn query_range(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<Vec<PriceRecord>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT timestamp, price FROM {}
                 WHERE offering = ?1 AND zone = ?2 AND timestamp >= ?3 AND timestamp < ?4
                 ORDER BY timestamp ASC",
                self.table
            ))
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![
                    offering.as_str(),
                    zone.as_str(),
                    Self::format_ts(window.start()),
                    Self::format_ts(window.end())
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (ts, price) = row.map_err(|e| SpotError::Storage(e.to_string()))?;
            records.push(PriceRecord {
                offering: offering.clone(),
                zone: zone.clone(),
                timestamp: Self::parse_ts(&ts)?,
                price,
            });
        }

        debug!("Found {} cached records", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(offering = %offering, zone = %zone, window = %window))]
    async fn record_synced(
        &self,
        offering: &OfferingType,
        zone: &Zone,
        window: &TimeWindow,
    ) -> Result<()> {
        if window.is_empty() {
            return Ok(());
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (offering, zone, window_start, window_end)
                 VALUES (?1, ?2, ?3, ?4)",
                self.synced_table
            ),
            params![
                offering.as_str(),
                zone.as_str(),
                Self::format_ts(window.start()),
                Self::format_ts(window.end())
            ],
        )
        .map_err(|e| SpotError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn synced_extent(
        &self,
        offering: &OfferingType,
        zone: &Zone,
    ) -> Result<Option<Coverage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let bounds = conn
            .query_row(
                &format!(
                    "SELECT MIN(window_start), MAX(window_end) FROM {}
                     WHERE offering = ?1 AND zone = ?2",
                    self.synced_table
                ),
                params![offering.as_str(), zone.as_str()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        Self::parse_extent(bounds)
    }

    async fn count(&self, offering: &OfferingType) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE offering = ?1", self.table),
                params![offering.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        usize::try_from(count).map_err(|e| SpotError::Storage(e.to_string()))
    }

    #[instrument(skip(self), fields(offering = %offering))]
    async fn clear(&self, offering: &OfferingType) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SpotError::Storage(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| SpotError::Storage(e.to_string()))?;

        let removed = tx
            .execute(
                &format!("DELETE FROM {} WHERE offering = ?1", self.table),
                params![offering.as_str()],
            )
            .map_err(|e| SpotError::Storage(e.to_string()))?;
        tx.execute(
            &format!("DELETE FROM {} WHERE offering = ?1", self.synced_table),
            params![offering.as_str()],
        )
        .map_err(|e| SpotError::Storage(e.to_string()))?;

        tx.commit().map_err(|e| SpotError::Storage(e.to_string()))?;
        debug!("Cleared {} records", removed);
        Ok(())
    }
}
