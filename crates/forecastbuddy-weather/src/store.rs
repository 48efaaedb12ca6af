//! Forecast persistence keyed by coordinate.
//!
//! `ForecastStore` is the contract the cache manager relies on. Two backends
//! are provided: an in-memory map and a SQLite database on disk.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::types::{Coordinate, ForecastRecord, HourlyEntry, StoreError};

/// Key-value store of forecast records.
///
/// Implementations must be callable from any thread and serialize writes
/// internally. Concurrent writes to one key are last-write-wins.
pub trait ForecastStore: Send + Sync {
    /// Exact-key lookup.
    fn get(&self, coordinate: &Coordinate) -> Result<Option<ForecastRecord>, StoreError>;

    /// Insert or replace the record for `record.coordinate`.
    fn put(&self, record: &ForecastRecord) -> Result<(), StoreError>;

    /// Remove every listed coordinate. Missing keys are ignored.
    fn delete(&self, coordinates: &[Coordinate]) -> Result<(), StoreError>;

    /// All stored records.
    fn list(&self) -> Result<Vec<ForecastRecord>, StoreError>;
}

/// In-memory store, used for tests and as a throwaway cache.
#[derive(Debug, Default)]
pub struct MemoryForecastStore {
    records: RwLock<HashMap<Coordinate, ForecastRecord>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ForecastStore for MemoryForecastStore {
    fn get(&self, coordinate: &Coordinate) -> Result<Option<ForecastRecord>, StoreError> {
        Ok(self.records.read().get(coordinate).cloned())
    }

    fn put(&self, record: &ForecastRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.coordinate, record.clone());
        Ok(())
    }

    fn delete(&self, coordinates: &[Coordinate]) -> Result<(), StoreError> {
        let mut records = self.records.write();
        for coordinate in coordinates {
            records.remove(coordinate);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<ForecastRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}

fn read_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::ReadFailed(e.to_string())
}

fn write_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::WriteFailed(e.to_string())
}

/// Coordinates are keyed by the bit patterns of both components so that
/// lookups stay bit-exact. SQLite integers are signed; the cast is lossless.
fn coordinate_key(coordinate: &Coordinate) -> (i64, i64) {
    (
        coordinate.latitude.to_bits() as i64,
        coordinate.longitude.to_bits() as i64,
    )
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::ReadFailed(format!("bad timestamp {:?}: {}", text, e)))
}

/// Row of the `forecasts` table before hourly entries are attached
struct ForecastRow {
    latitude: f64,
    longitude: f64,
    fetched_at: String,
    icon: String,
    temp_kelvin: f64,
    has_hourly: bool,
}

/// SQLite-backed forecast store.
pub struct SqliteForecastStore {
    conn: Mutex<Connection>,
}

impl SqliteForecastStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS forecasts (
                lat_bits INTEGER NOT NULL,
                lon_bits INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                fetched_at TEXT NOT NULL,
                icon TEXT NOT NULL,
                temp_kelvin REAL NOT NULL,
                has_hourly INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (lat_bits, lon_bits)
            );

            CREATE TABLE IF NOT EXISTS hourly_entries (
                lat_bits INTEGER NOT NULL,
                lon_bits INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                day_bucket INTEGER NOT NULL,
                icon TEXT NOT NULL,
                temp_kelvin REAL NOT NULL,
                description TEXT NOT NULL,
                PRIMARY KEY (lat_bits, lon_bits, seq)
            );
            "#,
        )
    }

    fn load_hourly(
        conn: &Connection,
        key: (i64, i64),
    ) -> Result<Vec<HourlyEntry>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, day_bucket, icon, temp_kelvin, description
                 FROM hourly_entries WHERE lat_bits = ?1 AND lon_bits = ?2 ORDER BY seq",
            )
            .map_err(read_err)?;

        let rows = stmt
            .query_map(params![key.0, key.1], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(read_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (timestamp, day_bucket, icon, temp_kelvin, description) = row.map_err(read_err)?;
            entries.push(HourlyEntry {
                timestamp: parse_time(&timestamp)?,
                day_bucket,
                icon,
                temp_kelvin,
                description,
            });
        }
        Ok(entries)
    }

    fn assemble(conn: &Connection, row: ForecastRow) -> Result<ForecastRecord, StoreError> {
        let coordinate = Coordinate::new(row.latitude, row.longitude);
        let hourly = if row.has_hourly {
            Some(Self::load_hourly(conn, coordinate_key(&coordinate))?)
        } else {
            None
        };

        Ok(ForecastRecord {
            coordinate,
            fetched_at: parse_time(&row.fetched_at)?,
            current_condition_icon: row.icon,
            current_condition_temp_kelvin: row.temp_kelvin,
            hourly,
        })
    }

    fn map_forecast_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ForecastRow> {
        Ok(ForecastRow {
            latitude: row.get(0)?,
            longitude: row.get(1)?,
            fetched_at: row.get(2)?,
            icon: row.get(3)?,
            temp_kelvin: row.get(4)?,
            has_hourly: row.get::<_, i32>(5)? != 0,
        })
    }
}

impl ForecastStore for SqliteForecastStore {
    fn get(&self, coordinate: &Coordinate) -> Result<Option<ForecastRecord>, StoreError> {
        let conn = self.conn.lock();
        let key = coordinate_key(coordinate);

        let row = conn
            .query_row(
                "SELECT latitude, longitude, fetched_at, icon, temp_kelvin, has_hourly
                 FROM forecasts WHERE lat_bits = ?1 AND lon_bits = ?2",
                params![key.0, key.1],
                Self::map_forecast_row,
            )
            .optional()
            .map_err(read_err)?;

        row.map(|row| Self::assemble(&conn, row)).transpose()
    }

    fn put(&self, record: &ForecastRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let key = coordinate_key(&record.coordinate);
        let tx = conn.transaction().map_err(write_err)?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO forecasts
            (lat_bits, lon_bits, latitude, longitude, fetched_at, icon, temp_kelvin, has_hourly)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                key.0,
                key.1,
                record.coordinate.latitude,
                record.coordinate.longitude,
                format_time(&record.fetched_at),
                record.current_condition_icon,
                record.current_condition_temp_kelvin,
                record.hourly.is_some() as i32,
            ],
        )
        .map_err(write_err)?;

        tx.execute(
            "DELETE FROM hourly_entries WHERE lat_bits = ?1 AND lon_bits = ?2",
            params![key.0, key.1],
        )
        .map_err(write_err)?;

        if let Some(hourly) = &record.hourly {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO hourly_entries
                    (lat_bits, lon_bits, seq, timestamp, day_bucket, icon, temp_kelvin, description)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                )
                .map_err(write_err)?;

            for (seq, entry) in hourly.iter().enumerate() {
                stmt.execute(params![
                    key.0,
                    key.1,
                    seq as i64,
                    format_time(&entry.timestamp),
                    entry.day_bucket,
                    entry.icon,
                    entry.temp_kelvin,
                    entry.description,
                ])
                .map_err(write_err)?;
            }
        }

        tx.commit().map_err(write_err)
    }

    fn delete(&self, coordinates: &[Coordinate]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err)?;

        for coordinate in coordinates {
            let key = coordinate_key(coordinate);
            tx.execute(
                "DELETE FROM hourly_entries WHERE lat_bits = ?1 AND lon_bits = ?2",
                params![key.0, key.1],
            )
            .map_err(write_err)?;
            tx.execute(
                "DELETE FROM forecasts WHERE lat_bits = ?1 AND lon_bits = ?2",
                params![key.0, key.1],
            )
            .map_err(write_err)?;
        }

        tx.commit().map_err(write_err)
    }

    fn list(&self) -> Result<Vec<ForecastRecord>, StoreError> {
        let conn = self.conn.lock();
        let rows = {
            let mut stmt = conn
                .prepare(
                    "SELECT latitude, longitude, fetched_at, icon, temp_kelvin, has_hourly
                     FROM forecasts ORDER BY fetched_at DESC",
                )
                .map_err(read_err)?;
            let rows = stmt
                .query_map([], Self::map_forecast_row)
                .map_err(read_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(read_err)?
        };

        rows.into_iter()
            .map(|row| Self::assemble(&conn, row))
            .collect()
    }
}
