//! ==============================================================================
//! store.rs - append-only reading persistence
//! ==============================================================================
//!
//! purpose:
//!     the persistence capability used by sessions (insert) and by the
//!     aggregation/read api (scan, count, latest).
//!
//! backend:
//!     SqliteStore keeps one `readings` table indexed on `timestamp`.
//!     - on disk: WAL journal, so a crash mid-insert rolls back on reopen
//!       and never leaves half a reading behind
//!     - in memory: same schema, gone on restart
//!
//! timestamps are stored as utc nanoseconds since the epoch. rows with the
//! same timestamp keep insertion order through the rowid.
//!
//! the trait is sync. callers on the async runtime go through
//! spawn_blocking so a slow disk never stalls the accept loop.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{info, warn};

use crate::config::{StoreBackend, StoreConfig};
use crate::domain::Reading;
use crate::error::StoreError;

pub trait ReadingStore: Send + Sync {
    /// append one reading; it is either fully written or not at all
    fn insert(&self, reading: Reading) -> Result<(), StoreError>;

    /// readings with timestamp >= threshold, oldest first, insertion order on ties
    fn scan_since(&self, threshold: DateTime<Utc>) -> Result<Vec<Reading>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// most recent reading by timestamp, later insert wins a tie
    fn latest(&self) -> Result<Option<Reading>, StoreError>;
}

pub type SharedStore = Arc<dyn ReadingStore>;

const READINGS_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS readings (
    id           INTEGER PRIMARY KEY,
    temperature  REAL    NOT NULL,
    humidity     REAL    NOT NULL,
    timestamp    INTEGER NOT NULL,
    client_ip    TEXT    NOT NULL,
    client_port  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS readings_timestamp ON readings (timestamp);
";

const SELECT_READING: &str =
    "SELECT temperature, humidity, timestamp, client_ip, client_port FROM readings";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// open (or create) the database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(READINGS_SCHEMA)?;

        Ok(Self { conn: Mutex::new(conn), path: Some(path) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(READINGS_SCHEMA)?;

        Ok(Self { conn: Mutex::new(conn), path: None })
    }

    /// database file, None for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn to_nanos(timestamp: &DateTime<Utc>) -> Result<i64, StoreError> {
    timestamp
        .timestamp_nanos_opt()
        .ok_or(StoreError::TimestampOutOfRange(*timestamp))
}

/// thresholds outside the representable range clamp to the ends
fn threshold_nanos(threshold: &DateTime<Utc>) -> i64 {
    match threshold.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if threshold.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

fn row_to_reading(row: &Row<'_>) -> rusqlite::Result<Reading> {
    Ok(Reading {
        temperature: row.get(0)?,
        humidity: row.get(1)?,
        timestamp: DateTime::from_timestamp_nanos(row.get(2)?),
        client_ip: row.get(3)?,
        client_port: row.get(4)?,
    })
}

impl ReadingStore for SqliteStore {
    fn insert(&self, reading: Reading) -> Result<(), StoreError> {
        let timestamp = to_nanos(&reading.timestamp)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO readings (temperature, humidity, timestamp, client_ip, client_port) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reading.temperature,
                reading.humidity,
                timestamp,
                reading.client_ip,
                reading.client_port,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn scan_since(&self, threshold: DateTime<Utc>) -> Result<Vec<Reading>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE timestamp >= ?1 ORDER BY timestamp, id",
            SELECT_READING
        ))?;

        let rows = stmt.query_map(params![threshold_nanos(&threshold)], row_to_reading)?;

        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        Ok(readings)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.lock()?
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} ORDER BY timestamp DESC, id DESC LIMIT 1",
            SELECT_READING
        ))?;

        let mut rows = stmt.query_map([], row_to_reading)?;
        let latest = rows.next().transpose()?;
        Ok(latest)
    }
}

/// build the configured backend
///
/// returns None when persistence is disabled or the backend cannot be
/// opened. ingestion then runs without saving.
pub fn open_store(config: &StoreConfig) -> Option<SharedStore> {
    let opened = match config.backend {
        StoreBackend::None => {
            warn!("store disabled, readings will not be persisted");
            return None;
        }
        StoreBackend::Memory => SqliteStore::open_in_memory(),
        StoreBackend::Sqlite => SqliteStore::open(&config.path),
    };

    match opened {
        Ok(store) => {
            info!(
                backend = ?config.backend,
                readings = store.count().unwrap_or(0),
                "opened reading store"
            );
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!(
                path = %config.path.display(),
                error = %e,
                "could not open reading store, running without persistence"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading_at(temperature: f64, timestamp: DateTime<Utc>) -> Reading {
        Reading {
            temperature,
            humidity: 50.0,
            timestamp,
            client_ip: "10.0.0.7".to_string(),
            client_port: 40100,
        }
    }

    #[test]
    fn test_scan_orders_by_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.insert(reading_at(1.0, now - Duration::minutes(30))).unwrap();
        store.insert(reading_at(2.0, now)).unwrap();
        store.insert(reading_at(3.0, now - Duration::minutes(1))).unwrap();
        store.insert(reading_at(4.0, now)).unwrap();

        let scanned = store.scan_since(now - Duration::minutes(5)).unwrap();
        let temps: Vec<f64> = scanned.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![3.0, 2.0, 4.0]);
        assert_eq!(store.count().unwrap(), 4);

        let everything = store.scan_since(DateTime::<Utc>::MIN_UTC).unwrap();
        assert_eq!(everything.len(), 4);
    }

    #[test]
    fn test_latest_prefers_later_insert_on_tie() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.latest().unwrap().is_none());

        let now = Utc::now();
        store.insert(reading_at(1.0, now)).unwrap();
        store.insert(reading_at(2.0, now)).unwrap();
        store.insert(reading_at(3.0, now - Duration::seconds(1))).unwrap();

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.temperature, 2.0);
        assert_eq!(latest.timestamp, now);
        assert_eq!(latest.client_ip, "10.0.0.7");
        assert_eq!(latest.client_port, 40100);
    }

    #[test]
    fn test_readings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.db");
        let now = Utc::now();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(reading_at(21.5, now - Duration::seconds(5))).unwrap();
            store.insert(reading_at(22.0, now)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.latest().unwrap().unwrap().temperature, 22.0);
    }

    #[test]
    fn test_interrupted_writer_leaves_history_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let now = Utc::now();

        {
            let store = SqliteStore::open(&path).unwrap();
            for i in 0..100 {
                store.insert(reading_at(i as f64, now - Duration::seconds(i))).unwrap();
            }
        }

        // a writer that dies before commit
        {
            let mut conn = Connection::open(&path).unwrap();
            let tx = conn.transaction().unwrap();
            tx.execute(
                "INSERT INTO readings (temperature, humidity, timestamp, client_ip, client_port) \
                 VALUES (21.5, 40.0, 0, '10.0.0.1', 1)",
                [],
            )
            .unwrap();
            drop(tx);
        }

        // a row missing its humidity is refused outright
        {
            let conn = Connection::open(&path).unwrap();
            let partial = conn.execute(
                "INSERT INTO readings (temperature, timestamp, client_ip, client_port) \
                 VALUES (21.5, 0, '10.0.0.1', 1)",
                [],
            );
            assert!(partial.is_err());
        }

        let config = StoreConfig { backend: StoreBackend::Sqlite, path };
        let store = open_store(&config).expect("store should stay connected");
        assert_eq!(store.count().unwrap(), 100);
        assert_eq!(store.latest().unwrap().unwrap().temperature, 0.0);

        store.insert(reading_at(55.0, Utc::now())).unwrap();
        assert_eq!(store.count().unwrap(), 101);
    }

    #[test]
    fn test_open_store_backends() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig {
            backend: StoreBackend::None,
            path: dir.path().join("readings.db"),
        };
        assert!(open_store(&config).is_none());

        config.backend = StoreBackend::Memory;
        assert!(open_store(&config).is_some());

        config.backend = StoreBackend::Sqlite;
        assert!(open_store(&config).is_some());

        // a directory cannot be opened as the database file
        config.path = dir.path().to_path_buf();
        assert!(open_store(&config).is_none());
    }
}
