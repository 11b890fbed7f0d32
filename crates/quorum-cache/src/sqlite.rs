use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use quorum_models::snapshot_schema::{key_patterns, SnapshotRow, SNAPSHOT_TABLE_DDL};
use quorum_models::{MarketData, PortfolioPoint, Position};
use rusqlite::Connection;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Read-only view of the shared snapshot database.
///
/// External market-data and position pipelines write the `cache_entries`
/// table; the decision core only reads it. Expired rows are invisible.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a `Mutex`.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open a read-only connection to the shared snapshot database.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Writable in-memory database with the schema applied, for tests and demos.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SNAPSHOT_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Get a single row by key. Returns None if not found or expired.
    pub fn get(&self, key: &str) -> Result<Option<SnapshotRow>, CacheError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, category, value_json, source, symbol, created_at, expires_at, updated_at \
             FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
        )?;

        let result = stmt.query_row(rusqlite::params![key, now], |row| {
            Ok(SnapshotRow {
                key: row.get(0)?,
                category: row.get(1)?,
                value_json: row.get(2)?,
                source: row.get(3)?,
                symbol: row.get(4)?,
                created_at: row.get(5)?,
                expires_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        });

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CacheError::Sqlite(e)),
        }
    }

    /// Typed read of one key's JSON payload.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key)? {
            Some(row) => serde_json::from_str(&row.value_json)
                .map(Some)
                .map_err(|source| CacheError::Payload {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub fn market_data(&self, symbol: &str) -> Result<Option<MarketData>, CacheError> {
        self.get_json(&key_patterns::market(symbol))
    }

    /// Open positions; an absent row means a flat book.
    pub fn open_positions(&self) -> Result<Vec<Position>, CacheError> {
        Ok(self
            .get_json(key_patterns::POSITIONS)?
            .unwrap_or_default())
    }

    /// Portfolio value history, oldest first.
    pub fn portfolio_history(&self) -> Result<Vec<PortfolioPoint>, CacheError> {
        let mut points: Vec<PortfolioPoint> = self
            .get_json(key_patterns::PORTFOLIO_HISTORY)?
            .unwrap_or_default();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    /// Daily fractional returns for a symbol, oldest first.
    pub fn symbol_returns(&self, symbol: &str) -> Result<Vec<f64>, CacheError> {
        Ok(self
            .get_json(&key_patterns::returns(symbol))?
            .unwrap_or_default())
    }

    /// Insert a row. In production the pipelines write directly to SQLite;
    /// this exists for tests and local seeding.
    pub fn insert(&self, row: &SnapshotRow) -> Result<(), CacheError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache_entries \
             (key, category, value_json, source, symbol, created_at, expires_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                row.key,
                row.category,
                row.value_json,
                row.source,
                row.symbol,
                row.created_at,
                row.expires_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }
}
