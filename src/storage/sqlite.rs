//! SQLite-backed block directory and monitoring store.
//!
//! Readings and alerts reference their block with `ON DELETE CASCADE`, so
//! deleting a block removes its history, and any write that arrives for a
//! deleted block fails on the foreign key.

use super::{AlertFilter, BlockDirectory, MonitoringStore, ReadingFilter};
use crate::flock::{FlockBlock, FlockBlockUpdate, NewFlockBlock};
use crate::sensor::{AlertEvent, Reading, SensorValues, StoredAlert, StoredReading};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// Block, reading and alert storage in one SQLite database.
///
/// # Schema
/// ```sql
/// CREATE TABLE blocks (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     owner_id INTEGER NOT NULL,
///     name TEXT NOT NULL,
///     number_of_birds INTEGER NOT NULL,
///     breed TEXT NOT NULL,              -- broiler | layer | kuroiler | local
///     age_group TEXT NOT NULL,          -- chick | grower | adult
///     description TEXT,
///     created_at TEXT NOT NULL,         -- RFC 3339, UTC
///     updated_at TEXT NOT NULL
/// );
/// CREATE TABLE readings (
///     id INTEGER PRIMARY KEY,
///     block_id INTEGER NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
///     owner_id INTEGER NOT NULL,
///     timestamp TEXT NOT NULL,
///     temperature REAL, humidity REAL, ammonia REAL,
///     feed_level REAL, water_level REAL, activity_level REAL
/// );
/// CREATE TABLE alerts (
///     id INTEGER PRIMARY KEY,
///     block_id INTEGER NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
///     owner_id INTEGER NOT NULL,
///     timestamp TEXT NOT NULL,
///     metric TEXT NOT NULL, breach TEXT NOT NULL, value REAL NOT NULL,
///     category TEXT NOT NULL, message TEXT NOT NULL,
///     resolved INTEGER NOT NULL DEFAULT 0
/// );
/// ```
///
/// Timestamps are written with a fixed format (microseconds, `Z` suffix) so
/// string comparison orders them correctly.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database and ensures the schema exists.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file, or `":memory:"` for a throwaway store
    ///
    /// # Returns
    /// * `Ok(SqliteStore)` - Initialized store with foreign keys enabled
    /// * `Err` - If the file cannot be opened or the schema cannot be created
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS blocks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id        INTEGER NOT NULL,
                name            TEXT NOT NULL,
                number_of_birds INTEGER NOT NULL,
                breed           TEXT NOT NULL,
                age_group       TEXT NOT NULL,
                description     TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS readings (
                id              INTEGER PRIMARY KEY,
                block_id        INTEGER NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
                owner_id        INTEGER NOT NULL,
                timestamp       TEXT NOT NULL,
                temperature     REAL NOT NULL,
                humidity        REAL NOT NULL,
                ammonia         REAL NOT NULL,
                feed_level      REAL NOT NULL,
                water_level     REAL NOT NULL,
                activity_level  REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_readings_block_time ON readings(block_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_readings_owner_time ON readings(owner_id, timestamp);

            CREATE TABLE IF NOT EXISTS alerts (
                id              INTEGER PRIMARY KEY,
                block_id        INTEGER NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
                owner_id        INTEGER NOT NULL,
                timestamp       TEXT NOT NULL,
                metric          TEXT NOT NULL,
                breach          TEXT NOT NULL,
                value           REAL NOT NULL,
                category        TEXT NOT NULL,
                message         TEXT NOT NULL,
                resolved        INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_block_time ON alerts(block_id, timestamp);
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Inserts a block if the owner has fewer than `limit` blocks.
    ///
    /// The owner count is evaluated by the INSERT itself while the
    /// connection lock is held.
    fn insert_block(&self, new: &NewFlockBlock, limit: i64) -> Result<Option<FlockBlock>> {
        let now = Utc::now();
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                r#"
                INSERT INTO blocks (
                    owner_id, name, number_of_birds, breed, age_group,
                    description, created_at, updated_at
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                WHERE (SELECT COUNT(*) FROM blocks WHERE owner_id = ?1) < ?9
                "#,
                params![
                    new.owner_id,
                    new.name.trim(),
                    new.number_of_birds,
                    new.breed.as_str(),
                    new.age_group.as_str(),
                    new.description,
                    ts(&now),
                    ts(&now),
                    limit,
                ],
            )
            .context("Failed to create block")?;
        if inserted == 0 {
            return Ok(None);
        }

        let id = conn.last_insert_rowid();
        let block = conn
            .query_row(
                &format!("SELECT {} FROM blocks WHERE id = ?1", BLOCK_COLUMNS),
                params![id],
                block_from_row,
            )
            .context("Failed to read back created block")?;
        Ok(Some(block))
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reads a TEXT column and parses it, surfacing parse errors as rusqlite errors.
fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const BLOCK_COLUMNS: &str =
    "id, owner_id, name, number_of_birds, breed, age_group, description, created_at, updated_at";

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<FlockBlock> {
    Ok(FlockBlock {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        number_of_birds: row.get(3)?,
        breed: parsed(row, 4)?,
        age_group: parsed(row, 5)?,
        description: row.get(6)?,
        created_at: parsed(row, 7)?,
        updated_at: parsed(row, 8)?,
    })
}

const READING_COLUMNS: &str = "id, block_id, owner_id, timestamp, temperature, humidity, \
     ammonia, feed_level, water_level, activity_level";

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        reading: Reading {
            block_id: row.get(1)?,
            owner_id: row.get(2)?,
            timestamp: parsed(row, 3)?,
            values: SensorValues {
                temperature: row.get(4)?,
                humidity: row.get(5)?,
                ammonia: row.get(6)?,
                feed_level: row.get(7)?,
                water_level: row.get(8)?,
                activity_level: row.get(9)?,
            },
        },
    })
}

const ALERT_COLUMNS: &str =
    "id, block_id, owner_id, timestamp, metric, breach, value, category, message, resolved";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<StoredAlert> {
    Ok(StoredAlert {
        id: row.get(0)?,
        alert: AlertEvent {
            block_id: row.get(1)?,
            owner_id: row.get(2)?,
            timestamp: parsed(row, 3)?,
            metric: parsed(row, 4)?,
            breach: parsed(row, 5)?,
            value: row.get(6)?,
            category: row.get(7)?,
            message: row.get(8)?,
            resolved: row.get(9)?,
        },
    })
}

/// Builds the WHERE clause (possibly empty) and its bound values for a reading query.
fn reading_conditions(filter: &ReadingFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(owner_id) = filter.owner_id {
        clauses.push("owner_id = ?");
        values.push(Value::Integer(owner_id));
    }
    if let Some(block_id) = filter.block_id {
        clauses.push("block_id = ?");
        values.push(Value::Integer(block_id));
    }
    if let Some(since) = &filter.since {
        clauses.push("timestamp >= ?");
        values.push(Value::Text(ts(since)));
    }
    if let Some(until) = &filter.until {
        clauses.push("timestamp <= ?");
        values.push(Value::Text(ts(until)));
    }

    (where_clause(&clauses), values)
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

impl MonitoringStore for SqliteStore {
    /// Inserts one reading.
    ///
    /// # Returns
    /// * `Ok(i64)` - Row id of the new reading
    /// * `Err` - If the block no longer exists or the write fails
    fn create_reading(&self, reading: &Reading) -> Result<i64> {
        let conn = self.conn()?;
        let v = &reading.values;
        conn.execute(
            r#"
            INSERT INTO readings (
                block_id, owner_id, timestamp,
                temperature, humidity, ammonia,
                feed_level, water_level, activity_level
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                reading.block_id,
                reading.owner_id,
                ts(&reading.timestamp),
                v.temperature,
                v.humidity,
                v.ammonia,
                v.feed_level,
                v.water_level,
                v.activity_level,
            ],
        )
        .with_context(|| format!("Failed to store reading for block {}", reading.block_id))?;
        Ok(conn.last_insert_rowid())
    }

    /// # Arguments
    /// * `owner_id` - Only this owner's readings are considered
    /// * `older_than_days` - Readings older than now minus this many days are deleted
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of rows removed
    fn prune_readings(&self, owner_id: i64, older_than_days: i64) -> Result<usize> {
        let threshold = Utc::now() - Duration::days(older_than_days);
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM readings WHERE owner_id = ?1 AND timestamp < ?2",
                params![owner_id, ts(&threshold)],
            )
            .context("Failed to prune readings")?;
        Ok(removed)
    }

    fn create_alert(&self, alert: &AlertEvent) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO alerts (
                block_id, owner_id, timestamp,
                metric, breach, value, category, message, resolved
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                alert.block_id,
                alert.owner_id,
                ts(&alert.timestamp),
                alert.metric.as_str(),
                alert.breach.as_str(),
                alert.value,
                alert.category,
                alert.message,
                alert.resolved,
            ],
        )
        .with_context(|| format!("Failed to store alert for block {}", alert.block_id))?;
        Ok(conn.last_insert_rowid())
    }

    fn count_readings(&self, filter: &ReadingFilter) -> Result<u64> {
        let (conditions, values) = reading_conditions(filter);
        let sql = format!("SELECT COUNT(*) FROM readings{}", conditions);
        let count: i64 = self
            .conn()?
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .context("Failed to count readings")?;
        Ok(count as u64)
    }

    fn filter_readings(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>> {
        let (conditions, mut values) = reading_conditions(filter);
        let order = if filter.ascending { "ASC" } else { "DESC" };
        let mut sql = format!(
            "SELECT {} FROM readings{} ORDER BY timestamp {order}, id {order}",
            READING_COLUMNS, conditions
        );
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
        let readings = stmt
            .query_map(params_from_iter(values.iter()), reading_from_row)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read readings")?;
        Ok(readings)
    }

    /// Newest reading matching `filter`; its ordering and limit are ignored
    fn latest_reading(&self, filter: &ReadingFilter) -> Result<Option<StoredReading>> {
        let (conditions, values) = reading_conditions(filter);
        let sql = format!(
            "SELECT {} FROM readings{} ORDER BY timestamp DESC, id DESC LIMIT 1",
            READING_COLUMNS, conditions
        );
        let reading = self
            .conn()?
            .query_row(&sql, params_from_iter(values.iter()), reading_from_row)
            .optional()
            .context("Failed to read latest reading")?;
        Ok(reading)
    }

    fn filter_alerts(&self, filter: &AlertFilter) -> Result<Vec<StoredAlert>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(owner_id) = filter.owner_id {
            clauses.push("owner_id = ?");
            values.push(Value::Integer(owner_id));
        }
        if let Some(block_id) = filter.block_id {
            clauses.push("block_id = ?");
            values.push(Value::Integer(block_id));
        }
        if let Some(resolved) = filter.resolved {
            clauses.push("resolved = ?");
            values.push(Value::Integer(resolved as i64));
        }

        let mut sql = format!(
            "SELECT {} FROM alerts{} ORDER BY timestamp DESC, id DESC",
            ALERT_COLUMNS,
            where_clause(&clauses)
        );
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
        let alerts = stmt
            .query_map(params_from_iter(values.iter()), alert_from_row)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read alerts")?;
        Ok(alerts)
    }

    /// # Returns
    /// * `Ok(true)` - Alert found and marked resolved
    /// * `Ok(false)` - No alert with that id
    fn resolve_alert(&self, alert_id: i64) -> Result<bool> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE alerts SET resolved = 1 WHERE id = ?1",
                params![alert_id],
            )
            .context("Failed to resolve alert")?;
        Ok(updated > 0)
    }
}

impl BlockDirectory for SqliteStore {
    fn create_block(&self, new: &NewFlockBlock) -> Result<FlockBlock> {
        self.insert_block(new, i64::MAX)?
            .ok_or_else(|| anyhow!("Block insert was skipped"))
    }

    fn create_block_within_limit(
        &self,
        new: &NewFlockBlock,
        max_per_owner: usize,
    ) -> Result<Option<FlockBlock>> {
        self.insert_block(new, i64::try_from(max_per_owner).unwrap_or(i64::MAX))
    }

    fn get_block(&self, block_id: i64) -> Result<Option<FlockBlock>> {
        let block = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM blocks WHERE id = ?1", BLOCK_COLUMNS),
                params![block_id],
                block_from_row,
            )
            .optional()
            .context("Failed to read block")?;
        Ok(block)
    }

    fn list_blocks(&self, owner_id: i64) -> Result<Vec<FlockBlock>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM blocks WHERE owner_id = ?1 ORDER BY id",
                BLOCK_COLUMNS
            ))
            .context("Failed to prepare query")?;
        let blocks = stmt
            .query_map(params![owner_id], block_from_row)
            .context("Failed to execute query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read blocks")?;
        Ok(blocks)
    }

    fn update_block(&self, block_id: i64, update: &FlockBlockUpdate) -> Result<Option<FlockBlock>> {
        let Some(mut block) = self.get_block(block_id)? else {
            return Ok(None);
        };
        update.apply(&mut block);

        self.conn()?
            .execute(
                r#"
                UPDATE blocks SET
                    name = ?2, number_of_birds = ?3, breed = ?4, age_group = ?5,
                    description = ?6, updated_at = ?7
                WHERE id = ?1
                "#,
                params![
                    block.id,
                    block.name,
                    block.number_of_birds,
                    block.breed.as_str(),
                    block.age_group.as_str(),
                    block.description,
                    ts(&block.updated_at),
                ],
            )
            .context("Failed to update block")?;
        Ok(Some(block))
    }

    /// Deletes the block; its readings and alerts go with it via `ON DELETE CASCADE`.
    fn delete_block(&self, block_id: i64) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM blocks WHERE id = ?1", params![block_id])
            .context("Failed to delete block")?;
        Ok(removed > 0)
    }
}
