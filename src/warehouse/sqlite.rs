//! SQLite Warehouse
//!
//! Single-file warehouse holding the dimension tables, the append-only staging
//! log, the canonical fact table and the forecast table. One connection behind
//! a mutex; every multi-statement write runs in an IMMEDIATE transaction that
//! rolls back when dropped uncommitted.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    CanonicalStore, DimensionLookup, ForecastStore, StagingRowCount, StagingStore, StoredForecast,
    DEFAULT_METRICS, DEFAULT_REGIONS,
};
use crate::config::PipelineConfig;
use crate::series::{
    CanonicalReading, ForecastPoint, ForecastRun, NewObservation, RawObservation, SeriesKey,
    TimeSlot,
};

// =============================================================================
// Configuration
// =============================================================================

/// Warehouse configuration.
#[derive(Debug, Clone)]
pub struct WarehouseStoreConfig {
    /// Path to SQLite database file.
    pub db_path: String,
    /// Enable WAL mode for better concurrency.
    pub wal_mode: bool,
    /// How long to wait on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for WarehouseStoreConfig {
    fn default() -> Self {
        Self {
            db_path: "db/gridcast.db".to_string(),
            wal_mode: true,
            busy_timeout_ms: 5_000,
        }
    }
}

impl From<&PipelineConfig> for WarehouseStoreConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            db_path: config.db_path.clone(),
            wal_mode: config.storage.wal_mode,
            busy_timeout_ms: config.storage.busy_timeout_ms,
        }
    }
}

// =============================================================================
// Storage Schema
// =============================================================================

const WAL_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS dim_metric (
    metric_id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_code TEXT NOT NULL UNIQUE,
    unit TEXT
);

CREATE TABLE IF NOT EXISTS dim_region (
    region_id INTEGER PRIMARY KEY AUTOINCREMENT,
    region_code TEXT NOT NULL UNIQUE
);

-- Append-only raw log; duplicates per (ts_utc, metric, region) are expected
CREATE TABLE IF NOT EXISTS stg_readings (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_utc TEXT NOT NULL,
    metric_code TEXT NOT NULL,
    region_code TEXT NOT NULL,
    value REAL,
    source TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stg_readings_series_ts
    ON stg_readings(metric_code, region_code, ts_utc);

-- Canonical facts, one row per slot and series
CREATE TABLE IF NOT EXISTS fact_readings (
    ts_utc TEXT NOT NULL,
    metric_id INTEGER NOT NULL REFERENCES dim_metric(metric_id),
    region_id INTEGER NOT NULL REFERENCES dim_region(region_id),
    value REAL,
    source TEXT NOT NULL,
    promoted_at TEXT NOT NULL,
    PRIMARY KEY (ts_utc, metric_id, region_id)
);

CREATE INDEX IF NOT EXISTS idx_fact_readings_series_ts
    ON fact_readings(metric_id, region_id, ts_utc);

CREATE TABLE IF NOT EXISTS fact_forecasts (
    forecast_date TEXT NOT NULL,
    ts_utc TEXT NOT NULL,
    metric_code TEXT NOT NULL,
    region_code TEXT NOT NULL,
    train_days INTEGER NOT NULL,
    model_name TEXT NOT NULL,
    yhat REAL NOT NULL,
    yhat_lower REAL NOT NULL,
    yhat_upper REAL NOT NULL,
    generated_utc TEXT NOT NULL,
    UNIQUE(forecast_date, ts_utc, metric_code, region_code, model_name, train_days)
);
"#;

// =============================================================================
// Column helpers
// =============================================================================

fn format_instant(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn slot_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<TimeSlot> {
    let text: String = row.get(idx)?;
    TimeSlot::parse(&text).ok_or_else(|| conversion_error(idx, format!("bad ts_utc '{}'", text)))
}

fn instant_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{}': {}", text, e)))
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("bad date '{}': {}", text, e)))
}

// =============================================================================
// Storage Implementation
// =============================================================================

/// SQLite implementation of every warehouse collaborator.
pub struct WarehouseStore {
    conn: Arc<Mutex<Connection>>,
    config: WarehouseStoreConfig,
}

impl WarehouseStore {
    /// Open or create storage.
    pub fn open(config: WarehouseStoreConfig) -> Result<Self> {
        let path = Path::new(&config.db_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&config.db_path, flags)
            .with_context(|| format!("Failed to open database: {}", config.db_path))?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal_mode {
            conn.execute_batch(WAL_PRAGMAS)?;
        }
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %config.db_path, wal = config.wal_mode, "Warehouse opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Open in-memory storage (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: WarehouseStoreConfig {
                db_path: ":memory:".to_string(),
                ..WarehouseStoreConfig::default()
            },
        })
    }

    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Total staging rows (duplicates included).
    pub fn count_staging(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM stg_readings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Canonical rows for one series in `[start, end)`.
    pub fn count_canonical(&self, start: TimeSlot, end: TimeSlot, series: &SeriesKey) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM fact_readings
            WHERE metric_id = ?1 AND region_id = ?2 AND ts_utc >= ?3 AND ts_utc < ?4
            "#,
            params![series.metric_id, series.region_id, start.to_ts_utc(), end.to_ts_utc()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Forecast rows for one (date, series) across all models and windows.
    pub fn count_forecasts(&self, forecast_date: NaiveDate, series: &SeriesKey) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM fact_forecasts
            WHERE forecast_date = ?1 AND metric_code = ?2 AND region_code = ?3
            "#,
            params![forecast_date.to_string(), series.metric_code, series.region_code],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Every resolvable series, ordered by codes.
    pub fn list_series(&self) -> Result<Vec<SeriesKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT m.metric_code, r.region_code, m.metric_id, r.region_id
            FROM dim_metric AS m CROSS JOIN dim_region AS r
            ORDER BY m.metric_code, r.region_code
            "#,
        )?;
        let series = stmt
            .query_map([], |row| {
                Ok(SeriesKey::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(series)
    }
}

impl StagingStore for WarehouseStore {
    fn append(&self, rows: &[NewObservation]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO stg_readings (ts_utc, metric_code, region_code, value, source, ingested_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.slot.to_ts_utc(),
                    row.metric_code,
                    row.region_code,
                    row.value,
                    row.source,
                    format_instant(row.ingested_at),
                ])?;
            }
        }
        tx.commit()?;

        debug!(rows = rows.len(), "Staged observations");
        Ok(rows.len())
    }

    fn read_window(
        &self,
        start: TimeSlot,
        end: TimeSlot,
        series: &SeriesKey,
    ) -> Result<Vec<RawObservation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT ts_utc, metric_code, region_code, value, source, ingested_at, stg_id
            FROM stg_readings
            WHERE metric_code = ?1 AND region_code = ?2 AND ts_utc >= ?3 AND ts_utc < ?4
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![series.metric_code, series.region_code, start.to_ts_utc(), end.to_ts_utc()],
                |row| {
                    Ok(RawObservation {
                        slot: slot_column(row, 0)?,
                        metric_code: row.get(1)?,
                        region_code: row.get(2)?,
                        value: row.get(3)?,
                        source: row.get(4)?,
                        ingested_at: instant_column(row, 5)?,
                        staging_seq: row.get(6)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read staging window")?;

        Ok(rows)
    }

    fn row_counts(&self, start: TimeSlot, end: TimeSlot) -> Result<Vec<StagingRowCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT metric_code, region_code, COUNT(*), COUNT(DISTINCT ts_utc)
            FROM stg_readings
            WHERE ts_utc >= ?1 AND ts_utc < ?2
            GROUP BY metric_code, region_code
            ORDER BY metric_code, region_code
            "#,
        )?;

        let counts = stmt
            .query_map(params![start.to_ts_utc(), end.to_ts_utc()], |row| {
                Ok(StagingRowCount {
                    metric_code: row.get(0)?,
                    region_code: row.get(1)?,
                    rows: row.get::<_, i64>(2)? as usize,
                    distinct_slots: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }
}

impl CanonicalStore for WarehouseStore {
    fn read_range(
        &self,
        start: TimeSlot,
        end: TimeSlot,
        series: &SeriesKey,
    ) -> Result<Vec<CanonicalReading>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT ts_utc, value, source, promoted_at
            FROM fact_readings
            WHERE metric_id = ?1 AND region_id = ?2 AND ts_utc >= ?3 AND ts_utc < ?4
            ORDER BY ts_utc ASC
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![series.metric_id, series.region_id, start.to_ts_utc(), end.to_ts_utc()],
                |row| {
                    Ok(CanonicalReading {
                        slot: slot_column(row, 0)?,
                        series: series.clone(),
                        value: row.get(1)?,
                        source: row.get(2)?,
                        promoted_at: instant_column(row, 3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read canonical range")?;

        Ok(rows)
    }

    fn replace_window(
        &self,
        start: TimeSlot,
        end: TimeSlot,
        series: &SeriesKey,
        rows: &[CanonicalReading],
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx.execute(
            r#"
            DELETE FROM fact_readings
            WHERE metric_id = ?1 AND region_id = ?2 AND ts_utc >= ?3 AND ts_utc < ?4
            "#,
            params![series.metric_id, series.region_id, start.to_ts_utc(), end.to_ts_utc()],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO fact_readings (ts_utc, metric_id, region_id, value, source, promoted_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for row in rows {
                if row.slot < start || row.slot >= end {
                    anyhow::bail!("row {} outside replaced window [{}, {})", row.slot, start, end);
                }
                stmt.execute(params![
                    row.slot.to_ts_utc(),
                    series.metric_id,
                    series.region_id,
                    row.value,
                    row.source,
                    format_instant(row.promoted_at),
                ])?;
            }
        }

        tx.commit().context("Failed to commit canonical window")?;

        debug!(series = %series, start = %start, deleted, inserted = rows.len(), "Replaced canonical window");
        Ok(rows.len())
    }

    fn latest_slot(&self) -> Result<Option<TimeSlot>> {
        let conn = self.conn.lock();
        let max: Option<String> =
            conn.query_row("SELECT MAX(ts_utc) FROM fact_readings", [], |row| row.get(0))?;
        match max {
            Some(text) => TimeSlot::parse(&text)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("bad ts_utc in fact_readings: {}", text)),
            None => Ok(None),
        }
    }
}

impl ForecastStore for WarehouseStore {
    fn upsert(&self, run: &ForecastRun, points: &[ForecastPoint]) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO fact_forecasts (
                    forecast_date, ts_utc, metric_code, region_code, train_days,
                    model_name, yhat, yhat_lower, yhat_upper, generated_utc
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(forecast_date, ts_utc, metric_code, region_code, model_name, train_days)
                DO UPDATE SET
                    yhat = excluded.yhat,
                    yhat_lower = excluded.yhat_lower,
                    yhat_upper = excluded.yhat_upper,
                    generated_utc = excluded.generated_utc
                "#,
            )?;
            for point in points {
                stmt.execute(params![
                    run.forecast_date.to_string(),
                    point.slot.to_ts_utc(),
                    run.series.metric_code,
                    run.series.region_code,
                    run.train_days as i64,
                    run.model_name,
                    point.point,
                    point.lower,
                    point.upper,
                    format_instant(run.generated_at),
                ])?;
            }
        }
        tx.commit().context("Failed to commit forecast batch")?;

        debug!(
            forecast_date = %run.forecast_date,
            series = %run.series,
            model = %run.model_name,
            rows = points.len(),
            "Upserted forecast points"
        );
        Ok(points.len())
    }

    fn read_points(
        &self,
        forecast_date: NaiveDate,
        series: &SeriesKey,
        model_name: &str,
        train_days: u32,
    ) -> Result<Vec<StoredForecast>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT forecast_date, ts_utc, yhat, yhat_lower, yhat_upper, generated_utc
            FROM fact_forecasts
            WHERE forecast_date = ?1 AND metric_code = ?2 AND region_code = ?3
              AND model_name = ?4 AND train_days = ?5
            ORDER BY ts_utc ASC
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![
                    forecast_date.to_string(),
                    series.metric_code,
                    series.region_code,
                    model_name,
                    train_days as i64
                ],
                |row| {
                    Ok(StoredForecast {
                        run: ForecastRun {
                            forecast_date: date_column(row, 0)?,
                            series: series.clone(),
                            train_days,
                            model_name: model_name.to_string(),
                            generated_at: instant_column(row, 5)?,
                        },
                        point: ForecastPoint {
                            slot: slot_column(row, 1)?,
                            point: row.get(2)?,
                            lower: row.get(3)?,
                            upper: row.get(4)?,
                        },
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

impl DimensionLookup for WarehouseStore {
    fn resolve(&self, metric_code: &str, region_code: &str) -> Result<Option<SeriesKey>> {
        let conn = self.conn.lock();
        let ids = conn
            .query_row(
                r#"
                SELECT m.metric_id, r.region_id
                FROM dim_metric AS m, dim_region AS r
                WHERE m.metric_code = ?1 AND r.region_code = ?2
                "#,
                params![metric_code, region_code],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(ids.map(|(metric_id, region_id)| {
            SeriesKey::new(metric_code, region_code, metric_id, region_id)
        }))
    }

    fn seed_defaults(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (code, unit) in DEFAULT_METRICS {
            tx.execute(
                "INSERT OR IGNORE INTO dim_metric (metric_code, unit) VALUES (?1, ?2)",
                params![code, unit],
            )?;
        }
        for code in DEFAULT_REGIONS {
            tx.execute(
                "INSERT OR IGNORE INTO dim_region (region_code) VALUES (?1)",
                params![code],
            )?;
        }
        tx.commit()?;
        info!(metrics = DEFAULT_METRICS.len(), regions = DEFAULT_REGIONS.len(), "Seeded dimensions");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seeded() -> (WarehouseStore, SeriesKey) {
        let store = WarehouseStore::open_memory().unwrap();
        store.seed_defaults().unwrap();
        let series = store.resolve("demand_actual", "ALL").unwrap().unwrap();
        (store, series)
    }

    fn slot(h: u32, m: u32) -> TimeSlot {
        TimeSlot::from_datetime(Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()).unwrap()
    }

    fn obs(slot: TimeSlot, value: Option<f64>, ingested_secs: i64) -> NewObservation {
        NewObservation {
            slot,
            metric_code: "demand_actual".into(),
            region_code: "ALL".into(),
            value,
            source: "test".into(),
            ingested_at: Utc.timestamp_opt(1_736_900_000 + ingested_secs, 0).unwrap(),
        }
    }

    fn reading(series: &SeriesKey, slot: TimeSlot, value: f64) -> CanonicalReading {
        CanonicalReading {
            slot,
            series: series.clone(),
            value: Some(value),
            source: "test".into(),
            promoted_at: Utc.timestamp_opt(1_736_950_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_seed_is_idempotent() {
        let (store, series) = seeded();
        store.seed_defaults().unwrap();
        assert_eq!(store.list_series().unwrap().len(), 3);
        assert_eq!(store.resolve("demand_actual", "ALL").unwrap(), Some(series));
        assert!(store.resolve("tide_actual", "ALL").unwrap().is_none());
        assert!(store.resolve("demand_actual", "NI").unwrap().is_none());
    }

    #[test]
    fn test_staging_keeps_duplicates() {
        let (store, series) = seeded();
        let rows = vec![
            obs(slot(0, 0), Some(1.0), 0),
            obs(slot(0, 0), Some(2.0), 10),
            obs(slot(0, 15), None, 0),
        ];
        assert_eq!(store.append(&rows).unwrap(), 3);
        assert_eq!(store.count_staging().unwrap(), 3);

        let window = store.read_window(slot(0, 0), slot(1, 0), &series).unwrap();
        assert_eq!(window.len(), 3);
        assert!(window.iter().any(|r| r.value.is_none()));
        let seqs: Vec<i64> = window.iter().map(|r| r.staging_seq).collect();
        assert_eq!(seqs.iter().collect::<std::collections::HashSet<_>>().len(), 3);

        let counts = store.row_counts(slot(0, 0), slot(1, 0)).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].rows, 3);
        assert_eq!(counts[0].distinct_slots, 2);
    }

    #[test]
    fn test_staging_keeps_sub_microsecond_ingestion_time() {
        let (store, series) = seeded();
        let ingested_at = Utc.timestamp_opt(1_736_900_000, 123_456_789).unwrap();
        let mut row = obs(slot(0, 0), Some(1.0), 0);
        row.ingested_at = ingested_at;
        store.append(&[row]).unwrap();

        let window = store.read_window(slot(0, 0), slot(1, 0), &series).unwrap();
        assert_eq!(window[0].ingested_at, ingested_at);
    }

    #[test]
    fn test_staging_window_is_half_open() {
        let (store, series) = seeded();
        store
            .append(&[obs(slot(0, 45), Some(1.0), 0), obs(slot(1, 0), Some(2.0), 0)])
            .unwrap();
        let window = store.read_window(slot(0, 0), slot(1, 0), &series).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].slot, slot(0, 45));
    }

    #[test]
    fn test_replace_window_deletes_then_inserts() {
        let (store, series) = seeded();
        let first = vec![reading(&series, slot(0, 0), 1.0), reading(&series, slot(0, 15), 2.0)];
        store.replace_window(slot(0, 0), slot(1, 0), &series, &first).unwrap();

        let second = vec![reading(&series, slot(0, 30), 3.0)];
        store.replace_window(slot(0, 0), slot(1, 0), &series, &second).unwrap();

        let rows = store.read_range(slot(0, 0), slot(1, 0), &series).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(3.0));
        assert_eq!(store.latest_slot().unwrap(), Some(slot(0, 30)));
    }

    #[test]
    fn test_replace_window_rolls_back_on_error() {
        let (store, series) = seeded();
        let first = vec![reading(&series, slot(0, 0), 1.0)];
        store.replace_window(slot(0, 0), slot(1, 0), &series, &first).unwrap();

        // Second row falls outside the window; nothing may change.
        let bad = vec![reading(&series, slot(0, 15), 9.0), reading(&series, slot(2, 0), 9.0)];
        assert!(store.replace_window(slot(0, 0), slot(1, 0), &series, &bad).is_err());

        let rows = store.read_range(slot(0, 0), slot(1, 0), &series).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(1.0));
    }

    #[test]
    fn test_replace_window_leaves_other_series_alone() {
        let (store, demand) = seeded();
        let wind = store.resolve("wind_actual", "ALL").unwrap().unwrap();
        store
            .replace_window(slot(0, 0), slot(1, 0), &wind, &[reading(&wind, slot(0, 0), 5.0)])
            .unwrap();
        store.replace_window(slot(0, 0), slot(1, 0), &demand, &[]).unwrap();
        assert_eq!(store.count_canonical(slot(0, 0), slot(1, 0), &wind).unwrap(), 1);
    }

    #[test]
    fn test_forecast_upsert_overwrites() {
        let (store, series) = seeded();
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let mut run = ForecastRun {
            forecast_date: date,
            series: series.clone(),
            train_days: 7,
            model_name: "additive_seasonal_v1".into(),
            generated_at: Utc.timestamp_opt(1_736_900_000, 0).unwrap(),
        };
        let points = vec![
            ForecastPoint { slot: slot(0, 0), point: 1.0, lower: 0.5, upper: 1.5 },
            ForecastPoint { slot: slot(0, 15), point: 2.0, lower: 1.5, upper: 2.5 },
        ];
        store.upsert(&run, &points).unwrap();

        run.generated_at = Utc.timestamp_opt(1_736_990_000, 0).unwrap();
        let revised = vec![ForecastPoint { slot: slot(0, 0), point: 4.0, lower: 3.0, upper: 5.0 }];
        store.upsert(&run, &revised).unwrap();

        let stored = store.read_points(date, &series, "additive_seasonal_v1", 7).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].point.point, 4.0);
        assert_eq!(stored[0].run.generated_at, run.generated_at);
        assert_eq!(stored[1].point.point, 2.0);

        // A different window length is a different key.
        run.train_days = 14;
        store.upsert(&run, &points).unwrap();
        assert_eq!(store.count_forecasts(date, &series).unwrap(), 4);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("warehouse.db");
        let config = WarehouseStoreConfig {
            db_path: path.to_string_lossy().into_owned(),
            ..WarehouseStoreConfig::default()
        };
        {
            let store = WarehouseStore::open(config.clone()).unwrap();
            store.seed_defaults().unwrap();
        }
        let reopened = WarehouseStore::open(config).unwrap();
        assert!(reopened.resolve("solar_actual", "ALL").unwrap().is_some());
    }
}
