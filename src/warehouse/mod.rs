//! Warehouse Collaborators
//!
//! The core never talks to a database directly. It is handed a storage handle
//! implementing these traits:
//!
//! - [`StagingStore`]: append-only raw observations (read by promotion)
//! - [`CanonicalStore`]: deduplicated facts (written only by promotion)
//! - [`ForecastStore`]: forecast points (written only by the orchestrator)
//! - [`DimensionLookup`]: (metric, region) codes to surrogate ids
//!
//! [`WarehouseStore`] implements all four on SQLite.

pub mod sqlite;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::series::{
    CanonicalReading, ForecastPoint, ForecastRun, NewObservation, RawObservation, SeriesKey,
    TimeSlot,
};

pub use sqlite::{WarehouseStore, WarehouseStoreConfig};

/// Raw staging rows per series over a range, duplicates included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRowCount {
    pub metric_code: String,
    pub region_code: String,
    pub rows: usize,
    pub distinct_slots: usize,
}

/// A persisted forecast row as read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredForecast {
    pub run: ForecastRun,
    pub point: ForecastPoint,
}

pub trait StagingStore: Send + Sync {
    /// Append observations. Staging is never deduplicated at write time.
    fn append(&self, rows: &[NewObservation]) -> Result<usize>;

    /// All staging rows for `series` with slot in `[start, end)`. Unordered.
    fn read_window(
        &self,
        start: TimeSlot,
        end: TimeSlot,
        series: &SeriesKey,
    ) -> Result<Vec<RawObservation>>;

    /// Row and distinct-slot counts per series in `[start, end)`.
    fn row_counts(&self, start: TimeSlot, end: TimeSlot) -> Result<Vec<StagingRowCount>>;
}

pub trait CanonicalStore: Send + Sync {
    /// Canonical rows for `series` with slot in `[start, end)`, ordered by slot.
    fn read_range(
        &self,
        start: TimeSlot,
        end: TimeSlot,
        series: &SeriesKey,
    ) -> Result<Vec<CanonicalReading>>;

    /// Atomically delete every row of `series` in `[start, end)` and insert `rows`.
    /// Readers observe either the old window or the new one, never a mix.
    fn replace_window(
        &self,
        start: TimeSlot,
        end: TimeSlot,
        series: &SeriesKey,
        rows: &[CanonicalReading],
    ) -> Result<usize>;

    /// Latest canonical slot across all series.
    fn latest_slot(&self) -> Result<Option<TimeSlot>>;
}

pub trait ForecastStore: Send + Sync {
    /// Insert or overwrite points keyed on
    /// (forecast_date, slot, metric, region, model, train_days).
    fn upsert(&self, run: &ForecastRun, points: &[ForecastPoint]) -> Result<usize>;

    fn read_points(
        &self,
        forecast_date: NaiveDate,
        series: &SeriesKey,
        model_name: &str,
        train_days: u32,
    ) -> Result<Vec<StoredForecast>>;
}

pub trait DimensionLookup: Send + Sync {
    /// Resolve codes to a [`SeriesKey`]; `Ok(None)` when either code is unknown.
    fn resolve(&self, metric_code: &str, region_code: &str) -> Result<Option<SeriesKey>>;

    /// Insert the default metric and region dimensions (idempotent).
    fn seed_defaults(&self) -> Result<()>;
}

/// Metrics seeded by [`DimensionLookup::seed_defaults`], with units.
pub const DEFAULT_METRICS: [(&str, &str); 3] = [
    ("wind_actual", "MW"),
    ("solar_actual", "MW"),
    ("demand_actual", "MW"),
];

/// Regions seeded by [`DimensionLookup::seed_defaults`].
pub const DEFAULT_REGIONS: [&str; 1] = ["ALL"];
