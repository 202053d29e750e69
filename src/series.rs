//! Series Data Model
//!
//! Shared types for the canonical time axis and the three stores:
//!
//! - [`TimeSlot`]: one 15-minute UTC instant, the only time axis used past ingestion
//! - [`SeriesKey`]: a resolved (metric, region) pair with its surrogate ids
//! - [`RawObservation`]: an append-only staging row (duplicates expected)
//! - [`CanonicalReading`]: one deduplicated fact per (slot, series)
//! - [`ForecastRun`] / [`ForecastPoint`]: one forecast generation and its points

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds in one slot.
pub const SLOT_SECS: i64 = 15 * 60;

/// Slots in an ordinary (non-transition) day.
pub const SLOTS_PER_DAY: usize = 96;

/// Text format of `ts_utc` columns.
pub const TS_UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// =============================================================================
// TIME SLOT
// =============================================================================

/// A UTC instant aligned to a 15-minute boundary.
///
/// Stored as Unix seconds. Construction rejects unaligned instants, so every
/// `TimeSlot` in the system is an exact multiple of 15 minutes from epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct TimeSlot(i64);

impl TimeSlot {
    /// Build a slot from Unix seconds. `None` if not on a 15-minute boundary.
    pub fn from_unix(secs: i64) -> Option<Self> {
        if secs.rem_euclid(SLOT_SECS) == 0 {
            Some(Self(secs))
        } else {
            None
        }
    }

    /// Build a slot from a UTC instant. `None` if not exactly aligned.
    pub fn from_datetime(ts: DateTime<Utc>) -> Option<Self> {
        if ts.timestamp_subsec_nanos() != 0 {
            return None;
        }
        Self::from_unix(ts.timestamp())
    }

    /// Round an instant down to the slot containing it.
    pub fn floor(ts: DateTime<Utc>) -> Self {
        let secs = ts.timestamp();
        Self(secs - secs.rem_euclid(SLOT_SECS))
    }

    /// Parse the persisted `YYYY-MM-DDTHH:MM:SSZ` form (any RFC 3339 offset accepted).
    pub fn parse(s: &str) -> Option<Self> {
        let ts = DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc);
        Self::from_datetime(ts)
    }

    #[inline]
    pub const fn unix(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        // Aligned Unix seconds are always in chrono's range for realistic data.
        Utc.timestamp_opt(self.0, 0)
            .single()
            .unwrap_or_default()
    }

    #[inline]
    pub fn next(self) -> Self {
        Self(self.0 + SLOT_SECS)
    }

    /// The slot `n` slots later (earlier when negative).
    #[inline]
    pub fn add_slots(self, n: i64) -> Self {
        Self(self.0 + n * SLOT_SECS)
    }

    /// Persisted text form.
    pub fn to_ts_utc(self) -> String {
        self.to_datetime().format(TS_UTC_FORMAT).to_string()
    }

    /// Number of whole slots in `[self, end)`.
    pub fn slots_until(self, end: TimeSlot) -> usize {
        ((end.0 - self.0).max(0) / SLOT_SECS) as usize
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ts_utc())
    }
}

impl TryFrom<i64> for TimeSlot {
    type Error = String;

    fn try_from(secs: i64) -> Result<Self, Self::Error> {
        Self::from_unix(secs).ok_or_else(|| format!("{} is not on a 15-minute boundary", secs))
    }
}

impl From<TimeSlot> for i64 {
    fn from(slot: TimeSlot) -> i64 {
        slot.0
    }
}

// =============================================================================
// SERIES KEY
// =============================================================================

/// One logical sensor series, resolved against the dimension tables.
///
/// Obtain through `DimensionLookup::resolve`; the ids are the surrogate keys
/// stored in `fact_readings`, the codes are what staging and forecasts carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub metric_code: String,
    pub region_code: String,
    pub metric_id: i64,
    pub region_id: i64,
}

impl SeriesKey {
    pub fn new(
        metric_code: impl Into<String>,
        region_code: impl Into<String>,
        metric_id: i64,
        region_id: i64,
    ) -> Self {
        Self {
            metric_code: metric_code.into(),
            region_code: region_code.into(),
            metric_id,
            region_id,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.metric_code, self.region_code)
    }
}

// =============================================================================
// STAGING
// =============================================================================

/// A row to append to staging. The store assigns the staging sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub slot: TimeSlot,
    pub metric_code: String,
    pub region_code: String,
    pub value: Option<f64>,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

/// A staging row as read back by the Promotion Engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub slot: TimeSlot,
    pub metric_code: String,
    pub region_code: String,
    pub value: Option<f64>,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
    /// Append order within staging; later rows win ingestion-time ties.
    pub staging_seq: i64,
}

impl RawObservation {
    /// Ordering key for last-write-wins.
    #[inline]
    pub fn recency(&self) -> (DateTime<Utc>, i64) {
        (self.ingested_at, self.staging_seq)
    }
}

// =============================================================================
// CANONICAL
// =============================================================================

/// One deduplicated fact row, unique per (slot, series).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReading {
    pub slot: TimeSlot,
    pub series: SeriesKey,
    pub value: Option<f64>,
    pub source: String,
    pub promoted_at: DateTime<Utc>,
}

// =============================================================================
// FORECASTS
// =============================================================================

/// Identity of one forecast generation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub forecast_date: NaiveDate,
    pub series: SeriesKey,
    pub train_days: u32,
    pub model_name: String,
    pub generated_at: DateTime<Utc>,
}

/// One predicted slot. Invariant after post-processing:
/// `0 <= lower <= point <= upper`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub slot: TimeSlot,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastPoint {
    pub fn bounds_hold(&self) -> bool {
        self.point.is_finite()
            && self.lower.is_finite()
            && self.upper.is_finite()
            && self.lower <= self.point
            && self.point <= self.upper
    }
}
