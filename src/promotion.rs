//! Promotion Engine
//!
//! Turns one local day of append-only staging rows into canonical facts:
//!
//! 1. Build the day's [`PromotionWindow`] from the timezone calendar
//! 2. Read every staging row for the series inside the window
//! 3. Resolve duplicates per slot, last write wins on `(ingested_at, staging_seq)`
//! 4. Gate on completeness: every expected slot needs at least one raw row
//! 5. Replace the canonical window in a single transaction
//!
//! A rejected window writes nothing, so canonical never holds a partial day.

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calendar::{PromotionWindow, TimezoneRules};
use crate::error::PipelineError;
use crate::series::{CanonicalReading, RawObservation, SeriesKey, TimeSlot};
use crate::warehouse::{CanonicalStore, StagingStore};

// =============================================================================
// RESULTS
// =============================================================================

/// Why a window was not promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    IncompleteWindow {
        missing: usize,
        expected: usize,
        first_missing: Option<TimeSlot>,
    },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompleteWindow {
                missing, expected, ..
            } => write!(f, "incomplete window: {} of {} slots missing", missing, expected),
        }
    }
}

/// Outcome of promoting one local day for one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionResult {
    pub date: NaiveDate,
    pub series: String,
    pub promoted: bool,
    /// Canonical rows written (0 when rejected).
    pub row_count: usize,
    pub expected_slots: usize,
    pub reason: Option<RejectionReason>,
}

impl PromotionResult {
    /// Convert a rejection into [`PipelineError::IncompleteWindow`].
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.reason {
            Some(RejectionReason::IncompleteWindow {
                missing, expected, ..
            }) => Err(PipelineError::IncompleteWindow {
                date: self.date,
                series: self.series,
                missing,
                expected,
            }),
            None => Ok(self),
        }
    }
}

/// Totals over a multi-day promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangePromotionSummary {
    pub days_attempted: usize,
    pub days_succeeded: usize,
    pub rows_total: usize,
    /// Days not promoted, with the rejection or error text.
    pub failed: Vec<(NaiveDate, String)>,
}

/// Staging coverage of one series over a local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCoverage {
    pub metric_code: String,
    pub region_code: String,
    pub raw_rows: usize,
    pub distinct_slots: usize,
    pub expected_slots: usize,
    pub missing_slots: usize,
    pub complete: bool,
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Pick the winning raw row for every slot of the window.
///
/// Rows outside the window are ignored. Ties on `ingested_at` go to the row
/// appended later. The winner's value is kept as-is, NULL included.
pub fn resolve_last_write_wins<'a>(
    raw: &'a [RawObservation],
    window: &PromotionWindow,
) -> BTreeMap<TimeSlot, &'a RawObservation> {
    let mut winners: BTreeMap<TimeSlot, &RawObservation> = BTreeMap::new();
    for row in raw.iter().filter(|r| window.contains(r.slot)) {
        winners
            .entry(row.slot)
            .and_modify(|current| {
                if row.recency() > current.recency() {
                    *current = row;
                }
            })
            .or_insert(row);
    }
    winners
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct PromotionEngine<S> {
    store: Arc<S>,
    rules: TimezoneRules,
}

impl<S> PromotionEngine<S>
where
    S: StagingStore + CanonicalStore,
{
    pub fn new(store: Arc<S>, rules: TimezoneRules) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &TimezoneRules {
        &self.rules
    }

    /// Promote one local day of `series` from staging into canonical.
    ///
    /// Rejection by the completeness gate is `Ok` with `promoted = false`;
    /// only collaborator failures are `Err`.
    pub fn promote(
        &self,
        local_date: NaiveDate,
        series: &SeriesKey,
    ) -> Result<PromotionResult, PipelineError> {
        let window = PromotionWindow::for_date(local_date, &self.rules);

        let raw = self
            .store
            .read_window(window.start, window.end, series)
            .map_err(|e| PipelineError::storage(format!("read staging {} {}", series, local_date), e))?;

        let winners = resolve_last_write_wins(&raw, &window);

        let missing: Vec<TimeSlot> = window
            .expected
            .iter()
            .filter(|slot| !winners.contains_key(*slot))
            .copied()
            .collect();

        if !missing.is_empty() {
            warn!(
                date = %local_date,
                series = %series,
                missing = missing.len(),
                expected = window.expected_count(),
                first_missing = %missing[0],
                "Promotion rejected: incomplete window"
            );
            return Ok(PromotionResult {
                date: local_date,
                series: series.to_string(),
                promoted: false,
                row_count: 0,
                expected_slots: window.expected_count(),
                reason: Some(RejectionReason::IncompleteWindow {
                    missing: missing.len(),
                    expected: window.expected_count(),
                    first_missing: missing.first().copied(),
                }),
            });
        }

        let promoted_at = Utc::now();
        let rows: Vec<CanonicalReading> = window
            .expected
            .iter()
            .filter_map(|slot| winners.get(slot))
            .map(|raw| CanonicalReading {
                slot: raw.slot,
                series: series.clone(),
                value: raw.value,
                source: raw.source.clone(),
                promoted_at,
            })
            .collect();

        let written = self
            .store
            .replace_window(window.start, window.end, series, &rows)
            .map_err(|e| PipelineError::storage(format!("replace canonical {} {}", series, local_date), e))?;

        info!(
            date = %local_date,
            series = %series,
            rows = written,
            raw_rows = raw.len(),
            nulls = rows.iter().filter(|r| r.value.is_none()).count(),
            "Promoted window"
        );

        Ok(PromotionResult {
            date: local_date,
            series: series.to_string(),
            promoted: true,
            row_count: written,
            expected_slots: window.expected_count(),
            reason: None,
        })
    }

    /// Promote every day in `[start, end]`, continuing past failed days.
    pub fn promote_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        series: &SeriesKey,
    ) -> Result<RangePromotionSummary, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidRequest(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let mut summary = RangePromotionSummary::default();
        let mut day = start;
        while day <= end {
            summary.days_attempted += 1;
            match self.promote(day, series) {
                Ok(result) if result.promoted => {
                    summary.days_succeeded += 1;
                    summary.rows_total += result.row_count;
                }
                Ok(result) => {
                    let reason = result
                        .reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "not promoted".to_string());
                    summary.failed.push((day, reason));
                }
                Err(e) => {
                    warn!(date = %day, series = %series, error = %e, "Promotion failed");
                    summary.failed.push((day, e.to_string()));
                }
            }
            day += Duration::days(1);
        }

        info!(
            series = %series,
            attempted = summary.days_attempted,
            succeeded = summary.days_succeeded,
            rows = summary.rows_total,
            "Range promotion finished"
        );
        Ok(summary)
    }

    /// Staging coverage per series for one local day.
    pub fn coverage(&self, local_date: NaiveDate) -> Result<Vec<SlotCoverage>, PipelineError> {
        let window = PromotionWindow::for_date(local_date, &self.rules);
        let counts = self
            .store
            .row_counts(window.start, window.end)
            .map_err(|e| PipelineError::storage(format!("count staging {}", local_date), e))?;

        let expected = window.expected_count();
        Ok(counts
            .into_iter()
            .map(|c| {
                let missing = expected.saturating_sub(c.distinct_slots);
                SlotCoverage {
                    metric_code: c.metric_code,
                    region_code: c.region_code,
                    raw_rows: c.rows,
                    distinct_slots: c.distinct_slots,
                    expected_slots: expected,
                    missing_slots: missing,
                    complete: missing == 0,
                }
            })
            .collect())
    }

    /// Latest local day whose final slot is present in canonical.
    pub fn latest_complete_local_day(&self) -> Result<Option<NaiveDate>, PipelineError> {
        let latest = self
            .store
            .latest_slot()
            .map_err(|e| PipelineError::storage("latest canonical slot", e))?;

        let Some(latest) = latest else {
            return Ok(None);
        };

        let date = self.rules.local_date_of(latest);
        let window = PromotionWindow::for_date(date, &self.rules);
        let day = if latest.next() == window.end {
            Some(date)
        } else {
            date.pred_opt()
        };
        debug!(latest = %latest, day = ?day, "Resolved latest complete local day");
        Ok(day)
    }
}
