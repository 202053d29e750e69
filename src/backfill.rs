//! Backfill Coordinator
//!
//! Replays promotion (and optionally next-day forecasting) over a historical
//! date range, one local day at a time in chronological order:
//!
//! - Day `D` is promoted first; only then is `D + 1` forecast, so training
//!   data always ends with the last promoted day
//! - A failed day is recorded and the run moves on to the next date
//! - Cancellation is honored at date boundaries only
//!
//! Safe to re-run: promotion replaces windows and forecasts upsert.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::calendar::TimezoneRules;
use crate::config::ForecastConfig;
use crate::error::PipelineError;
use crate::forecast::ForecastOrchestrator;
use crate::promotion::PromotionEngine;
use crate::series::SeriesKey;
use crate::warehouse::{CanonicalStore, ForecastStore, StagingStore};

// =============================================================================
// REQUEST
// =============================================================================

/// Inclusive local-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidRequest(format!(
                "backfill start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.succ_opt()).take_while(move |d| *d <= end)
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start).num_days() + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOptions {
    /// Forecast `D + 1` after each successful promotion of `D`.
    pub with_forecasts: bool,
    pub train_days: u32,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            with_forecasts: true,
            train_days: 60,
        }
    }
}

/// The day forecast after promoting `date`.
pub fn next_local_date(date: NaiveDate) -> Result<NaiveDate, PipelineError> {
    date.succ_opt().ok_or_else(|| {
        PipelineError::InvalidRequest(format!("no local date after {} to forecast", date))
    })
}

/// Cooperative cancellation, checked between days.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// What happened to one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub promoted: bool,
    pub canonical_rows: usize,
    /// Date forecast after this day's promotion, if any.
    pub forecast_date: Option<NaiveDate>,
    pub forecast_model: Option<String>,
    pub forecast_rows: usize,
    pub error: Option<String>,
}

impl DayOutcome {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            promoted: false,
            canonical_rows: 0,
            forecast_date: None,
            forecast_model: None,
            forecast_rows: 0,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillSummary {
    pub series: String,
    pub succeeded: Vec<NaiveDate>,
    pub failed: Vec<(NaiveDate, String)>,
    pub days: Vec<DayOutcome>,
    pub cancelled: bool,
    pub duration_secs: f64,
}

impl BackfillSummary {
    pub fn canonical_rows(&self) -> usize {
        self.days.iter().map(|d| d.canonical_rows).sum()
    }

    pub fn forecast_rows(&self) -> usize {
        self.days.iter().map(|d| d.forecast_rows).sum()
    }

    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut out = String::new();

        out.push_str("╔══════════════════════════════════════════════════════════════════════════════╗\n");
        out.push_str("║                           BACKFILL REPORT                                    ║\n");
        out.push_str("╠══════════════════════════════════════════════════════════════════════════════╣\n");
        out.push_str(&format!("║  Series:           {:57} ║\n", self.series));
        out.push_str(&format!(
            "║  Status:           {:57} ║\n",
            if self.cancelled {
                "CANCELLED"
            } else if self.failed.is_empty() {
                "SUCCESS"
            } else {
                "PARTIAL"
            }
        ));
        out.push_str(&format!("║  Duration:         {:>10.2} seconds{:39} ║\n", self.duration_secs, ""));
        out.push_str("╠══════════════════════════════════════════════════════════════════════════════╣\n");
        out.push_str(&format!("║  Days Processed:   {:>10}{:47} ║\n", self.days.len(), ""));
        out.push_str(&format!("║  Days Succeeded:   {:>10}{:47} ║\n", self.succeeded.len(), ""));
        out.push_str(&format!("║  Days Failed:      {:>10}{:47} ║\n", self.failed.len(), ""));
        out.push_str(&format!("║  Canonical Rows:   {:>10}{:47} ║\n", self.canonical_rows(), ""));
        out.push_str(&format!("║  Forecast Rows:    {:>10}{:47} ║\n", self.forecast_rows(), ""));

        if !self.failed.is_empty() {
            out.push_str("╠══════════════════════════════════════════════════════════════════════════════╣\n");
            for (date, reason) in &self.failed {
                let line = format!("{}: {}", date, reason);
                let line: String = line.chars().take(75).collect();
                out.push_str(&format!("║  {:75} ║\n", line));
            }
        }

        out.push_str("╚══════════════════════════════════════════════════════════════════════════════╝\n");

        out
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct BackfillCoordinator<S> {
    promotion: PromotionEngine<S>,
    forecasts: ForecastOrchestrator<S>,
    cancel: Option<CancelFlag>,
}

impl<S> BackfillCoordinator<S>
where
    S: StagingStore + CanonicalStore + ForecastStore,
{
    pub fn new(store: Arc<S>, rules: TimezoneRules, config: &ForecastConfig) -> Self {
        Self {
            promotion: PromotionEngine::new(store.clone(), rules),
            forecasts: ForecastOrchestrator::new(store, rules, config),
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelFlag::is_cancelled)
    }

    /// Run one date: promote, then forecast the following day.
    pub fn run_day(&self, date: NaiveDate, series: &SeriesKey, options: &BackfillOptions) -> DayOutcome {
        let mut outcome = DayOutcome::new(date);

        match self.promotion.promote(date, series).and_then(|r| r.into_result()) {
            Ok(result) => {
                outcome.promoted = true;
                outcome.canonical_rows = result.row_count;
            }
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }

        if !options.with_forecasts {
            return outcome;
        }

        let forecast_date = match next_local_date(date) {
            Ok(next) => next,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.forecast_date = Some(forecast_date);
        match self.forecasts.forecast(forecast_date, series, options.train_days) {
            Ok(result) => {
                outcome.forecast_model = Some(result.run.model_name);
                outcome.forecast_rows = result.stored.rows_written;
            }
            Err(e) => outcome.error = Some(format!("forecast {}: {}", forecast_date, e)),
        }

        outcome
    }

    /// Fold over the range in date order.
    pub fn backfill(
        &self,
        range: DateRange,
        series: &SeriesKey,
        options: BackfillOptions,
    ) -> BackfillSummary {
        let started = Instant::now();
        let mut summary = BackfillSummary {
            series: series.to_string(),
            ..BackfillSummary::default()
        };

        info!(
            series = %series,
            start = %range.start,
            end = %range.end,
            with_forecasts = options.with_forecasts,
            train_days = options.train_days,
            "Starting backfill"
        );

        for date in range.days() {
            if self.is_cancelled() {
                warn!(series = %series, next = %date, "Backfill cancelled");
                summary.cancelled = true;
                break;
            }

            let outcome = self.run_day(date, series, &options);
            match &outcome.error {
                None => summary.succeeded.push(date),
                Some(reason) => {
                    warn!(date = %date, series = %series, reason = %reason, "Backfill day failed");
                    summary.failed.push((date, reason.clone()));
                }
            }
            summary.days.push(outcome);
        }

        summary.duration_secs = started.elapsed().as_secs_f64();

        info!(
            series = %series,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled,
            "Backfill finished"
        );

        summary
    }
}
