//! Forecast Orchestrator
//!
//! Produces a next-day forecast for one series from canonical history only:
//!
//! - Training window `[start(D - train_days), start(D))`; nothing at or after
//!   the first slot of `D` is ever read into the fit
//! - Horizon is the expected slot set of `D` (92, 96 or 100 slots)
//! - Primary model first, slot-median fallback when it declines
//! - Clip, verify bounds, then upsert the whole horizon in one transaction

pub mod models;
pub mod postprocess;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::calendar::{day_bounds, expected_slots, TimezoneRules};
use crate::config::ForecastConfig;
use crate::error::PipelineError;
use crate::series::{ForecastPoint, ForecastRun, SeriesKey};
use crate::warehouse::{CanonicalStore, ForecastStore};

pub use models::{
    run_models, AdditiveSeasonalModel, ForecastModel, ModelOutcome, ModelUsage, SlotMedianFallback,
    TrainingSet, FALLBACK_MODEL_NAME, PRIMARY_MODEL_NAME,
};
pub use postprocess::clip_and_verify;

/// What was persisted for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub rows_written: usize,
    pub model_name: String,
    pub model_used: ModelUsage,
}

/// Result of one forecast run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRunResult {
    pub run: ForecastRun,
    pub points: Vec<ForecastPoint>,
    pub model_used: ModelUsage,
    /// Why the primary model declined, when the fallback ran.
    pub primary_failure: Option<String>,
    pub training_points: usize,
    pub stored: StoreSummary,
}

pub struct ForecastOrchestrator<S> {
    store: Arc<S>,
    rules: TimezoneRules,
    primary: AdditiveSeasonalModel,
    fallback: SlotMedianFallback,
}

impl<S> ForecastOrchestrator<S>
where
    S: CanonicalStore + ForecastStore,
{
    pub fn new(store: Arc<S>, rules: TimezoneRules, config: &ForecastConfig) -> Self {
        Self {
            store,
            rules,
            primary: AdditiveSeasonalModel::from_config(config),
            fallback: SlotMedianFallback::from_config(config),
        }
    }

    /// Non-null canonical values strictly before the first slot of `forecast_date`.
    pub fn training_set(
        &self,
        forecast_date: NaiveDate,
        series: &SeriesKey,
        train_days: u32,
    ) -> Result<TrainingSet, PipelineError> {
        let train_start_date = forecast_date
            .checked_sub_days(Days::new(u64::from(train_days)))
            .ok_or_else(|| {
                PipelineError::InvalidRequest(format!(
                    "train_days {} reaches before the earliest representable date",
                    train_days
                ))
            })?;
        let (train_start, _) = day_bounds(train_start_date, &self.rules);
        let (cutoff, _) = day_bounds(forecast_date, &self.rules);

        let rows = self
            .store
            .read_range(train_start, cutoff, series)
            .map_err(|e| PipelineError::storage(format!("read canonical {} training", series), e))?;

        let points = rows
            .into_iter()
            .filter(|r| r.slot < cutoff)
            .filter_map(|r| r.value.map(|v| (r.slot, v)))
            .collect();

        Ok(TrainingSet::new(points, train_days))
    }

    /// Forecast every slot of `forecast_date` for `series` and persist it.
    pub fn forecast(
        &self,
        forecast_date: NaiveDate,
        series: &SeriesKey,
        train_days: u32,
    ) -> Result<ForecastRunResult, PipelineError> {
        if train_days == 0 {
            return Err(PipelineError::InvalidRequest(
                "train_days must be positive".to_string(),
            ));
        }

        let training = self.training_set(forecast_date, series, train_days)?;
        if training.is_empty() {
            return Err(PipelineError::EmptyTrainingData {
                forecast_date,
                series: series.to_string(),
                train_days,
            });
        }

        let horizon = expected_slots(forecast_date, &self.rules);

        let (model_name, raw_points, model_used, primary_failure) =
            match run_models(&self.primary, &self.fallback, &training, &horizon, &self.rules) {
                ModelOutcome::Primary { model_name, points } => {
                    (model_name, points, ModelUsage::Primary, None)
                }
                ModelOutcome::Fallback {
                    model_name,
                    points,
                    primary_failure,
                } => {
                    warn!(
                        forecast_date = %forecast_date,
                        series = %series,
                        reason = %primary_failure,
                        "Primary model declined, using fallback"
                    );
                    (model_name, points, ModelUsage::Fallback, Some(primary_failure))
                }
                ModelOutcome::Failed(e) => return Err(e),
            };

        let points = clip_and_verify(raw_points)?;

        let run = ForecastRun {
            forecast_date,
            series: series.clone(),
            train_days,
            model_name: model_name.to_string(),
            generated_at: Utc::now(),
        };

        let rows_written = self
            .store
            .upsert(&run, &points)
            .map_err(|e| PipelineError::storage(format!("upsert forecast {} {}", series, forecast_date), e))?;

        info!(
            forecast_date = %forecast_date,
            series = %series,
            model = model_name,
            train_days,
            training_points = training.len(),
            rows = rows_written,
            "Forecast stored"
        );

        Ok(ForecastRunResult {
            stored: StoreSummary {
                rows_written,
                model_name: run.model_name.clone(),
                model_used,
            },
            run,
            points,
            model_used,
            primary_failure,
            training_points: training.len(),
        })
    }
}
