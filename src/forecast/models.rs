//! Forecast Models
//!
//! Two variants share one calling convention:
//!
//! - [`AdditiveSeasonalModel`]: least-squares fit of trend plus daily and
//!   weekly Fourier seasonality, Gaussian prediction interval
//! - [`SlotMedianFallback`]: median per local time of day with a MAD band
//!
//! [`run_models`] tries the primary, falls back when it declines, and reports
//! the result as a [`ModelOutcome`] value.

use chrono::{Datelike, NaiveTime, Timelike};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::{Data, Median};
use std::collections::HashMap;
use std::f64::consts::PI;

use crate::calendar::TimezoneRules;
use crate::config::ForecastConfig;
use crate::error::PipelineError;
use crate::series::{ForecastPoint, TimeSlot};

pub const PRIMARY_MODEL_NAME: &str = "additive_seasonal_v1";
pub const FALLBACK_MODEL_NAME: &str = "fallback_slot_median_v1";

const SECS_PER_DAY: f64 = 86_400.0;
const SVD_EPS: f64 = 1e-9;

// =============================================================================
// TRAINING SET
// =============================================================================

/// Non-null training observations, strictly before the forecast horizon.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub points: Vec<(TimeSlot, f64)>,
    /// Length of the requested training window, in days.
    pub window_days: u32,
}

impl TrainingSet {
    pub fn new(points: Vec<(TimeSlot, f64)>, window_days: u32) -> Self {
        Self {
            points,
            window_days,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }
}

/// A forecasting model over local-time seasonality.
pub trait ForecastModel {
    fn name(&self) -> &'static str;

    /// Fit on `training` and predict every slot of `horizon`, in order.
    fn fit_predict(
        &self,
        training: &TrainingSet,
        horizon: &[TimeSlot],
        rules: &TimezoneRules,
    ) -> Result<Vec<ForecastPoint>, PipelineError>;
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Which model produced the forecast, or why none did.
#[derive(Debug)]
pub enum ModelOutcome {
    Primary {
        model_name: &'static str,
        points: Vec<ForecastPoint>,
    },
    Fallback {
        model_name: &'static str,
        points: Vec<ForecastPoint>,
        primary_failure: String,
    },
    Failed(PipelineError),
}

impl ModelOutcome {
    pub fn model_name(&self) -> Option<&'static str> {
        match self {
            Self::Primary { model_name, .. } | Self::Fallback { model_name, .. } => Some(*model_name),
            Self::Failed(_) => None,
        }
    }
}

/// Model usage label for summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelUsage {
    Primary,
    Fallback,
}

/// Run the primary model; on a declining failure run the fallback.
///
/// Failures that do not decline (e.g. bounds violations) are not masked by
/// the fallback.
pub fn run_models(
    primary: &dyn ForecastModel,
    fallback: &dyn ForecastModel,
    training: &TrainingSet,
    horizon: &[TimeSlot],
    rules: &TimezoneRules,
) -> ModelOutcome {
    match primary.fit_predict(training, horizon, rules) {
        Ok(points) => ModelOutcome::Primary {
            model_name: primary.name(),
            points,
        },
        Err(e) if e.triggers_fallback() => match fallback.fit_predict(training, horizon, rules) {
            Ok(points) => ModelOutcome::Fallback {
                model_name: fallback.name(),
                points,
                primary_failure: e.to_string(),
            },
            Err(fallback_err) => ModelOutcome::Failed(fallback_err),
        },
        Err(e) => ModelOutcome::Failed(e),
    }
}

// =============================================================================
// ADDITIVE SEASONAL MODEL
// =============================================================================

/// `y = a + b*t + sum_k daily_k + sum_k weekly_k + e`, fitted by SVD.
#[derive(Debug, Clone)]
pub struct AdditiveSeasonalModel {
    pub min_training_points: usize,
    pub interval_width: f64,
    pub daily_order: usize,
    pub weekly_order: usize,
    pub weekly_min_days: u32,
}

impl AdditiveSeasonalModel {
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            min_training_points: config.min_training_points,
            interval_width: config.interval_width,
            daily_order: config.daily_fourier_order,
            weekly_order: config.weekly_fourier_order,
            weekly_min_days: config.weekly_min_days,
        }
    }

    fn uses_weekly(&self, training: &TrainingSet) -> bool {
        self.weekly_order > 0 && training.window_days >= self.weekly_min_days
    }

    fn param_count(&self, weekly: bool) -> usize {
        2 + 2 * self.daily_order + if weekly { 2 * self.weekly_order } else { 0 }
    }

    /// Design row for one slot. `origin` anchors the trend term.
    fn features(
        &self,
        slot: TimeSlot,
        origin: TimeSlot,
        weekly: bool,
        rules: &TimezoneRules,
    ) -> Vec<f64> {
        let local = rules.local_time_of(slot);
        let day_frac = local.time().num_seconds_from_midnight() as f64 / SECS_PER_DAY;
        let week_frac = (local.weekday().num_days_from_monday() as f64 + day_frac) / 7.0;
        let trend = (slot.unix() - origin.unix()) as f64 / SECS_PER_DAY;

        let mut row = Vec::with_capacity(self.param_count(weekly));
        row.push(1.0);
        row.push(trend);
        for k in 1..=self.daily_order {
            let angle = 2.0 * PI * k as f64 * day_frac;
            row.push(angle.sin());
            row.push(angle.cos());
        }
        if weekly {
            for k in 1..=self.weekly_order {
                let angle = 2.0 * PI * k as f64 * week_frac;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        row
    }

    fn z_score(&self) -> Result<f64, PipelineError> {
        let normal = Normal::new(0.0, 1.0).map_err(|e| PipelineError::ModelDidNotConverge {
            detail: format!("normal distribution: {}", e),
        })?;
        Ok(normal.inverse_cdf(0.5 + self.interval_width / 2.0))
    }
}

impl ForecastModel for AdditiveSeasonalModel {
    fn name(&self) -> &'static str {
        PRIMARY_MODEL_NAME
    }

    fn fit_predict(
        &self,
        training: &TrainingSet,
        horizon: &[TimeSlot],
        rules: &TimezoneRules,
    ) -> Result<Vec<ForecastPoint>, PipelineError> {
        let n = training.len();
        if n < self.min_training_points {
            return Err(PipelineError::InsufficientTrainingData {
                have: n,
                need: self.min_training_points,
            });
        }

        let weekly = self.uses_weekly(training);
        let p = self.param_count(weekly);
        if n <= p {
            return Err(PipelineError::InsufficientTrainingData { have: n, need: p + 1 });
        }

        let origin = training
            .points
            .iter()
            .map(|(slot, _)| *slot)
            .min()
            .ok_or(PipelineError::InsufficientTrainingData { have: 0, need: p + 1 })?;

        let mut design = Vec::with_capacity(n * p);
        for (slot, _) in &training.points {
            design.extend(self.features(*slot, origin, weekly, rules));
        }
        let x = DMatrix::from_row_slice(n, p, &design);
        let y = DVector::from_vec(training.values());

        let beta = x
            .clone()
            .svd(true, true)
            .solve(&y, SVD_EPS)
            .map_err(|e| PipelineError::ModelDidNotConverge {
                detail: e.to_string(),
            })?;

        if beta.iter().any(|b| !b.is_finite()) {
            return Err(PipelineError::ModelDidNotConverge {
                detail: "non-finite coefficients".to_string(),
            });
        }

        let residuals = &y - &x * &beta;
        let sigma = (residuals.norm_squared() / (n - p) as f64).sqrt();
        let half_width = self.z_score()? * sigma;

        let mut points = Vec::with_capacity(horizon.len());
        for slot in horizon {
            let row = DVector::from_vec(self.features(*slot, origin, weekly, rules));
            let point = row.dot(&beta);
            if !point.is_finite() || !half_width.is_finite() {
                return Err(PipelineError::ModelDidNotConverge {
                    detail: format!("non-finite prediction at {}", slot),
                });
            }
            points.push(ForecastPoint {
                slot: *slot,
                point,
                lower: point - half_width,
                upper: point + half_width,
            });
        }

        Ok(points)
    }
}

// =============================================================================
// SLOT MEDIAN FALLBACK
// =============================================================================

/// Median per local time of day; slots never seen use the overall median.
#[derive(Debug, Clone)]
pub struct SlotMedianFallback {
    pub mad_multiplier: f64,
}

impl SlotMedianFallback {
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            mad_multiplier: config.fallback_mad_multiplier,
        }
    }
}

fn median(values: Vec<f64>) -> f64 {
    Data::new(values).median()
}

impl ForecastModel for SlotMedianFallback {
    fn name(&self) -> &'static str {
        FALLBACK_MODEL_NAME
    }

    fn fit_predict(
        &self,
        training: &TrainingSet,
        horizon: &[TimeSlot],
        rules: &TimezoneRules,
    ) -> Result<Vec<ForecastPoint>, PipelineError> {
        if training.is_empty() {
            return Err(PipelineError::InsufficientTrainingData { have: 0, need: 1 });
        }

        let mut by_time: HashMap<NaiveTime, Vec<f64>> = HashMap::new();
        for (slot, value) in &training.points {
            by_time
                .entry(rules.local_time_of(*slot).time())
                .or_default()
                .push(*value);
        }
        let slot_medians: HashMap<NaiveTime, f64> = by_time
            .into_iter()
            .map(|(time, values)| (time, median(values)))
            .collect();

        let values = training.values();
        let overall = median(values.clone());
        let mad = median(values.iter().map(|v| (v - overall).abs()).collect());
        let half_width = self.mad_multiplier * mad;

        Ok(horizon
            .iter()
            .map(|slot| {
                let time = rules.local_time_of(*slot).time();
                let point = slot_medians.get(&time).copied().unwrap_or(overall);
                ForecastPoint {
                    slot: *slot,
                    point,
                    lower: point - half_width,
                    upper: point + half_width,
                }
            })
            .collect())
    }
}
