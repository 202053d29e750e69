//! Pipeline error taxonomy.

use chrono::NaiveDate;

use crate::series::TimeSlot;

/// Errors surfaced by promotion, forecasting and backfill.
#[derive(Debug)]
pub enum PipelineError {
    /// Promotion rejected: at least one expected slot has no staging row.
    /// Non-fatal; retry once ingestion catches up.
    IncompleteWindow {
        date: NaiveDate,
        series: String,
        missing: usize,
        expected: usize,
    },
    /// A collaborator store failed. Fatal for the current window or run only.
    Storage {
        context: String,
        source: anyhow::Error,
    },
    /// The primary model declined the training window. Triggers the fallback.
    InsufficientTrainingData { have: usize, need: usize },
    /// The primary model could not be solved. Triggers the fallback.
    ModelDidNotConverge { detail: String },
    /// Neither model can run: the training window holds no value at all.
    EmptyTrainingData {
        forecast_date: NaiveDate,
        series: String,
        train_days: u32,
    },
    /// Post-processing could not restore `lower <= point <= upper`.
    InvalidBounds {
        slot: TimeSlot,
        lower: f64,
        point: f64,
        upper: f64,
    },
    /// No dimension rows for the requested (metric, region).
    UnknownSeries { metric_code: String, region_code: String },
    /// Caller passed arguments that cannot describe a unit of work.
    InvalidRequest(String),
}

impl PipelineError {
    pub fn storage(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying later (with no code change) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IncompleteWindow { .. })
    }

    /// Whether the primary model declined and the fallback should run.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::InsufficientTrainingData { .. } | Self::ModelDidNotConverge { .. }
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompleteWindow {
                date,
                series,
                missing,
                expected,
            } => write!(
                f,
                "incomplete window {} for {}: {} of {} expected slots missing",
                date, series, missing, expected
            ),
            Self::Storage { context, source } => write!(f, "storage failure ({}): {:#}", context, source),
            Self::InsufficientTrainingData { have, need } => write!(
                f,
                "insufficient training data: {} non-null points, need {}",
                have, need
            ),
            Self::ModelDidNotConverge { detail } => write!(f, "model did not converge: {}", detail),
            Self::EmptyTrainingData {
                forecast_date,
                series,
                train_days,
            } => write!(
                f,
                "empty training window for {} forecast on {} ({} days)",
                series, forecast_date, train_days
            ),
            Self::InvalidBounds {
                slot,
                lower,
                point,
                upper,
            } => write!(
                f,
                "invalid forecast bounds at {}: lower={} point={} upper={}",
                slot, lower, point, upper
            ),
            Self::UnknownSeries {
                metric_code,
                region_code,
            } => write!(f, "unknown series {}/{}", metric_code, region_code),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(&**source),
            _ => None,
        }
    }
}
