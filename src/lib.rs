//! Gridcast Library
//!
//! Telemetry reconciliation and leakage-safe day-ahead forecasting over a
//! 15-minute canonical time axis.
//!
//! Staging (append-only) -> Promotion Engine -> Canonical -> Forecast
//! Orchestrator -> Forecasts, with the Backfill Coordinator sequencing the two
//! engines over historical ranges.

pub mod backfill;
pub mod calendar;
pub mod config;
pub mod error;
pub mod forecast;
pub mod promotion;
pub mod series;
pub mod warehouse;

pub use backfill::{BackfillCoordinator, BackfillOptions, BackfillSummary, CancelFlag, DateRange};
pub use calendar::{expected_slots, PromotionWindow, TimezoneRules};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use forecast::{ForecastOrchestrator, ForecastRunResult};
pub use promotion::{PromotionEngine, PromotionResult};
pub use series::{SeriesKey, TimeSlot};
pub use warehouse::{WarehouseStore, WarehouseStoreConfig};
