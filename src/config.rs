//! Pipeline configuration
//!
//! Loaded from a TOML file with per-section defaults, then overridden from the
//! environment. Every field has a default so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calendar::TimezoneRules;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Path to the SQLite warehouse.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Region code used when none is given.
    #[serde(default = "default_region_code")]
    pub default_region: String,

    /// Timezone calendar for local-day windows.
    #[serde(default)]
    pub timezone: TimezoneRules,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_db_path() -> String {
    "db/gridcast.db".to_string()
}

fn default_region_code() -> String {
    "ALL".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_region: default_region_code(),
            timezone: TimezoneRules::default(),
            forecast: ForecastConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `GRIDCAST_CONFIG_PATH` (or `gridcast.toml`), then apply env overrides.
    pub fn from_env() -> Self {
        let path =
            std::env::var("GRIDCAST_CONFIG_PATH").unwrap_or_else(|_| "gridcast.toml".to_string());

        let mut config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default pipeline config ({}): {}", path, e);
            Self::default()
        });

        if let Ok(db_path) = std::env::var("GRIDCAST_DB_PATH") {
            config.db_path = db_path;
        }

        if let Ok(days) = std::env::var("GRIDCAST_TRAIN_DAYS") {
            if let Ok(n) = days.parse() {
                config.forecast.train_days = n;
            }
        }

        config
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timezone.standard_offset_minutes % 15 != 0 {
            anyhow::bail!(
                "timezone.standard_offset_minutes must be a multiple of 15 (got {})",
                self.timezone.standard_offset_minutes
            );
        }
        if self.forecast.train_days == 0 {
            anyhow::bail!("forecast.train_days must be positive");
        }
        if !(0.0..1.0).contains(&self.forecast.interval_width) || self.forecast.interval_width == 0.0 {
            anyhow::bail!(
                "forecast.interval_width must be in (0, 1) (got {})",
                self.forecast.interval_width
            );
        }
        if self.forecast.min_training_points == 0 {
            anyhow::bail!("forecast.min_training_points must be positive");
        }
        let mad = self.forecast.fallback_mad_multiplier;
        if !mad.is_finite() || mad < 0.0 {
            anyhow::bail!(
                "forecast.fallback_mad_multiplier must be finite and non-negative (got {})",
                mad
            );
        }
        Ok(())
    }
}

/// Forecast model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Default training window length (days).
    #[serde(default = "default_train_days")]
    pub train_days: u32,

    /// Minimum non-null training points the primary model accepts.
    #[serde(default = "default_min_training_points")]
    pub min_training_points: usize,

    /// Central coverage of the primary model's interval.
    #[serde(default = "default_interval_width")]
    pub interval_width: f64,

    /// Fourier pairs for the daily cycle.
    #[serde(default = "default_daily_order")]
    pub daily_fourier_order: usize,

    /// Fourier pairs for the weekly cycle.
    #[serde(default = "default_weekly_order")]
    pub weekly_fourier_order: usize,

    /// Weekly terms are only fitted on windows at least this long.
    #[serde(default = "default_weekly_min_days")]
    pub weekly_min_days: u32,

    /// Half-width of the fallback interval in MADs.
    #[serde(default = "default_fallback_mad_multiplier")]
    pub fallback_mad_multiplier: f64,
}

fn default_train_days() -> u32 {
    60
}

fn default_min_training_points() -> usize {
    96
}

fn default_interval_width() -> f64 {
    0.9
}

fn default_daily_order() -> usize {
    6
}

fn default_weekly_order() -> usize {
    3
}

fn default_weekly_min_days() -> u32 {
    14
}

fn default_fallback_mad_multiplier() -> f64 {
    2.0
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            train_days: default_train_days(),
            min_training_points: default_min_training_points(),
            interval_width: default_interval_width(),
            daily_fourier_order: default_daily_order(),
            weekly_fourier_order: default_weekly_order(),
            weekly_min_days: default_weekly_min_days(),
            fallback_mad_multiplier: default_fallback_mad_multiplier(),
        }
    }
}

/// SQLite tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Busy timeout (milliseconds) while another connection holds the write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}
