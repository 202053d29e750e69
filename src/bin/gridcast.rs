//! Gridcast operator CLI
//!
//! Usage:
//!   gridcast init
//!   gridcast stage --file readings.jsonl
//!   gridcast promote --date 2025-01-15 [--end 2025-01-31] [--metric demand_actual]
//!   gridcast coverage --date 2025-01-15
//!   gridcast forecast --date 2025-01-16 --metric demand_actual --train-days 60
//!   gridcast backfill --start 2025-01-01 --end 2025-01-31 [--no-forecasts]
//!   gridcast latest

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gridcast::backfill::{BackfillCoordinator, BackfillOptions, DateRange};
use gridcast::config::PipelineConfig;
use gridcast::forecast::ForecastOrchestrator;
use gridcast::promotion::PromotionEngine;
use gridcast::series::{NewObservation, SeriesKey, TimeSlot};
use gridcast::warehouse::{
    CanonicalStore, DimensionLookup, StagingStore, WarehouseStore, WarehouseStoreConfig,
};

/// Telemetry reconciliation and day-ahead forecasting
#[derive(Parser, Debug)]
#[command(name = "gridcast")]
#[command(about = "Promote staged telemetry into canonical facts and forecast the next day")]
struct Cli {
    /// Path to the TOML config (defaults to $GRIDCAST_CONFIG_PATH or gridcast.toml)
    #[arg(short, long, env = "GRIDCAST_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Override the warehouse path
    #[arg(long, env = "GRIDCAST_DB_PATH")]
    db_path: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the schema and seed default dimensions
    Init,

    /// Append JSON-lines readings to staging
    Stage {
        /// Input file ("-" for stdin)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Promote one day (or an inclusive range) from staging into canonical
    Promote {
        #[arg(short, long)]
        date: NaiveDate,

        /// Last day of a range
        #[arg(short, long)]
        end: Option<NaiveDate>,

        /// Metric code (all seeded metrics if omitted)
        #[arg(short, long)]
        metric: Option<String>,

        #[arg(short, long)]
        region: Option<String>,
    },

    /// Staging coverage per series for a local day
    Coverage {
        #[arg(short, long)]
        date: NaiveDate,
    },

    /// Forecast every slot of a local day
    Forecast {
        /// Day to forecast; training ends the day before
        #[arg(short, long)]
        date: NaiveDate,

        #[arg(short, long)]
        metric: Option<String>,

        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long)]
        train_days: Option<u32>,
    },

    /// Promote and forecast day by day over a historical range
    Backfill {
        #[arg(short, long)]
        start: NaiveDate,

        #[arg(short, long)]
        end: NaiveDate,

        #[arg(short, long)]
        metric: Option<String>,

        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long)]
        train_days: Option<u32>,

        /// Promote only
        #[arg(long)]
        no_forecasts: bool,
    },

    /// Latest complete local day in canonical
    Latest,
}

/// One staging input line.
#[derive(Debug, Deserialize)]
struct StageRecord {
    ts_utc: String,
    metric_code: String,
    region_code: Option<String>,
    value: Option<f64>,
    source: Option<String>,
    ingested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct LatestDay {
    latest_slot: Option<TimeSlot>,
    latest_complete_day: Option<NaiveDate>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PipelineConfig::from_env(),
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Resolve one series, or every seeded metric of the region.
fn resolve_series(
    store: &WarehouseStore,
    config: &PipelineConfig,
    metric: Option<&str>,
    region: Option<&str>,
) -> Result<Vec<SeriesKey>> {
    let region = region.unwrap_or(&config.default_region);
    match metric {
        Some(metric) => {
            let series = store.resolve(metric, region)?.ok_or_else(|| {
                anyhow::anyhow!("unknown series {}/{} (run `gridcast init`?)", metric, region)
            })?;
            Ok(vec![series])
        }
        None => {
            let all: Vec<SeriesKey> = store
                .list_series()?
                .into_iter()
                .filter(|s| s.region_code == region)
                .collect();
            if all.is_empty() {
                anyhow::bail!("no series for region {} (run `gridcast init`?)", region);
            }
            Ok(all)
        }
    }
}

fn read_stage_records(file: &PathBuf) -> Result<Vec<NewObservation>> {
    let reader: Box<dyn BufRead> = if file.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let f = std::fs::File::open(file)
            .with_context(|| format!("Failed to open {}", file.display()))?;
        Box::new(BufReader::new(f))
    };

    let now = Utc::now();
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: StageRecord = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", idx + 1))?;
        let slot = TimeSlot::parse(&record.ts_utc).ok_or_else(|| {
            anyhow::anyhow!(
                "line {}: ts_utc '{}' is not a 15-minute UTC slot",
                idx + 1,
                record.ts_utc
            )
        })?;
        rows.push(NewObservation {
            slot,
            metric_code: record.metric_code,
            region_code: record.region_code.unwrap_or_else(|| "ALL".to_string()),
            value: record.value,
            source: record.source.unwrap_or_else(|| "cli".to_string()),
            ingested_at: record.ingested_at.unwrap_or(now),
        });
    }
    Ok(rows)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Arc::new(WarehouseStore::open(WarehouseStoreConfig::from(&config))?);

    match &cli.command {
        Commands::Init => {
            store.seed_defaults()?;
            info!(path = %store.db_path(), "Warehouse initialized");
            if cli.json {
                print_json(&store.list_series()?)?;
            } else {
                for series in store.list_series()? {
                    println!("{}", series);
                }
            }
        }

        Commands::Stage { file } => {
            let rows = read_stage_records(file)?;
            let written = store.append(&rows)?;
            if cli.json {
                print_json(&serde_json::json!({ "rows_staged": written }))?;
            } else {
                println!("Staged {} rows", written);
            }
        }

        Commands::Promote {
            date,
            end,
            metric,
            region,
        } => {
            let engine = PromotionEngine::new(store.clone(), config.timezone);
            for series in resolve_series(&store, &config, metric.as_deref(), region.as_deref())? {
                match end {
                    Some(end) => {
                        let summary = engine.promote_range(*date, *end, &series)?;
                        if cli.json {
                            print_json(&summary)?;
                        } else {
                            println!(
                                "{}: {}/{} days promoted, {} rows",
                                series, summary.days_succeeded, summary.days_attempted, summary.rows_total
                            );
                            for (day, reason) in &summary.failed {
                                println!("  {}: {}", day, reason);
                            }
                        }
                    }
                    None => {
                        let result = engine.promote(*date, &series)?;
                        if cli.json {
                            print_json(&result)?;
                        } else if result.promoted {
                            println!("{} {}: promoted {} rows", series, date, result.row_count);
                        } else {
                            let reason = result.reason.map(|r| r.to_string()).unwrap_or_default();
                            println!("{} {}: rejected ({})", series, date, reason);
                        }
                    }
                }
            }
        }

        Commands::Coverage { date } => {
            let engine = PromotionEngine::new(store.clone(), config.timezone);
            let coverage = engine.coverage(*date)?;
            if cli.json {
                print_json(&coverage)?;
            } else {
                println!("{:<16} {:<8} {:>8} {:>8} {:>8} {:>8}", "metric", "region", "raw", "slots", "expected", "missing");
                for c in &coverage {
                    println!(
                        "{:<16} {:<8} {:>8} {:>8} {:>8} {:>8}",
                        c.metric_code, c.region_code, c.raw_rows, c.distinct_slots, c.expected_slots, c.missing_slots
                    );
                }
            }
        }

        Commands::Forecast {
            date,
            metric,
            region,
            train_days,
        } => {
            let orchestrator = ForecastOrchestrator::new(store.clone(), config.timezone, &config.forecast);
            let train_days = train_days.unwrap_or(config.forecast.train_days);
            for series in resolve_series(&store, &config, metric.as_deref(), region.as_deref())? {
                let result = orchestrator.forecast(*date, &series, train_days)?;
                if cli.json {
                    print_json(&result)?;
                } else {
                    println!(
                        "{} {}: {} points via {} ({} training points)",
                        series,
                        date,
                        result.stored.rows_written,
                        result.run.model_name,
                        result.training_points
                    );
                    if let Some(reason) = &result.primary_failure {
                        println!("  primary declined: {}", reason);
                    }
                }
            }
        }

        Commands::Backfill {
            start,
            end,
            metric,
            region,
            train_days,
            no_forecasts,
        } => {
            let range = DateRange::new(*start, *end)?;
            let options = BackfillOptions {
                with_forecasts: !no_forecasts,
                train_days: train_days.unwrap_or(config.forecast.train_days),
            };
            let coordinator = BackfillCoordinator::new(store.clone(), config.timezone, &config.forecast);
            for series in resolve_series(&store, &config, metric.as_deref(), region.as_deref())? {
                let summary = coordinator.backfill(range, &series, options);
                if cli.json {
                    print_json(&summary)?;
                } else {
                    print!("{}", summary.format_report());
                }
            }
        }

        Commands::Latest => {
            let engine = PromotionEngine::new(store.clone(), config.timezone);
            let latest = LatestDay {
                latest_slot: store.latest_slot()?,
                latest_complete_day: engine.latest_complete_local_day()?,
            };
            if cli.json {
                print_json(&latest)?;
            } else {
                match latest.latest_complete_day {
                    Some(day) => println!("{}", day),
                    None => println!("no canonical data"),
                }
            }
        }
    }

    Ok(())
}
