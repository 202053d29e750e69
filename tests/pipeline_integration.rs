//! End-to-end tests over an on-disk warehouse
//!
//! Stage raw readings, promote, forecast and backfill through the public API,
//! then drive the same flow through the `gridcast` binary.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::io::Write;
use std::process::Command;
use std::sync::Arc;

use gridcast::backfill::{BackfillCoordinator, BackfillOptions, DateRange};
use gridcast::calendar::{expected_slots, PromotionWindow, TimezoneRules};
use gridcast::config::{ForecastConfig, PipelineConfig};
use gridcast::forecast::{ForecastOrchestrator, PRIMARY_MODEL_NAME};
use gridcast::promotion::PromotionEngine;
use gridcast::series::NewObservation;
use gridcast::warehouse::{
    CanonicalStore, DimensionLookup, ForecastStore, StagingStore, WarehouseStore,
    WarehouseStoreConfig,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn ingested(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_730_000_000 + secs, 0).unwrap()
}

fn open_store(dir: &tempfile::TempDir) -> Arc<WarehouseStore> {
    let config = WarehouseStoreConfig {
        db_path: dir.path().join("warehouse.db").to_string_lossy().into_owned(),
        ..WarehouseStoreConfig::default()
    };
    let store = Arc::new(WarehouseStore::open(config).unwrap());
    store.seed_defaults().unwrap();
    store
}

/// A demand-like curve: overnight trough, evening peak.
fn demand_at(rules: &TimezoneRules, slot: gridcast::TimeSlot) -> f64 {
    let local = rules.local_time_of(slot);
    let hour = local.hour() as f64 + local.minute() as f64 / 60.0;
    3000.0 + 1200.0 * (-((hour - 18.0) / 3.0).powi(2)).exp() + 5.0 * hour
}

fn stage_days(store: &WarehouseStore, rules: &TimezoneRules, from: NaiveDate, to: NaiveDate) {
    let mut day = from;
    while day <= to {
        let rows: Vec<NewObservation> = expected_slots(day, rules)
            .into_iter()
            .map(|slot| NewObservation {
                slot,
                metric_code: "demand_actual".into(),
                region_code: "ALL".into(),
                value: Some(demand_at(rules, slot)),
                source: "integration".into(),
                ingested_at: ingested(0),
            })
            .collect();
        store.append(&rows).unwrap();
        day += Duration::days(1);
    }
}

#[test]
fn test_stage_promote_forecast_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let rules = TimezoneRules::europe_dublin();
    let series = store.resolve("demand_actual", "ALL").unwrap().unwrap();

    stage_days(&store, &rules, d(2025, 3, 1), d(2025, 3, 20));

    // Duplicate late corrections for one slot of the last day.
    let last = PromotionWindow::for_date(d(2025, 3, 20), &rules);
    let corrected = last.expected[30];
    store
        .append(&[
            NewObservation {
                slot: corrected,
                metric_code: "demand_actual".into(),
                region_code: "ALL".into(),
                value: Some(1.0),
                source: "revision".into(),
                ingested_at: ingested(600),
            },
            NewObservation {
                slot: corrected,
                metric_code: "demand_actual".into(),
                region_code: "ALL".into(),
                value: Some(2.0),
                source: "revision".into(),
                ingested_at: ingested(300),
            },
        ])
        .unwrap();

    let engine = PromotionEngine::new(store.clone(), rules);
    let summary = engine.promote_range(d(2025, 3, 1), d(2025, 3, 20), &series).unwrap();
    assert_eq!(summary.days_succeeded, 20);
    assert_eq!(summary.rows_total, 20 * 96);

    let row = store.read_range(corrected, corrected.next(), &series).unwrap();
    assert_eq!(row[0].value, Some(1.0));
    assert_eq!(row[0].source, "revision");
    assert_eq!(engine.latest_complete_local_day().unwrap(), Some(d(2025, 3, 20)));

    let orchestrator = ForecastOrchestrator::new(store.clone(), rules, &ForecastConfig::default());
    let result = orchestrator.forecast(d(2025, 3, 21), &series, 14).unwrap();
    assert_eq!(result.run.model_name, PRIMARY_MODEL_NAME);
    assert_eq!(result.points.len(), 96);
    for p in &result.points {
        assert!(p.lower >= 0.0 && p.lower <= p.point && p.point <= p.upper);
    }

    // The evening peak survives into the forecast.
    let peak = result
        .points
        .iter()
        .max_by(|a, b| a.point.total_cmp(&b.point))
        .unwrap();
    let peak_hour = rules.local_time_of(peak.slot).hour();
    assert!((16..=20).contains(&peak_hour), "peak at {}", peak_hour);

    let stored = store
        .read_points(d(2025, 3, 21), &series, PRIMARY_MODEL_NAME, 14)
        .unwrap();
    assert_eq!(stored.len(), 96);
}

#[test]
fn test_backfill_across_spring_forward() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let rules = TimezoneRules::europe_dublin();
    let series = store.resolve("demand_actual", "ALL").unwrap().unwrap();

    stage_days(&store, &rules, d(2025, 3, 25), d(2025, 4, 1));

    let coordinator = BackfillCoordinator::new(store.clone(), rules, &ForecastConfig::default());
    let summary = coordinator.backfill(
        DateRange::new(d(2025, 3, 25), d(2025, 4, 1)).unwrap(),
        &series,
        BackfillOptions {
            with_forecasts: true,
            train_days: 5,
        },
    );

    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.succeeded.len(), 8);

    let spring = summary.days.iter().find(|o| o.date == d(2025, 3, 30)).unwrap();
    assert_eq!(spring.canonical_rows, 92);
    let before = summary.days.iter().find(|o| o.date == d(2025, 3, 29)).unwrap();
    // Forecast for the short day covers only its 92 slots.
    assert_eq!(before.forecast_rows, 92);
    assert_eq!(store.count_forecasts(d(2025, 3, 30), &series).unwrap(), 92);
}

#[test]
fn test_reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let rules = TimezoneRules::europe_dublin();
    {
        let store = open_store(&dir);
        stage_days(&store, &rules, d(2025, 1, 10), d(2025, 1, 10));
    }
    let store = open_store(&dir);
    let series = store.resolve("demand_actual", "ALL").unwrap().unwrap();
    let engine = PromotionEngine::new(store.clone(), rules);
    assert!(engine.promote(d(2025, 1, 10), &series).unwrap().promoted);
    assert_eq!(store.count_staging().unwrap(), 96);
}

#[test]
fn test_cli_init_stage_promote() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cli.db");
    let cfg = dir.path().join("gridcast.toml");
    let mut config = PipelineConfig::default();
    config.db_path = db.to_string_lossy().into_owned();
    config.save(&cfg).unwrap();

    let run = |args: &[&str]| {
        let output = Command::new(env!("CARGO_BIN_EXE_gridcast"))
            .arg("--config")
            .arg(&cfg)
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "gridcast {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    };

    run(&["init"]);

    let input = dir.path().join("readings.jsonl");
    {
        let mut f = std::fs::File::create(&input).unwrap();
        for slot in expected_slots(d(2025, 1, 10), &TimezoneRules::europe_dublin()) {
            writeln!(
                f,
                r#"{{"ts_utc":"{}","metric_code":"demand_actual","value":100.0}}"#,
                slot.to_ts_utc()
            )
            .unwrap();
        }
    }
    let staged = run(&["stage", "--file", input.to_str().unwrap()]);
    assert!(staged.contains("Staged 96 rows"));

    let promoted = run(&["--json", "promote", "--date", "2025-01-10", "--metric", "demand_actual"]);
    let result: serde_json::Value = serde_json::from_str(&promoted).unwrap();
    assert_eq!(result["promoted"], true);
    assert_eq!(result["row_count"], 96);

    let latest = run(&["latest"]);
    assert_eq!(latest.trim(), "2025-01-10");
}
