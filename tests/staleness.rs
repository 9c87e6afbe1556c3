//! Staleness tracking and failure handling across the refresh lifecycle.

mod common;

use std::sync::Arc;

use common::*;
use run_analytics::{
    AnalyticsConfig, AnalyticsEngine, BestEffortCatalog, ComputationKind, DerivedStore,
    InMemoryStore, Lap, StalenessOracle,
};

const HOUR_MS: i64 = 60 * 60 * 1000;

fn km_run(id: i64, start: i64, times: &[f64]) -> run_analytics::ActivityRecord {
    run(id, start, laps(times, 1000.0, Some(150)))
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_absent_tracking_reads_stale() {
    let (engine, _clock) = memory_engine(vec![km_run(1, MAR_10_2024, &[300.0])]);
    for kind in ComputationKind::ALL {
        assert!(engine.is_stale(kind), "{} should start stale", kind);
    }
}

#[test]
fn test_fresh_after_compute() {
    let (engine, _clock) = memory_engine(vec![km_run(1, MAR_10_2024, &[300.0, 305.0])]);
    for kind in ComputationKind::ALL {
        engine.compute(kind).unwrap();
        assert!(!engine.is_stale(kind), "{} still stale after compute", kind);
    }
}

#[test]
fn test_new_activity_only_affects_id_based_kinds() {
    let (engine, _clock) = memory_engine(vec![km_run(1, MAR_10_2024, &[300.0])]);
    engine.force_recompute_all();

    engine.store().add_activity(km_run(2, MAR_10_2024 + DAY, &[295.0]));
    assert!(engine.is_best_efforts_stale());
    assert!(engine.is_period_stats_stale());
    assert!(!engine.is_zone_stats_stale());
    assert!(!engine.is_cumulative_stale());
    assert!(!engine.is_monthly_comparison_stale());

    let report = engine.refresh_stale();
    assert_eq!(
        report.recomputed(),
        vec![ComputationKind::BestEfforts, ComputationKind::PeriodStats]
    );
    assert_eq!(engine.best_efforts(Some(1000)).unwrap()[0].activity_id, 2);
    assert!(!engine.is_best_efforts_stale());
}

#[test]
fn test_deleting_latest_activity_does_not_mark_stale() {
    let (engine, _clock) = memory_engine(vec![
        km_run(1, MAR_10_2024, &[300.0]),
        km_run(2, MAR_10_2024 + DAY, &[295.0]),
    ]);
    engine.force_recompute_all();

    // the id marker only moves forward
    engine.store().set_deleted(2, true).unwrap();
    assert!(!engine.is_best_efforts_stale());
    assert!(!engine.is_period_stats_stale());

    engine.compute_best_efforts().unwrap();
    let km = engine.best_efforts(Some(1000)).unwrap();
    assert_eq!(km.len(), 1);
    assert_eq!(km[0].activity_id, 1);
}

#[test]
fn test_catalog_change_marks_best_efforts_stale() {
    init_logging();
    let store = Arc::new(InMemoryStore::new());
    store.add_activity(km_run(1, MAR_10_2024, &[300.0; 6]));

    let classic = AnalyticsConfig {
        catalog: BestEffortCatalog::classic(),
        ..AnalyticsConfig::default()
    };
    let (first, _clock) = engine_over(store.clone(), Vec::new(), classic);
    first.compute_best_efforts().unwrap();
    assert!(!first.is_best_efforts_stale());

    let (second, _clock) = engine_over(store.clone(), Vec::new(), AnalyticsConfig::default());
    assert!(second.is_best_efforts_stale());
    // period stats do not depend on the catalog
    first.compute_yearly_monthly_stats().unwrap();
    assert!(!second.is_period_stats_stale());

    second.compute_best_efforts().unwrap();
    assert!(!second.is_best_efforts_stale());
    assert!(first.is_best_efforts_stale());
}

#[test]
fn test_freshness_window_boundary() {
    let (engine, clock) = memory_engine(vec![km_run(1, MAR_10_2024, &[300.0])]);
    engine.compute_zone_stats().unwrap();
    engine.compute_cumulative().unwrap();

    clock.advance(HOUR_MS);
    assert!(!engine.is_zone_stats_stale());
    assert!(!engine.is_cumulative_stale());

    clock.advance(1);
    assert!(engine.is_zone_stats_stale());
    assert!(engine.is_cumulative_stale());

    let report = engine.refresh_stale();
    assert_eq!(report.rows_for(ComputationKind::HrZones), Some(6));
    assert!(!engine.is_zone_stats_stale());
}

#[test]
fn test_configured_freshness_window() {
    let config = AnalyticsConfig {
        freshness_window_ms: 5 * 60 * 1000,
        ..AnalyticsConfig::default()
    };
    let (engine, clock) =
        engine_over(InMemoryStore::new(), vec![km_run(1, MAR_10_2024, &[300.0])], config);
    engine.compute_zone_stats().unwrap();
    clock.advance(5 * 60 * 1000 + 1);
    assert!(engine.is_zone_stats_stale());
}

#[test]
fn test_month_rollover_marks_comparison_stale() {
    let (engine, clock) = memory_engine(vec![km_run(1, MAR_10_2024, &[300.0])]);
    engine.refresh_stale();
    assert!(!engine.is_monthly_comparison_stale());

    // 2024-03-31T23:59:59Z
    clock.set(1_711_929_599_000);
    assert!(!engine.is_monthly_comparison_stale());

    // 2024-04-01T00:00:00Z
    clock.set(1_711_929_600_000);
    assert!(engine.is_monthly_comparison_stale());

    engine.compute_monthly_comparison().unwrap();
    let cmp = engine.monthly_comparison().unwrap().unwrap();
    assert_eq!(cmp.month_key(), "2024-04");
    assert_eq!(cmp.current.total_km, 0.0);
    assert_eq!(cmp.other.total_km, 1.0);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_oracle_fails_open() {
    let (engine, _clock) = engine_over(
        FlakyStore::default(),
        vec![km_run(1, MAR_10_2024, &[300.0])],
        AnalyticsConfig::default(),
    );
    engine.force_recompute_all();
    assert!(!engine.is_best_efforts_stale());

    engine.store().set_derived_reads_fail(true);
    for kind in ComputationKind::ALL {
        assert!(engine.is_stale(kind), "{} must read stale on error", kind);
    }

    let clock = run_analytics::FixedClock::new(NOW_MS);
    let oracle = StalenessOracle::new(engine.store(), engine.config(), &clock);
    assert!(oracle.evaluate(ComputationKind::HrZones).is_err());
    assert!(oracle.is_stale(ComputationKind::HrZones));
}

#[test]
fn test_failed_compute_keeps_previous_rows() {
    let (engine, clock) = engine_over(
        FlakyStore::default(),
        vec![km_run(1, MAR_10_2024, &[300.0, 310.0])],
        AnalyticsConfig::default(),
    );
    engine.force_recompute_all();
    let efforts = engine.best_efforts(None).unwrap();
    let zones = engine.zone_stats(None).unwrap();

    engine.store().set_unreachable(true);
    assert!(engine.compute_best_efforts().is_err());
    clock.advance(2 * HOUR_MS);

    let report = engine.refresh_stale();
    assert_eq!(report.failed.len(), ComputationKind::ALL.len());
    assert_eq!(report.total_rows(), 0);
    assert!(report.skipped.is_empty());

    engine.store().set_unreachable(false);
    assert_eq!(engine.best_efforts(None).unwrap(), efforts);
    assert_eq!(engine.zone_stats(None).unwrap(), zones);
    assert!(engine.is_zone_stats_stale());
    assert!(!engine.is_best_efforts_stale());
}

#[test]
fn test_unreadable_activity_is_skipped() {
    let store = FlakyStore::default();
    store.break_laps(2);
    let (engine, _clock) = engine_over(
        store,
        vec![
            km_run(1, MAR_10_2024, &[300.0]),
            km_run(2, MAR_10_2024 + DAY, &[250.0]),
        ],
        AnalyticsConfig::default(),
    );

    assert_eq!(engine.compute_best_efforts().unwrap(), 1);
    let km = engine.best_efforts(Some(1000)).unwrap();
    assert_eq!(km[0].activity_id, 1);

    // the marker still covers the skipped activity
    assert!(!engine.is_best_efforts_stale());
}

#[test]
fn test_malformed_laps_are_skipped() {
    let (engine, _clock) = memory_engine(vec![
        km_run(1, MAR_10_2024, &[300.0]),
        run(
            2,
            MAR_10_2024 + DAY,
            vec![Lap::new(0, 250.0, 1000.0, None), Lap::new(1, f64::NAN, 1000.0, None)],
        ),
    ]);

    let report = engine.force_recompute_all();
    assert!(report.failed.is_empty());
    let km = engine.best_efforts(Some(1000)).unwrap();
    assert_eq!(km.len(), 1);
    assert_eq!(km[0].activity_id, 1);
    assert_eq!(engine.yearly_stats(Some(2024)).unwrap()[0].run_count, 1);
}

#[test]
fn test_tracking_rows_survive_reads() {
    let (engine, _clock) = memory_engine(vec![km_run(7, MAR_10_2024, &[300.0])]);
    engine.force_recompute_all();

    let tracking = engine
        .store()
        .tracking(ComputationKind::BestEfforts)
        .unwrap()
        .unwrap();
    assert_eq!(tracking.last_activity_id, Some(7));
    assert_eq!(tracking.last_computed, NOW_MS);
    assert_eq!(
        tracking.catalog_fingerprint,
        Some(engine.config().catalog.fingerprint())
    );
    assert!(engine
        .store()
        .tracking(ComputationKind::HrZones)
        .unwrap()
        .is_none());
}

#[cfg(feature = "persistence")]
#[test]
fn test_sqlite_staleness_lifecycle() {
    let (engine, clock, _tmp_dir) = sqlite_engine(vec![km_run(1, MAR_10_2024, &[300.0])]);
    assert!(engine.is_best_efforts_stale());
    engine.refresh_stale();
    for kind in ComputationKind::ALL {
        assert!(!engine.is_stale(kind));
    }

    engine
        .store()
        .insert_activity(&km_run(2, MAR_10_2024 + DAY, &[280.0]))
        .unwrap();
    assert!(engine.is_best_efforts_stale());
    assert!(!engine.is_zone_stats_stale());

    clock.advance(HOUR_MS + 1);
    let report = engine.refresh_stale();
    assert_eq!(report.skipped, vec![ComputationKind::MonthlyComparison]);
    assert!(report.failed.is_empty());
}

#[allow(dead_code)]
fn assert_engine_is_sync() {
    fn is_sync<T: Sync>() {}
    is_sync::<AnalyticsEngine<InMemoryStore>>();
    is_sync::<AnalyticsEngine<FlakyStore>>();
}
