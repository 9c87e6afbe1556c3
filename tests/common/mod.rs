//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use run_analytics::store::{ActivityStore, DerivedStore, Materialization};
use run_analytics::{
    ActivityHeader, ActivityRecord, AnalyticsConfig, AnalyticsEngine, AnalyticsError, BestEffort,
    ComputationKind, ComputationTracking, FixedClock, HeartRateSample, HrZoneStat, InMemoryStore,
    Lap, MonthlyComparison, MonthlyStats, Result, YearlyCumulative, YearlyStats,
};

#[cfg(feature = "persistence")]
use run_analytics::SqliteStore;
#[cfg(feature = "persistence")]
use tempfile::TempDir;

/// 2024-03-15T12:00:00Z
pub const NOW_MS: i64 = 1_710_504_000_000;
/// 2024-03-10T12:00:00Z
pub const MAR_10_2024: i64 = 1_710_072_000;
/// 2024-02-10T12:00:00Z
pub const FEB_10_2024: i64 = 1_707_566_400;
/// 2023-06-01T12:00:00Z
pub const JUN_01_2023: i64 = 1_685_620_800;
pub const DAY: i64 = 86_400;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Laps of `distance` meters each with the given times.
pub fn laps(times: &[f64], distance: f64, hr: Option<u16>) -> Vec<Lap> {
    times
        .iter()
        .enumerate()
        .map(|(i, &t)| Lap::new(i as i64, t, distance, hr))
        .collect()
}

/// A running activity whose header totals match its laps.
pub fn run(id: i64, start: i64, laps: Vec<Lap>) -> ActivityRecord {
    let distance = laps.iter().map(|l| l.distance).sum();
    let time = laps.iter().map(|l| l.time).sum();
    let hrs: Vec<u16> = laps.iter().filter_map(|l| l.avg_hr).filter(|&h| h > 0).collect();
    let avg_hr = if hrs.is_empty() {
        None
    } else {
        Some((hrs.iter().map(|&h| h as u32).sum::<u32>() / hrs.len() as u32) as u16)
    };
    ActivityRecord::running(ActivityHeader::new(id, start, distance, time, avg_hr), laps)
}

pub fn samples(start: i64, hrs: &[u16]) -> Vec<HeartRateSample> {
    hrs.iter()
        .enumerate()
        .map(|(i, &hr)| HeartRateSample {
            time: (start + i as i64 * 10) * 1000,
            hr,
            elapsed: i as f64 * 10.0,
            distance: i as f64 * 30.0,
        })
        .collect()
}

/// Deterministic pseudo-random sequence for generated fixtures.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn range(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }
}

/// `count` activities spread over two years with jittered 1 km laps.
pub fn generated_history(count: i64, seed: u64) -> Vec<ActivityRecord> {
    let mut rng = Lcg::new(seed);
    (1..=count)
        .map(|id| {
            let lap_count = 1 + (rng.next_f64() * 12.0) as usize;
            let laps: Vec<Lap> = (0..lap_count)
                .map(|i| {
                    let distance = rng.range(900.0, 1100.0);
                    let pace = rng.range(100.0, 800.0);
                    let hr = if rng.next_f64() < 0.2 {
                        None
                    } else {
                        Some(rng.range(95.0, 195.0) as u16)
                    };
                    Lap::new(i as i64, pace * distance / 1000.0, distance, hr)
                })
                .collect();
            let start = JUN_01_2023 + (rng.next_f64() * 280.0) as i64 * DAY;
            run(id, start, laps)
        })
        .collect()
}

// ============================================================================
// Stores
// ============================================================================

/// Uniform ingestion across store implementations.
pub trait Ingest: ActivityStore + DerivedStore {
    fn ingest(&self, record: ActivityRecord) -> i64;
}

impl Ingest for InMemoryStore {
    fn ingest(&self, record: ActivityRecord) -> i64 {
        self.add_activity(record)
    }
}

#[cfg(feature = "persistence")]
impl Ingest for SqliteStore {
    fn ingest(&self, record: ActivityRecord) -> i64 {
        self.insert_activity(&record).expect("failed to insert activity")
    }
}

impl<T: Ingest> Ingest for Arc<T> {
    fn ingest(&self, record: ActivityRecord) -> i64 {
        (**self).ingest(record)
    }
}

pub fn engine_over<S: Ingest>(
    store: S,
    records: Vec<ActivityRecord>,
    config: AnalyticsConfig,
) -> (AnalyticsEngine<S>, Arc<FixedClock>) {
    init_logging();
    for record in records {
        store.ingest(record);
    }
    let clock = Arc::new(FixedClock::new(NOW_MS));
    let engine =
        AnalyticsEngine::with_clock(store, config, clock.clone()).expect("valid configuration");
    (engine, clock)
}

pub fn memory_engine(
    records: Vec<ActivityRecord>,
) -> (AnalyticsEngine<InMemoryStore>, Arc<FixedClock>) {
    engine_over(InMemoryStore::new(), records, AnalyticsConfig::default())
}

/// Engine over an on-disk SQLite database inside a temp dir.
#[cfg(feature = "persistence")]
pub fn sqlite_engine(
    records: Vec<ActivityRecord>,
) -> (AnalyticsEngine<SqliteStore>, Arc<FixedClock>, TempDir) {
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("analytics.db");
    let store = SqliteStore::new(db_path.to_str().unwrap()).expect("failed to open database");
    let (engine, clock) = engine_over(store, records, AnalyticsConfig::default());
    (engine, clock, tmp_dir)
}

// ============================================================================
// Failure injection
// ============================================================================

/// Wraps an in-memory store and fails selected calls on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// Every read and write fails
    pub unreachable: AtomicBool,
    /// Only tracking and derived-table reads fail
    pub derived_reads_fail: AtomicBool,
    /// Lap reads fail for these activities
    pub broken_laps: Mutex<HashSet<i64>>,
}

impl FlakyStore {
    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_derived_reads_fail(&self, value: bool) {
        self.derived_reads_fail.store(value, Ordering::SeqCst);
    }

    pub fn break_laps(&self, activity_id: i64) {
        self.broken_laps.lock().unwrap().insert(activity_id);
    }

    fn check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(AnalyticsError::store("store unreachable"))
        } else {
            Ok(())
        }
    }

    fn check_derived(&self) -> Result<()> {
        self.check()?;
        if self.derived_reads_fail.load(Ordering::SeqCst) {
            Err(AnalyticsError::store("derived table missing"))
        } else {
            Ok(())
        }
    }
}

impl Ingest for FlakyStore {
    fn ingest(&self, record: ActivityRecord) -> i64 {
        self.inner.add_activity(record)
    }
}

impl ActivityStore for FlakyStore {
    fn running_activity_ids(&self) -> Result<Vec<i64>> {
        self.check()?;
        self.inner.running_activity_ids()
    }

    fn latest_running_activity_id(&self) -> Result<Option<i64>> {
        self.check()?;
        self.inner.latest_running_activity_id()
    }

    fn activity_header(&self, activity_id: i64) -> Result<Option<ActivityHeader>> {
        self.check()?;
        self.inner.activity_header(activity_id)
    }

    fn laps(&self, activity_id: i64) -> Result<Vec<Lap>> {
        self.check()?;
        if self.broken_laps.lock().unwrap().contains(&activity_id) {
            return Err(AnalyticsError::store(format!(
                "lap query for {} failed",
                activity_id
            )));
        }
        self.inner.laps(activity_id)
    }

    fn heart_rate_samples(&self, activity_id: i64) -> Result<Vec<HeartRateSample>> {
        self.check()?;
        self.inner.heart_rate_samples(activity_id)
    }
}

impl DerivedStore for FlakyStore {
    fn materialize(&self, batch: Materialization<'_>) -> Result<usize> {
        self.check()?;
        self.inner.materialize(batch)
    }

    fn best_efforts(&self, distance: Option<u32>) -> Result<Vec<BestEffort>> {
        self.check_derived()?;
        self.inner.best_efforts(distance)
    }

    fn yearly_stats(&self, year: Option<i32>) -> Result<Vec<YearlyStats>> {
        self.check_derived()?;
        self.inner.yearly_stats(year)
    }

    fn monthly_stats(&self, year: Option<i32>, month: Option<u32>) -> Result<Vec<MonthlyStats>> {
        self.check_derived()?;
        self.inner.monthly_stats(year, month)
    }

    fn zone_stats(&self, zone: Option<u8>) -> Result<Vec<HrZoneStat>> {
        self.check_derived()?;
        self.inner.zone_stats(zone)
    }

    fn monthly_comparison(&self) -> Result<Option<MonthlyComparison>> {
        self.check_derived()?;
        self.inner.monthly_comparison()
    }

    fn cumulative(
        &self,
        year: Option<i32>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<YearlyCumulative>> {
        self.check_derived()?;
        self.inner.cumulative(year, date)
    }

    fn tracking(&self, kind: ComputationKind) -> Result<Option<ComputationTracking>> {
        self.check_derived()?;
        self.inner.tracking(kind)
    }
}
