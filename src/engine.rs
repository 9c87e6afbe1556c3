//! # Analytics Engine
//!
//! Caller-facing entry point that ties a store, a configuration and a clock
//! together.
//!
//! ## Architecture
//!
//! The engine owns:
//! - The store (anything implementing both [`ActivityStore`] and [`DerivedStore`])
//! - The active configuration (catalog, zones, pace bands, freshness window)
//! - A [`Clock`] used for every read of "now"
//! - One lock per computation kind
//!
//! Each `compute_*` call is a full batch pass: it loads what it needs from the
//! activity side, builds the rows and replaces the derived table in one
//! materialization. Each `is_*_stale` call consults the staleness oracle and
//! never fails (an evaluation error reads as stale).
//!
//! The engine is `Sync` when the store is, so different kinds may be computed
//! from different threads at once. Two recomputes of the same kind queue up.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::best_efforts::{
    compute_best_efforts, segment_times, summarize, BestEffort, BestEffortSummary,
    DistributionHistogram,
};
use crate::clock::{Calendar, Clock, SystemClock};
use crate::comparison::{compare_months, ComparisonInputs, MonthlyComparison};
use crate::config::{AnalyticsConfig, TargetDistance};
use crate::cumulative::{cumulative_series, tracked_years, YearlyCumulative};
use crate::error::{OptionExt, Result};
use crate::materialize::{KindLocks, Materializer};
use crate::pace_profile::{pace_profile, PaceProfile};
use crate::periods::{aggregate_periods, MonthlyStats, YearlyStats};
use crate::segments::MatchCriteria;
use crate::staleness::{ComputationKind, ComputationTracking, StalenessOracle};
use crate::store::{load_activities, ActivityStore, DerivedStore, LoadOptions, Materialization};
use crate::zones::{zone_stats, HrZoneStat};

// ============================================================================
// Refresh Report
// ============================================================================

/// Outcome of [`AnalyticsEngine::refresh_stale`] or
/// [`AnalyticsEngine::force_recompute_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Rows written per recomputed kind (0 for a failed kind)
    pub rows: BTreeMap<ComputationKind, usize>,
    /// Kinds that were fresh and left alone
    pub skipped: Vec<ComputationKind>,
    /// Kinds whose computation returned an error
    pub failed: Vec<ComputationKind>,
}

impl RefreshReport {
    pub fn rows_for(&self, kind: ComputationKind) -> Option<usize> {
        self.rows.get(&kind).copied()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.values().sum()
    }

    pub fn recomputed(&self) -> Vec<ComputationKind> {
        self.rows.keys().copied().collect()
    }
}

// ============================================================================
// Analytics Engine
// ============================================================================

pub struct AnalyticsEngine<S> {
    store: S,
    config: AnalyticsConfig,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    criteria: MatchCriteria,
    locks: KindLocks,
}

impl<S> AnalyticsEngine<S>
where
    S: ActivityStore + DerivedStore,
{
    /// Create an engine reading the wall clock.
    pub fn new(store: S, config: AnalyticsConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit time source.
    pub fn with_clock(store: S, config: AnalyticsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        info!(
            "[Engine] Initialized with {} target distances (top {})",
            config.catalog.distances.len(),
            config.catalog.retention
        );
        Ok(Self {
            store,
            calendar: Calendar::new(config.utc_offset_minutes),
            criteria: MatchCriteria::from_config(&config),
            config,
            clock,
            locks: KindLocks::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn oracle(&self) -> StalenessOracle<'_, S> {
        StalenessOracle::new(&self.store, &self.config, self.clock.as_ref())
    }

    fn materializer(&self) -> Materializer<'_, S> {
        Materializer::new(&self.store, &self.locks)
    }

    // ========================================================================
    // Computations
    // ========================================================================

    /// Recompute ranked best efforts for every catalog distance.
    pub fn compute_best_efforts(&self) -> Result<usize> {
        let guard = self.materializer().begin(ComputationKind::BestEfforts)?;

        let marker = self.store.latest_running_activity_id()?;
        let activities = load_activities(&self.store, LoadOptions::LAPS)?;
        let rows = compute_best_efforts(&activities, &self.config.catalog, &self.criteria);
        info!(
            "[BestEfforts] {} efforts from {} activities",
            rows.len(),
            activities.len()
        );

        let tracking = ComputationTracking::new(ComputationKind::BestEfforts, self.now())
            .with_marker(marker)
            .with_catalog(self.config.catalog.fingerprint());
        guard.commit(Materialization::BestEfforts {
            rows: &rows,
            tracking: &tracking,
        })
    }

    /// Recompute yearly and monthly stats. Returns yearly plus monthly rows.
    pub fn compute_yearly_monthly_stats(&self) -> Result<usize> {
        let guard = self.materializer().begin(ComputationKind::PeriodStats)?;

        let marker = self.store.latest_running_activity_id()?;
        let activities = load_activities(&self.store, LoadOptions::LAPS)?;
        let (yearly, monthly) = aggregate_periods(&activities, &self.calendar);
        info!(
            "[Periods] {} years and {} months from {} activities",
            yearly.len(),
            monthly.len(),
            activities.len()
        );

        let tracking =
            ComputationTracking::new(ComputationKind::PeriodStats, self.now()).with_marker(marker);
        guard.commit(Materialization::PeriodStats {
            yearly: &yearly,
            monthly: &monthly,
            tracking: &tracking,
        })
    }

    /// Recompute the six heart rate zone rows.
    pub fn compute_zone_stats(&self) -> Result<usize> {
        let guard = self.materializer().begin(ComputationKind::HrZones)?;

        let activities = load_activities(&self.store, LoadOptions::LAPS)?;
        let rows = if activities.is_empty() {
            Vec::new()
        } else {
            zone_stats(&activities, &self.config.zones, self.now())
        };
        info!("[HrZones] Classified laps of {} activities", activities.len());

        guard.commit(Materialization::HrZones { rows: &rows })
    }

    /// Recompute the current-month comparison row.
    ///
    /// Reads the materialized monthly stats and best efforts, so those should
    /// be fresh first (see [`refresh_stale`](Self::refresh_stale)).
    pub fn compute_monthly_comparison(&self) -> Result<usize> {
        let guard = self.materializer().begin(ComputationKind::MonthlyComparison)?;

        let activities = load_activities(&self.store, LoadOptions::FULL)?;
        if activities.is_empty() {
            info!("[Comparison] No activities, clearing comparison");
            return guard.commit(Materialization::MonthlyComparison { row: None });
        }

        let now = self.now();
        let (year, month) = self
            .calendar
            .year_month_of_millis(now)
            .ok_or_store("current time is outside the calendar range")?;
        let window = self
            .calendar
            .month_window(year, month)
            .ok_or_store("current month has no calendar window")?;

        let monthly = self.store.monthly_stats(None, None)?;
        let best_efforts = self.store.best_efforts(None)?;
        let inputs = ComparisonInputs {
            monthly: &monthly,
            best_efforts: &best_efforts,
            activities: &activities,
            pace_band: self.config.pace_band,
            top_rank_limit: self.config.top_rank_limit,
        };
        let row = compare_months(&inputs, year, month, window, now);
        info!(
            "[Comparison] {}: {:.1} km this month vs {:.1} km per other month",
            row.month_key(),
            row.current.total_km,
            row.other.total_km
        );

        guard.commit(Materialization::MonthlyComparison { row: Some(&row) })
    }

    /// Recompute the daily cumulative series for the previous and current year.
    pub fn compute_cumulative(&self) -> Result<usize> {
        let guard = self.materializer().begin(ComputationKind::Cumulative)?;

        let activities = load_activities(&self.store, LoadOptions::HEADERS)?;
        let now = self.now();
        let rows: Vec<YearlyCumulative> = if activities.is_empty() {
            Vec::new()
        } else {
            let current_year = self
                .calendar
                .date_of_millis(now)
                .ok_or_store("current time is outside the calendar range")?
                .year();
            tracked_years(current_year)
                .into_iter()
                .flat_map(|year| cumulative_series(&activities, year, &self.calendar, now))
                .collect()
        };
        info!(
            "[Cumulative] {} daily rows from {} activities",
            rows.len(),
            activities.len()
        );

        guard.commit(Materialization::Cumulative { rows: &rows })
    }

    /// Run the computation for one kind.
    pub fn compute(&self, kind: ComputationKind) -> Result<usize> {
        match kind {
            ComputationKind::BestEfforts => self.compute_best_efforts(),
            ComputationKind::PeriodStats => self.compute_yearly_monthly_stats(),
            ComputationKind::HrZones => self.compute_zone_stats(),
            ComputationKind::MonthlyComparison => self.compute_monthly_comparison(),
            ComputationKind::Cumulative => self.compute_cumulative(),
        }
    }

    // ========================================================================
    // Staleness
    // ========================================================================

    pub fn is_stale(&self, kind: ComputationKind) -> bool {
        self.oracle().is_stale(kind)
    }

    pub fn is_best_efforts_stale(&self) -> bool {
        self.is_stale(ComputationKind::BestEfforts)
    }

    pub fn is_period_stats_stale(&self) -> bool {
        self.is_stale(ComputationKind::PeriodStats)
    }

    pub fn is_zone_stats_stale(&self) -> bool {
        self.is_stale(ComputationKind::HrZones)
    }

    pub fn is_monthly_comparison_stale(&self) -> bool {
        self.is_stale(ComputationKind::MonthlyComparison)
    }

    pub fn is_cumulative_stale(&self) -> bool {
        self.is_stale(ComputationKind::Cumulative)
    }

    /// Recompute every stale kind, inputs of the comparison first.
    pub fn refresh_stale(&self) -> RefreshReport {
        self.run_kinds(true)
    }

    /// Recompute every kind regardless of staleness.
    pub fn force_recompute_all(&self) -> RefreshReport {
        self.run_kinds(false)
    }

    fn run_kinds(&self, only_stale: bool) -> RefreshReport {
        let mut report = RefreshReport::default();
        for kind in ComputationKind::ALL {
            if only_stale && !self.is_stale(kind) {
                report.skipped.push(kind);
                continue;
            }
            match self.compute(kind) {
                Ok(rows) => {
                    report.rows.insert(kind, rows);
                }
                Err(e) => {
                    error!("[Engine] Computing {} failed: {}", kind, e);
                    report.rows.insert(kind, 0);
                    report.failed.push(kind);
                }
            }
        }
        info!(
            "[Engine] Refresh wrote {} rows ({} recomputed, {} fresh, {} failed)",
            report.total_rows(),
            report.rows.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Materialized best efforts, optionally for one target distance.
    pub fn best_efforts(&self, distance: Option<u32>) -> Result<Vec<BestEffort>> {
        self.store.best_efforts(distance)
    }

    pub fn yearly_stats(&self, year: Option<i32>) -> Result<Vec<YearlyStats>> {
        self.store.yearly_stats(year)
    }

    pub fn monthly_stats(&self, year: Option<i32>, month: Option<u32>) -> Result<Vec<MonthlyStats>> {
        self.store.monthly_stats(year, month)
    }

    pub fn zone_stats(&self, zone: Option<u8>) -> Result<Vec<HrZoneStat>> {
        self.store.zone_stats(zone)
    }

    pub fn monthly_comparison(&self) -> Result<Option<MonthlyComparison>> {
        self.store.monthly_comparison()
    }

    pub fn cumulative(
        &self,
        year: Option<i32>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<YearlyCumulative>> {
        self.store.cumulative(year, date)
    }

    /// Mean time and count per distance over the materialized best efforts.
    pub fn best_effort_summaries(&self) -> Result<Vec<BestEffortSummary>> {
        Ok(summarize(&self.store.best_efforts(None)?))
    }

    fn target_for(&self, meters: u32) -> TargetDistance {
        self.config
            .catalog
            .find(meters)
            .unwrap_or_else(|| TargetDistance::from_km_splits(meters))
    }

    /// Every accepted segment time (seconds) for a distance, read live.
    pub fn segment_times(&self, meters: u32) -> Result<Vec<f64>> {
        let activities = load_activities(&self.store, LoadOptions::LAPS)?;
        Ok(segment_times(&activities, self.target_for(meters), &self.criteria))
    }

    /// Histogram of [`segment_times`](Self::segment_times), `None` without matches.
    pub fn segment_distribution(
        &self,
        meters: u32,
        bins: usize,
    ) -> Result<Option<DistributionHistogram>> {
        let times = self.segment_times(meters)?;
        Ok(DistributionHistogram::from_times(&times, bins))
    }

    /// Lap pace bins per calendar year, read live.
    pub fn pace_profile(&self) -> Result<PaceProfile> {
        let activities = load_activities(&self.store, LoadOptions::LAPS)?;
        Ok(pace_profile(&activities, &self.calendar))
    }

    // ========================================================================
    // JSON
    // ========================================================================

    pub fn best_efforts_json(&self, distance: Option<u32>) -> Result<String> {
        to_json(&self.best_efforts(distance)?)
    }

    pub fn yearly_stats_json(&self, year: Option<i32>) -> Result<String> {
        to_json(&self.yearly_stats(year)?)
    }

    pub fn monthly_stats_json(&self, year: Option<i32>, month: Option<u32>) -> Result<String> {
        to_json(&self.monthly_stats(year, month)?)
    }

    pub fn zone_stats_json(&self) -> Result<String> {
        to_json(&self.zone_stats(None)?)
    }

    /// `null` when no comparison has been computed.
    pub fn monthly_comparison_json(&self) -> Result<String> {
        to_json(&self.monthly_comparison()?)
    }

    pub fn cumulative_json(&self, year: Option<i32>) -> Result<String> {
        to_json(&self.cumulative(year, None)?)
    }

    pub fn best_effort_summaries_json(&self) -> Result<String> {
        to_json(&self.best_effort_summaries()?)
    }

    pub fn pace_profile_json(&self) -> Result<String> {
        to_json(&self.pace_profile()?)
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}
