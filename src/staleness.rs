//! Staleness tracking per computation kind.
//!
//! Id-based kinds (best efforts, period stats) keep a tracking row with the
//! highest activity id they processed. Time-based kinds (zones, cumulative)
//! compare their rows' last-computed time against a freshness window, and the
//! monthly comparison goes stale when the calendar month rolls over.
//!
//! Any failure while evaluating is reported as stale.

use std::fmt;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::clock::{Calendar, Clock};
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::store::{ActivityStore, DerivedStore};

/// The independently materialized computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComputationKind {
    BestEfforts,
    PeriodStats,
    HrZones,
    MonthlyComparison,
    Cumulative,
}

impl ComputationKind {
    /// Refresh order: the comparison reads best efforts and period stats.
    pub const ALL: [ComputationKind; 5] = [
        ComputationKind::BestEfforts,
        ComputationKind::PeriodStats,
        ComputationKind::MonthlyComparison,
        ComputationKind::HrZones,
        ComputationKind::Cumulative,
    ];

    /// Key used in the tracking table.
    pub fn as_str(self) -> &'static str {
        match self {
            ComputationKind::BestEfforts => "best_times",
            ComputationKind::PeriodStats => "statistics",
            ComputationKind::HrZones => "hr_zones",
            ComputationKind::MonthlyComparison => "monthly_comparison",
            ComputationKind::Cumulative => "yearly_cumulative",
        }
    }

    pub fn index(self) -> usize {
        match self {
            ComputationKind::BestEfforts => 0,
            ComputationKind::PeriodStats => 1,
            ComputationKind::HrZones => 2,
            ComputationKind::MonthlyComparison => 3,
            ComputationKind::Cumulative => 4,
        }
    }
}

impl fmt::Display for ComputationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker recorded after a successful id-based computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationTracking {
    pub kind: ComputationKind,
    /// Epoch milliseconds
    pub last_computed: i64,
    /// Highest qualifying activity id seen, absent for an empty store
    pub last_activity_id: Option<i64>,
    /// Catalog the rows were computed with
    pub catalog_fingerprint: Option<String>,
}

impl ComputationTracking {
    pub fn new(kind: ComputationKind, last_computed: i64) -> Self {
        Self {
            kind,
            last_computed,
            last_activity_id: None,
            catalog_fingerprint: None,
        }
    }

    pub fn with_marker(mut self, last_activity_id: Option<i64>) -> Self {
        self.last_activity_id = last_activity_id;
        self
    }

    pub fn with_catalog(mut self, fingerprint: impl Into<String>) -> Self {
        self.catalog_fingerprint = Some(fingerprint.into());
        self
    }
}

/// Decides per kind whether derived data needs recomputing.
pub struct StalenessOracle<'a, S: ?Sized> {
    store: &'a S,
    config: &'a AnalyticsConfig,
    clock: &'a dyn Clock,
    calendar: Calendar,
}

impl<'a, S> StalenessOracle<'a, S>
where
    S: ActivityStore + DerivedStore + ?Sized,
{
    pub fn new(store: &'a S, config: &'a AnalyticsConfig, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
            calendar: Calendar::new(config.utc_offset_minutes),
        }
    }

    /// Fail-open staleness check.
    pub fn is_stale(&self, kind: ComputationKind) -> bool {
        match self.evaluate(kind) {
            Ok(stale) => {
                debug!("[Staleness] {} stale={}", kind, stale);
                stale
            }
            Err(e) => {
                error!(
                    "[Staleness] Evaluating {} failed, treating as stale: {}",
                    kind, e
                );
                true
            }
        }
    }

    /// Staleness check that surfaces evaluation errors.
    pub fn evaluate(&self, kind: ComputationKind) -> Result<bool> {
        match kind {
            ComputationKind::BestEfforts => self.marker_stale(kind, true),
            ComputationKind::PeriodStats => self.marker_stale(kind, false),
            ComputationKind::HrZones => {
                let last = self
                    .store
                    .zone_stats(None)?
                    .iter()
                    .map(|r| r.last_computed)
                    .max();
                Ok(self.outside_freshness_window(last))
            }
            ComputationKind::Cumulative => {
                let last = self
                    .store
                    .cumulative(None, None)?
                    .iter()
                    .map(|r| r.last_computed)
                    .max();
                Ok(self.outside_freshness_window(last))
            }
            ComputationKind::MonthlyComparison => {
                let Some(row) = self.store.monthly_comparison()? else {
                    return Ok(true);
                };
                let computed_in = self.calendar.year_month_of_millis(row.last_computed);
                let now_in = self.calendar.year_month_of_millis(self.clock.now_millis());
                Ok(computed_in.is_none() || computed_in != now_in)
            }
        }
    }

    fn marker_stale(&self, kind: ComputationKind, check_catalog: bool) -> Result<bool> {
        let Some(tracking) = self.store.tracking(kind)? else {
            return Ok(true);
        };

        if check_catalog {
            let active = self.config.catalog.fingerprint();
            if tracking.catalog_fingerprint.as_deref() != Some(active.as_str()) {
                debug!(
                    "[Staleness] {} catalog changed: {:?} -> {}",
                    kind, tracking.catalog_fingerprint, active
                );
                return Ok(true);
            }
        }

        let latest = self.store.latest_running_activity_id()?;
        Ok(match (latest, tracking.last_activity_id) {
            (Some(latest), Some(seen)) => latest > seen,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    fn outside_freshness_window(&self, last_computed: Option<i64>) -> bool {
        match last_computed {
            Some(last) => self.clock.now_millis() - last > self.config.freshness_window_ms,
            None => true,
        }
    }
}
