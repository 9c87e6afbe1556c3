//! Store interfaces.
//!
//! [`ActivityStore`] is the read side: running activities, their laps and
//! their heart-rate samples. [`DerivedStore`] owns the materialized tables and
//! the computation tracking rows. Both are traits so the engine can run against
//! SQLite, an in-process store, or a test double.

use std::sync::Arc;

use log::{debug, warn};

use crate::best_efforts::BestEffort;
use crate::comparison::MonthlyComparison;
use crate::cumulative::YearlyCumulative;
use crate::error::{OptionExt, Result};
use crate::periods::{MonthlyStats, YearlyStats};
use crate::staleness::{ComputationKind, ComputationTracking};
use crate::zones::HrZoneStat;
use crate::{ActivityHeader, HeartRateSample, Lap};

/// Read access to recorded activities.
///
/// Only non-deleted running activities are ever returned by
/// [`running_activity_ids`](ActivityStore::running_activity_ids).
pub trait ActivityStore: Send + Sync {
    /// Ids of qualifying activities, most recent start time first.
    fn running_activity_ids(&self) -> Result<Vec<i64>>;

    /// Highest id among qualifying activities.
    fn latest_running_activity_id(&self) -> Result<Option<i64>>;

    fn activity_header(&self, activity_id: i64) -> Result<Option<ActivityHeader>>;

    /// Laps ordered by lap index.
    fn laps(&self, activity_id: i64) -> Result<Vec<Lap>>;

    /// Samples carrying a heart rate, in recording order.
    fn heart_rate_samples(&self, activity_id: i64) -> Result<Vec<HeartRateSample>>;
}

/// One batch of rows that fully replaces a derived table.
///
/// Tracking rows travel with the batch so a store can commit them in the same
/// transaction as the data.
#[derive(Debug, Clone, Copy)]
pub enum Materialization<'a> {
    BestEfforts {
        rows: &'a [BestEffort],
        tracking: &'a ComputationTracking,
    },
    PeriodStats {
        yearly: &'a [YearlyStats],
        monthly: &'a [MonthlyStats],
        tracking: &'a ComputationTracking,
    },
    HrZones {
        rows: &'a [HrZoneStat],
    },
    MonthlyComparison {
        row: Option<&'a MonthlyComparison>,
    },
    Cumulative {
        rows: &'a [YearlyCumulative],
    },
}

impl Materialization<'_> {
    pub fn kind(&self) -> ComputationKind {
        match self {
            Materialization::BestEfforts { .. } => ComputationKind::BestEfforts,
            Materialization::PeriodStats { .. } => ComputationKind::PeriodStats,
            Materialization::HrZones { .. } => ComputationKind::HrZones,
            Materialization::MonthlyComparison { .. } => ComputationKind::MonthlyComparison,
            Materialization::Cumulative { .. } => ComputationKind::Cumulative,
        }
    }

    /// Number of derived rows the batch writes (tracking rows excluded).
    pub fn row_count(&self) -> usize {
        match self {
            Materialization::BestEfforts { rows, .. } => rows.len(),
            Materialization::PeriodStats {
                yearly, monthly, ..
            } => yearly.len() + monthly.len(),
            Materialization::HrZones { rows } => rows.len(),
            Materialization::MonthlyComparison { row } => usize::from(row.is_some()),
            Materialization::Cumulative { rows } => rows.len(),
        }
    }

    pub fn tracking(&self) -> Option<&ComputationTracking> {
        match self {
            Materialization::BestEfforts { tracking, .. }
            | Materialization::PeriodStats { tracking, .. } => Some(tracking),
            _ => None,
        }
    }
}

/// Storage for materialized analytics.
///
/// Readers filter by natural key; `None` means "all rows". Results come back
/// in natural-key order.
pub trait DerivedStore: Send + Sync {
    /// Clear the batch's table(s), insert its rows and update its tracking row
    /// as one unit. Returns the number of rows written.
    fn materialize(&self, batch: Materialization<'_>) -> Result<usize>;

    /// Ordered by distance, then rank.
    fn best_efforts(&self, distance: Option<u32>) -> Result<Vec<BestEffort>>;

    fn yearly_stats(&self, year: Option<i32>) -> Result<Vec<YearlyStats>>;

    fn monthly_stats(&self, year: Option<i32>, month: Option<u32>) -> Result<Vec<MonthlyStats>>;

    fn zone_stats(&self, zone: Option<u8>) -> Result<Vec<HrZoneStat>>;

    fn monthly_comparison(&self) -> Result<Option<MonthlyComparison>>;

    fn cumulative(
        &self,
        year: Option<i32>,
        date: Option<chrono::NaiveDate>,
    ) -> Result<Vec<YearlyCumulative>>;

    fn tracking(&self, kind: ComputationKind) -> Result<Option<ComputationTracking>>;
}

// Shared handles: several engines (or an engine and an ingester) may hold the
// same store.

impl<T: ActivityStore + ?Sized> ActivityStore for Arc<T> {
    fn running_activity_ids(&self) -> Result<Vec<i64>> {
        (**self).running_activity_ids()
    }

    fn latest_running_activity_id(&self) -> Result<Option<i64>> {
        (**self).latest_running_activity_id()
    }

    fn activity_header(&self, activity_id: i64) -> Result<Option<ActivityHeader>> {
        (**self).activity_header(activity_id)
    }

    fn laps(&self, activity_id: i64) -> Result<Vec<Lap>> {
        (**self).laps(activity_id)
    }

    fn heart_rate_samples(&self, activity_id: i64) -> Result<Vec<HeartRateSample>> {
        (**self).heart_rate_samples(activity_id)
    }
}

impl<T: DerivedStore + ?Sized> DerivedStore for Arc<T> {
    fn materialize(&self, batch: Materialization<'_>) -> Result<usize> {
        (**self).materialize(batch)
    }

    fn best_efforts(&self, distance: Option<u32>) -> Result<Vec<BestEffort>> {
        (**self).best_efforts(distance)
    }

    fn yearly_stats(&self, year: Option<i32>) -> Result<Vec<YearlyStats>> {
        (**self).yearly_stats(year)
    }

    fn monthly_stats(&self, year: Option<i32>, month: Option<u32>) -> Result<Vec<MonthlyStats>> {
        (**self).monthly_stats(year, month)
    }

    fn zone_stats(&self, zone: Option<u8>) -> Result<Vec<HrZoneStat>> {
        (**self).zone_stats(zone)
    }

    fn monthly_comparison(&self) -> Result<Option<MonthlyComparison>> {
        (**self).monthly_comparison()
    }

    fn cumulative(
        &self,
        year: Option<i32>,
        date: Option<chrono::NaiveDate>,
    ) -> Result<Vec<YearlyCumulative>> {
        (**self).cumulative(year, date)
    }

    fn tracking(&self, kind: ComputationKind) -> Result<Option<ComputationTracking>> {
        (**self).tracking(kind)
    }
}

/// What to read for each activity besides its header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub laps: bool,
    pub samples: bool,
}

impl LoadOptions {
    pub const HEADERS: Self = Self {
        laps: false,
        samples: false,
    };
    pub const LAPS: Self = Self {
        laps: true,
        samples: false,
    };
    pub const FULL: Self = Self {
        laps: true,
        samples: true,
    };
}

/// A qualifying activity with whatever detail was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityData {
    pub header: ActivityHeader,
    pub laps: Vec<Lap>,
    pub samples: Vec<HeartRateSample>,
}

impl ActivityData {
    pub fn new(header: ActivityHeader, laps: Vec<Lap>) -> Self {
        Self {
            header,
            laps,
            samples: Vec::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.header.id
    }
}

/// Load every qualifying activity, in the store's listing order.
///
/// Failing to list activities aborts the load. A failure on a single activity
/// (missing header, unreadable or malformed laps) is logged and that activity
/// is skipped.
pub fn load_activities<S: ActivityStore + ?Sized>(
    store: &S,
    options: LoadOptions,
) -> Result<Vec<ActivityData>> {
    let ids = store.running_activity_ids()?;
    let mut activities = Vec::with_capacity(ids.len());
    let mut skipped = 0usize;

    for id in ids {
        match load_activity(store, id, options) {
            Ok(activity) => activities.push(activity),
            Err(e) => {
                skipped += 1;
                warn!("[ActivityLoader] Skipping activity {}: {}", id, e);
            }
        }
    }

    debug!(
        "[ActivityLoader] Loaded {} activities ({} skipped, laps={}, samples={})",
        activities.len(),
        skipped,
        options.laps,
        options.samples
    );
    Ok(activities)
}

fn load_activity<S: ActivityStore + ?Sized>(
    store: &S,
    activity_id: i64,
    options: LoadOptions,
) -> Result<ActivityData> {
    let header = store
        .activity_header(activity_id)?
        .ok_or_missing_activity(activity_id)?;

    let laps = if options.laps {
        let mut laps = store.laps(activity_id)?;
        for lap in &laps {
            lap.validate(activity_id)?;
        }
        laps.sort_by_key(|l| l.lap_index);
        laps
    } else {
        Vec::new()
    };

    let samples = if options.samples {
        store.heart_rate_samples(activity_id)?
    } else {
        Vec::new()
    };

    Ok(ActivityData {
        header,
        laps,
        samples,
    })
}
