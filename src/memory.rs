//! In-process store.
//!
//! Keeps activities and derived tables behind a single `RwLock`. A
//! materialization replaces its table(s) and tracking row under one write
//! lock, so readers never see a half-replaced table.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use log::debug;

use crate::best_efforts::BestEffort;
use crate::comparison::MonthlyComparison;
use crate::cumulative::YearlyCumulative;
use crate::error::{AnalyticsError, Result};
use crate::periods::{MonthlyStats, YearlyStats};
use crate::staleness::{ComputationKind, ComputationTracking};
use crate::store::{ActivityStore, DerivedStore, Materialization};
use crate::zones::HrZoneStat;
use crate::{ActivityHeader, ActivityRecord, HeartRateSample, Lap};

#[derive(Debug, Default)]
struct Tables {
    activities: BTreeMap<i64, ActivityRecord>,
    best_efforts: Vec<BestEffort>,
    yearly: Vec<YearlyStats>,
    monthly: Vec<MonthlyStats>,
    zones: Vec<HrZoneStat>,
    comparison: Option<MonthlyComparison>,
    cumulative: Vec<YearlyCumulative>,
    tracking: HashMap<ComputationKind, ComputationTracking>,
}

/// Store that lives entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| AnalyticsError::store("in-memory tables poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| AnalyticsError::store("in-memory tables poisoned"))
    }

    /// Insert or replace an activity. A non-positive id is replaced by the
    /// next free id. Returns the id used.
    pub fn add_activity(&self, mut record: ActivityRecord) -> i64 {
        let mut tables = match self.tables.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if record.header.id <= 0 {
            record.header.id = tables.activities.keys().next_back().map_or(1, |id| id + 1);
        }
        let id = record.header.id;
        tables.activities.insert(id, record);
        id
    }

    /// Flag an activity as deleted. Returns false if it does not exist.
    pub fn set_deleted(&self, activity_id: i64, deleted: bool) -> Result<bool> {
        let mut tables = self.write()?;
        Ok(match tables.activities.get_mut(&activity_id) {
            Some(record) => {
                record.deleted = deleted;
                true
            }
            None => false,
        })
    }

    pub fn remove_activity(&self, activity_id: i64) -> Result<bool> {
        Ok(self.write()?.activities.remove(&activity_id).is_some())
    }

    pub fn activity_count(&self) -> usize {
        let tables = match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables.activities.len()
    }
}

impl ActivityStore for InMemoryStore {
    fn running_activity_ids(&self) -> Result<Vec<i64>> {
        let tables = self.read()?;
        let mut qualifying: Vec<(i64, i64)> = tables
            .activities
            .values()
            .filter(|r| r.is_qualifying())
            .map(|r| (r.header.start_time, r.header.id))
            .collect();
        qualifying.sort_by(|a, b| b.cmp(a));
        Ok(qualifying.into_iter().map(|(_, id)| id).collect())
    }

    fn latest_running_activity_id(&self) -> Result<Option<i64>> {
        Ok(self
            .read()?
            .activities
            .values()
            .filter(|r| r.is_qualifying())
            .map(|r| r.header.id)
            .max())
    }

    fn activity_header(&self, activity_id: i64) -> Result<Option<ActivityHeader>> {
        Ok(self
            .read()?
            .activities
            .get(&activity_id)
            .map(|r| r.header.clone()))
    }

    fn laps(&self, activity_id: i64) -> Result<Vec<Lap>> {
        let tables = self.read()?;
        let mut laps = tables
            .activities
            .get(&activity_id)
            .map(|r| r.laps.clone())
            .unwrap_or_default();
        laps.sort_by_key(|l| l.lap_index);
        Ok(laps)
    }

    fn heart_rate_samples(&self, activity_id: i64) -> Result<Vec<HeartRateSample>> {
        let tables = self.read()?;
        let mut samples: Vec<HeartRateSample> = tables
            .activities
            .get(&activity_id)
            .map(|r| r.samples.iter().filter(|s| s.hr > 0).cloned().collect())
            .unwrap_or_default();
        samples.sort_by_key(|s| s.time);
        Ok(samples)
    }
}

impl DerivedStore for InMemoryStore {
    fn materialize(&self, batch: Materialization<'_>) -> Result<usize> {
        let mut tables = self.write()?;
        match batch {
            Materialization::BestEfforts { rows, .. } => tables.best_efforts = rows.to_vec(),
            Materialization::PeriodStats {
                yearly, monthly, ..
            } => {
                tables.yearly = yearly.to_vec();
                tables.monthly = monthly.to_vec();
            }
            Materialization::HrZones { rows } => tables.zones = rows.to_vec(),
            Materialization::MonthlyComparison { row } => tables.comparison = row.cloned(),
            Materialization::Cumulative { rows } => tables.cumulative = rows.to_vec(),
        }
        if let Some(tracking) = batch.tracking() {
            tables.tracking.insert(tracking.kind, tracking.clone());
        }
        debug!(
            "[InMemoryStore] Replaced {} with {} rows",
            batch.kind(),
            batch.row_count()
        );
        Ok(batch.row_count())
    }

    fn best_efforts(&self, distance: Option<u32>) -> Result<Vec<BestEffort>> {
        let mut rows: Vec<BestEffort> = self
            .read()?
            .best_efforts
            .iter()
            .filter(|e| distance.map_or(true, |d| e.distance == d))
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.distance, e.rank));
        Ok(rows)
    }

    fn yearly_stats(&self, year: Option<i32>) -> Result<Vec<YearlyStats>> {
        let mut rows: Vec<YearlyStats> = self
            .read()?
            .yearly
            .iter()
            .filter(|s| year.map_or(true, |y| s.year == y))
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.year);
        Ok(rows)
    }

    fn monthly_stats(&self, year: Option<i32>, month: Option<u32>) -> Result<Vec<MonthlyStats>> {
        let mut rows: Vec<MonthlyStats> = self
            .read()?
            .monthly
            .iter()
            .filter(|s| year.map_or(true, |y| s.year == y))
            .filter(|s| month.map_or(true, |m| s.month == m))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.year, s.month));
        Ok(rows)
    }

    fn zone_stats(&self, zone: Option<u8>) -> Result<Vec<HrZoneStat>> {
        let mut rows: Vec<HrZoneStat> = self
            .read()?
            .zones
            .iter()
            .filter(|z| zone.map_or(true, |n| z.zone == n))
            .cloned()
            .collect();
        rows.sort_by_key(|z| z.zone);
        Ok(rows)
    }

    fn monthly_comparison(&self) -> Result<Option<MonthlyComparison>> {
        Ok(self.read()?.comparison.clone())
    }

    fn cumulative(
        &self,
        year: Option<i32>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<YearlyCumulative>> {
        let mut rows: Vec<YearlyCumulative> = self
            .read()?
            .cumulative
            .iter()
            .filter(|c| year.map_or(true, |y| c.year == y))
            .filter(|c| date.map_or(true, |d| c.date == d))
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.date);
        Ok(rows)
    }

    fn tracking(&self, kind: ComputationKind) -> Result<Option<ComputationTracking>> {
        Ok(self.read()?.tracking.get(&kind).cloned())
    }
}
