//! Yearly and monthly volume aggregation.
//!
//! Each activity contributes the summed time and distance of its laps to
//! exactly one year bucket and one month bucket, chosen by its start time.
//! Activities without laps are left out entirely.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::clock::Calendar;
use crate::store::ActivityData;
use crate::{finite_or_none, pace_seconds_per_km};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyStats {
    pub year: i32,
    /// Meters
    pub total_distance: f64,
    /// Seconds
    pub total_time: f64,
    /// Seconds per km
    pub avg_pace: Option<f64>,
    /// Meters per run
    pub avg_run_length: Option<f64>,
    pub run_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyStats {
    pub year: i32,
    /// 1-12
    pub month: u32,
    pub total_distance: f64,
    pub total_time: f64,
    pub avg_pace: Option<f64>,
    pub avg_run_length: Option<f64>,
    pub run_count: u32,
}

/// Running totals for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PeriodTotals {
    distance: f64,
    time: f64,
    runs: u32,
}

impl PeriodTotals {
    fn single_run(distance: f64, time: f64) -> Self {
        Self {
            distance,
            time,
            runs: 1,
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            distance: self.distance + other.distance,
            time: self.time + other.time,
            runs: self.runs + other.runs,
        }
    }

    fn avg_pace(&self) -> Option<f64> {
        pace_seconds_per_km(self.time, self.distance)
    }

    fn avg_run_length(&self) -> Option<f64> {
        if self.distance > 0.0 && self.runs > 0 {
            finite_or_none(self.distance / self.runs as f64)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Buckets {
    years: BTreeMap<i32, PeriodTotals>,
    months: BTreeMap<(i32, u32), PeriodTotals>,
}

/// Fold activities into yearly and monthly rows, both in ascending key order.
pub fn aggregate_periods(
    activities: &[ActivityData],
    calendar: &Calendar,
) -> (Vec<YearlyStats>, Vec<MonthlyStats>) {
    let buckets = activities
        .iter()
        .filter(|a| !a.laps.is_empty())
        .filter_map(|a| {
            let (year, month) = calendar.year_month_of(a.header.start_time)?;
            let distance: f64 = a.laps.iter().map(|l| l.distance).sum();
            let time: f64 = a.laps.iter().map(|l| l.time).sum();
            Some((year, month, PeriodTotals::single_run(distance, time)))
        })
        .fold(Buckets::default(), |mut buckets, (year, month, run)| {
            let y = buckets.years.entry(year).or_default();
            *y = y.merge(run);
            let m = buckets.months.entry((year, month)).or_default();
            *m = m.merge(run);
            buckets
        });

    debug!(
        "[Periods] {} activities folded into {} years / {} months",
        activities.len(),
        buckets.years.len(),
        buckets.months.len()
    );

    let yearly = buckets
        .years
        .into_iter()
        .map(|(year, t)| YearlyStats {
            year,
            total_distance: t.distance,
            total_time: t.time,
            avg_pace: t.avg_pace(),
            avg_run_length: t.avg_run_length(),
            run_count: t.runs,
        })
        .collect();

    let monthly = buckets
        .months
        .into_iter()
        .map(|((year, month), t)| MonthlyStats {
            year,
            month,
            total_distance: t.distance,
            total_time: t.time,
            avg_pace: t.avg_pace(),
            avg_run_length: t.avg_run_length(),
            run_count: t.runs,
        })
        .collect();

    (yearly, monthly)
}
