//! Current month versus every other month.
//!
//! Pace and volume fields come from the materialized monthly stats: the
//! current month's own row, and for the other side the mean of every other
//! month's row. Heart rate, personal-best and top-rank counts are computed
//! from raw data restricted to the month window or to its complement.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::best_efforts::BestEffort;
use crate::clock::TimeWindow;
use crate::config::PaceBand;
use crate::periods::MonthlyStats;
use crate::store::ActivityData;
use crate::{finite_or_none, mean};

/// One side of the comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSide {
    /// Seconds per km
    pub avg_pace: Option<f64>,
    pub total_km: f64,
    /// Mean of heart-rate-bearing samples of activities starting on this side
    pub avg_bpm: Option<f64>,
    /// Distinct target distances whose rank-1 effort falls on this side
    pub pb_count: u32,
    /// Meters
    pub avg_distance_per_run: Option<f64>,
    /// Distinct activities holding a top rank on this side
    pub top_rank_count: u32,
    /// Mean lap heart rate over laps inside the target pace band
    pub avg_bpm_at_target_pace: Option<f64>,
}

/// The single comparison row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyComparison {
    pub year: i32,
    pub month: u32,
    pub current: ComparisonSide,
    pub other: ComparisonSide,
    /// Epoch milliseconds
    pub last_computed: i64,
}

impl MonthlyComparison {
    /// `YYYY-MM` of the current month.
    pub fn month_key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Which activities a side covers, by start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Inside(TimeWindow),
    /// Before the window start or after its end
    Outside(TimeWindow),
}

impl Scope {
    pub fn contains(&self, epoch_seconds: i64) -> bool {
        match self {
            Scope::Inside(w) => w.contains(epoch_seconds),
            Scope::Outside(w) => !w.contains(epoch_seconds),
        }
    }
}

/// Everything the comparator reads.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonInputs<'a> {
    pub monthly: &'a [MonthlyStats],
    pub best_efforts: &'a [BestEffort],
    /// Qualifying activities with laps and samples
    pub activities: &'a [ActivityData],
    pub pace_band: PaceBand,
    pub top_rank_limit: u32,
}

/// Build the comparison for the month `(year, month)` spanning `window`.
pub fn compare_months(
    inputs: &ComparisonInputs<'_>,
    year: i32,
    month: u32,
    window: TimeWindow,
    last_computed: i64,
) -> MonthlyComparison {
    let current_row = inputs
        .monthly
        .iter()
        .find(|m| m.year == year && m.month == month);
    let other_rows: Vec<&MonthlyStats> = inputs
        .monthly
        .iter()
        .filter(|m| !(m.year == year && m.month == month))
        .collect();

    let mut current = current_volume(current_row);
    fill_raw_metrics(&mut current, inputs, Scope::Inside(window));

    let mut other = other_volume(&other_rows);
    fill_raw_metrics(&mut other, inputs, Scope::Outside(window));

    MonthlyComparison {
        year,
        month,
        current,
        other,
        last_computed,
    }
}

fn distance_per_run(row: &MonthlyStats) -> Option<f64> {
    row.avg_run_length.or_else(|| {
        if row.run_count > 0 {
            finite_or_none(row.total_distance / row.run_count as f64)
        } else {
            None
        }
    })
}

fn current_volume(row: Option<&MonthlyStats>) -> ComparisonSide {
    match row {
        Some(row) => ComparisonSide {
            avg_pace: row.avg_pace,
            total_km: row.total_distance / 1000.0,
            avg_distance_per_run: distance_per_run(row),
            ..ComparisonSide::default()
        },
        None => ComparisonSide::default(),
    }
}

fn other_volume(rows: &[&MonthlyStats]) -> ComparisonSide {
    ComparisonSide {
        avg_pace: mean(rows.iter().filter_map(|r| r.avg_pace)),
        total_km: mean(rows.iter().map(|r| r.total_distance)).unwrap_or(0.0) / 1000.0,
        avg_distance_per_run: mean(rows.iter().filter_map(|r| distance_per_run(r))),
        ..ComparisonSide::default()
    }
}

fn fill_raw_metrics(side: &mut ComparisonSide, inputs: &ComparisonInputs<'_>, scope: Scope) {
    side.avg_bpm = mean(
        inputs
            .activities
            .iter()
            .filter(|a| scope.contains(a.header.start_time))
            .flat_map(|a| a.samples.iter())
            .filter(|s| s.hr > 0)
            .map(|s| f64::from(s.hr)),
    );

    side.pb_count = inputs
        .best_efforts
        .iter()
        .filter(|e| e.rank == 1 && scope.contains(e.start_time))
        .map(|e| e.distance)
        .collect::<HashSet<_>>()
        .len() as u32;

    side.top_rank_count = inputs
        .best_efforts
        .iter()
        .filter(|e| e.rank <= inputs.top_rank_limit && scope.contains(e.start_time))
        .map(|e| e.activity_id)
        .collect::<HashSet<_>>()
        .len() as u32;

    side.avg_bpm_at_target_pace = mean(
        inputs
            .activities
            .iter()
            .filter(|a| scope.contains(a.header.start_time))
            .flat_map(|a| a.laps.iter())
            .filter_map(|lap| {
                let pace = lap.pace()?;
                let hr = lap.heart_rate()?;
                inputs.pace_band.contains(pace).then_some(hr)
            }),
    );
}
