//! Best efforts per target distance.
//!
//! For every target in the catalog, each qualifying activity contributes at
//! most one result: its fastest matching segment. Results are ordered by
//! achieved time (stable with respect to activity order), ranked 1..k and cut
//! at the catalog's retention bound.
//!
//! The segment-time distribution and per-distance summaries are built from
//! the same matching primitives.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{BestEffortCatalog, TargetDistance};
use crate::segments::{find_best_segment, segment_candidates, MatchCriteria, SegmentMatch};
use crate::store::ActivityData;

/// One ranked best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEffort {
    /// Target distance in meters
    pub distance: u32,
    /// Achieved time in milliseconds
    pub time_ms: i64,
    /// Seconds per km over the matched distance
    pub pace: f64,
    pub activity_id: i64,
    /// Start time of the source activity (epoch seconds)
    pub start_time: i64,
    pub avg_hr: Option<f64>,
    /// 1 = fastest
    pub rank: u32,
}

/// Average and count of the retained efforts for one distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEffortSummary {
    pub distance: u32,
    pub count: usize,
    pub best_time_ms: i64,
    pub average_time_ms: f64,
}

#[derive(Debug, Clone)]
struct EffortCandidate {
    activity_id: i64,
    start_time: i64,
    segment: SegmentMatch,
}

/// Best efforts for every target in the catalog, ascending by distance.
pub fn compute_best_efforts(
    activities: &[ActivityData],
    catalog: &BestEffortCatalog,
    criteria: &MatchCriteria,
) -> Vec<BestEffort> {
    catalog
        .sorted_distances()
        .into_iter()
        .flat_map(|target| rank_target(activities, target, criteria, catalog.retention))
        .collect()
}

/// Ranked efforts for a single target, at most `retention` rows.
pub fn rank_target(
    activities: &[ActivityData],
    target: TargetDistance,
    criteria: &MatchCriteria,
    retention: usize,
) -> Vec<BestEffort> {
    #[cfg(feature = "parallel")]
    let mut candidates = collect_candidates_parallel(activities, target, criteria);
    #[cfg(not(feature = "parallel"))]
    let mut candidates = collect_candidates(activities, target, criteria);

    debug!(
        "[BestEfforts] {}m: {} of {} activities matched",
        target.meters,
        candidates.len(),
        activities.len()
    );

    // Stable sort keeps activity order on equal times
    candidates.sort_by_key(|c| c.segment.time_ms());

    candidates
        .into_iter()
        .take(retention)
        .enumerate()
        .map(|(i, c)| BestEffort {
            distance: target.meters,
            time_ms: c.segment.time_ms(),
            pace: c.segment.pace,
            activity_id: c.activity_id,
            start_time: c.start_time,
            avg_hr: c.segment.avg_hr,
            rank: i as u32 + 1,
        })
        .collect()
}

fn best_candidate(
    activity: &ActivityData,
    target: TargetDistance,
    criteria: &MatchCriteria,
) -> Option<EffortCandidate> {
    let segment = find_best_segment(
        &activity.laps,
        target,
        criteria,
        activity.header.heart_rate(),
    )?;
    Some(EffortCandidate {
        activity_id: activity.header.id,
        start_time: activity.header.start_time,
        segment,
    })
}

fn collect_candidates(
    activities: &[ActivityData],
    target: TargetDistance,
    criteria: &MatchCriteria,
) -> Vec<EffortCandidate> {
    activities
        .iter()
        .filter_map(|a| best_candidate(a, target, criteria))
        .collect()
}

/// Parallel variant; output order matches the sequential version.
#[cfg(feature = "parallel")]
fn collect_candidates_parallel(
    activities: &[ActivityData],
    target: TargetDistance,
    criteria: &MatchCriteria,
) -> Vec<EffortCandidate> {
    if activities.len() < 10 {
        return collect_candidates(activities, target, criteria);
    }
    activities
        .par_iter()
        .filter_map(|a| best_candidate(a, target, criteria))
        .collect()
}

/// Mean and count per distance over materialized efforts.
pub fn summarize(efforts: &[BestEffort]) -> Vec<BestEffortSummary> {
    let mut by_distance: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
    for effort in efforts {
        by_distance
            .entry(effort.distance)
            .or_default()
            .push(effort.time_ms);
    }

    by_distance
        .into_iter()
        .filter_map(|(distance, times)| {
            let best_time_ms = *times.iter().min()?;
            let total: i64 = times.iter().sum();
            Some(BestEffortSummary {
                distance,
                count: times.len(),
                best_time_ms,
                average_time_ms: total as f64 / times.len() as f64,
            })
        })
        .collect()
}

/// Every accepted segment time (seconds) for a target, across all activities.
pub fn segment_times(
    activities: &[ActivityData],
    target: TargetDistance,
    criteria: &MatchCriteria,
) -> Vec<f64> {
    activities
        .iter()
        .flat_map(|a| segment_candidates(&a.laps, target, criteria, a.header.heart_rate()))
        .map(|m| m.time)
        .collect()
}

/// Equal-width histogram of segment times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionHistogram {
    /// Fastest time in seconds
    pub min: f64,
    /// Slowest time in seconds
    pub max: f64,
    pub bin_width: f64,
    pub counts: Vec<usize>,
    pub mean: f64,
    /// Element at index `n / 4` of the sorted times
    pub p25: f64,
    /// Element at index `3n / 4` of the sorted times
    pub p75: f64,
}

impl DistributionHistogram {
    pub const DEFAULT_BINS: usize = 15;

    /// Bin `times` between their min and max. The max value lands in the last
    /// bin. When every time is equal, all of them land in the first bin.
    /// Returns `None` for no finite times or zero bins.
    pub fn from_times(times: &[f64], bins: usize) -> Option<Self> {
        if bins == 0 {
            return None;
        }
        let mut sorted: Vec<f64> = times.iter().copied().filter(|t| t.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let min = *sorted.first()?;
        let max = sorted[n - 1];
        let bin_width = (max - min) / bins as f64;
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let p25 = sorted[n / 4];
        let p75 = sorted[n * 3 / 4];

        let mut counts = vec![0usize; bins];
        for &t in &sorted {
            let index = if bin_width > 0.0 {
                (((t - min) / bin_width) as usize).min(bins - 1)
            } else {
                0
            };
            counts[index] += 1;
        }

        Some(Self {
            min,
            max,
            bin_width,
            counts,
            mean,
            p25,
            p75,
        })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Lower edge of each bin.
    pub fn bin_starts(&self) -> Vec<f64> {
        (0..self.counts.len())
            .map(|i| self.min + i as f64 * self.bin_width)
            .collect()
    }
}
