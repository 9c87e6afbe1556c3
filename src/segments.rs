//! Segment matching against a target distance.
//!
//! A target is matched either by a single lap (targets expected to take one
//! lap) or by a window of exactly `expected_laps` consecutive laps. A lap or
//! window is accepted when its distance is within the relative tolerance of
//! the target and its pace is plausible.
//!
//! ## Example
//! ```rust
//! use run_analytics::config::TargetDistance;
//! use run_analytics::segments::{find_best_segment, MatchCriteria};
//! use run_analytics::Lap;
//!
//! let laps = vec![
//!     Lap::new(0, 300.0, 1000.0, None),
//!     Lap::new(1, 310.0, 1000.0, None),
//!     Lap::new(2, 290.0, 1000.0, None),
//! ];
//! let best = find_best_segment(&laps, TargetDistance::new(1000, 1), &MatchCriteria::default(), None)
//!     .unwrap();
//! assert_eq!(best.time, 290.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{AnalyticsConfig, PacePlausibility, TargetDistance};
use crate::{mean, pace_seconds_per_km, Lap};

/// Acceptance rules for a candidate lap or window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchCriteria {
    /// Relative distance tolerance, e.g. 0.05 for ±5%
    pub tolerance: f64,
    pub plausibility: PacePlausibility,
}

impl Default for MatchCriteria {
    fn default() -> Self {
        Self::from_config(&AnalyticsConfig::default())
    }
}

impl MatchCriteria {
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self {
            tolerance: config.distance_tolerance,
            plausibility: config.plausibility,
        }
    }

    /// Whether a covered distance is close enough to the target.
    pub fn distance_matches(&self, distance: f64, target_meters: u32) -> bool {
        let ratio = distance / target_meters as f64;
        ratio >= 1.0 - self.tolerance && ratio <= 1.0 + self.tolerance
    }

    fn accept(&self, time: f64, distance: f64, target_meters: u32) -> Option<f64> {
        if !self.distance_matches(distance, target_meters) {
            return None;
        }
        pace_seconds_per_km(time, distance).filter(|&pace| self.plausibility.contains(pace))
    }
}

/// An accepted lap or window of laps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMatch {
    /// Summed time in seconds
    pub time: f64,
    /// Summed distance in meters
    pub distance: f64,
    /// Seconds per km
    pub pace: f64,
    pub avg_hr: Option<f64>,
    /// Position of the first lap in the input slice
    pub start_lap: usize,
    pub lap_count: usize,
}

impl SegmentMatch {
    /// Time in whole milliseconds.
    pub fn time_ms(&self) -> i64 {
        (self.time * 1000.0).round() as i64
    }
}

/// Every accepted candidate for `target`, in lap order.
///
/// `fallback_hr` (normally the activity's average heart rate) is used when
/// the matched laps carry no heart rate of their own.
pub fn segment_candidates(
    laps: &[Lap],
    target: TargetDistance,
    criteria: &MatchCriteria,
    fallback_hr: Option<f64>,
) -> Vec<SegmentMatch> {
    if target.is_single_lap() {
        single_lap_candidates(laps, target, criteria, fallback_hr)
    } else {
        window_candidates(laps, target, criteria, fallback_hr)
    }
}

/// The fastest accepted candidate. On equal times the earliest one wins.
pub fn find_best_segment(
    laps: &[Lap],
    target: TargetDistance,
    criteria: &MatchCriteria,
    fallback_hr: Option<f64>,
) -> Option<SegmentMatch> {
    segment_candidates(laps, target, criteria, fallback_hr)
        .into_iter()
        .fold(None, |best: Option<SegmentMatch>, candidate| match best {
            Some(b) if b.time <= candidate.time => Some(b),
            _ => Some(candidate),
        })
}

fn single_lap_candidates(
    laps: &[Lap],
    target: TargetDistance,
    criteria: &MatchCriteria,
    fallback_hr: Option<f64>,
) -> Vec<SegmentMatch> {
    laps.iter()
        .enumerate()
        .filter_map(|(i, lap)| {
            let pace = criteria.accept(lap.time, lap.distance, target.meters)?;
            Some(SegmentMatch {
                time: lap.time,
                distance: lap.distance,
                pace,
                avg_hr: lap.heart_rate().or(fallback_hr),
                start_lap: i,
                lap_count: 1,
            })
        })
        .collect()
}

fn window_candidates(
    laps: &[Lap],
    target: TargetDistance,
    criteria: &MatchCriteria,
    fallback_hr: Option<f64>,
) -> Vec<SegmentMatch> {
    let size = target.expected_laps as usize;
    if laps.len() < size {
        return Vec::new();
    }

    laps.windows(size)
        .enumerate()
        .filter_map(|(start, window)| {
            let time: f64 = window.iter().map(|l| l.time).sum();
            let distance: f64 = window.iter().map(|l| l.distance).sum();
            let pace = criteria.accept(time, distance, target.meters)?;
            let avg_hr = mean(window.iter().filter_map(Lap::heart_rate)).or(fallback_hr);
            Some(SegmentMatch {
                time,
                distance,
                pace,
                avg_hr,
                start_lap: start,
                lap_count: size,
            })
        })
        .collect()
}
