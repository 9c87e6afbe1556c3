//! Lap pace profile per calendar year.
//!
//! Laps are bucketed into 10 s/km bins centred from 3:30/km to 7:30/km.
//! Lap paces are rounded to whole seconds before binning. Each bin reports
//! how many laps fell into it and the mean average heart rate of the
//! activities those laps belong to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::Calendar;
use crate::mean;
use crate::store::ActivityData;

/// Centre of the fastest bin, seconds per km.
pub const FIRST_BIN_CENTER: u32 = 210;
/// Centre of the slowest bin, seconds per km.
pub const LAST_BIN_CENTER: u32 = 450;
pub const BIN_WIDTH: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaceBin {
    /// Seconds per km
    pub center: u32,
    pub laps: u32,
    pub avg_hr: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaceProfile {
    /// Year to bins, fastest bin first
    pub years: BTreeMap<i32, Vec<PaceBin>>,
}

impl PaceProfile {
    pub fn bin_centers() -> Vec<u32> {
        (FIRST_BIN_CENTER..=LAST_BIN_CENTER)
            .step_by(BIN_WIDTH as usize)
            .collect()
    }

    pub fn year(&self, year: i32) -> Option<&[PaceBin]> {
        self.years.get(&year).map(Vec::as_slice)
    }
}

/// Bin for a whole-second pace. Paces within half a bin of either end are
/// clamped into the edge bins; a pace exactly between two centres goes to
/// the slower one.
fn bin_index(pace_seconds: i64) -> Option<usize> {
    let half = i64::from(BIN_WIDTH / 2);
    let low = i64::from(FIRST_BIN_CENTER) - half;
    let high = i64::from(LAST_BIN_CENTER) + half;
    if pace_seconds < low || pace_seconds > high {
        return None;
    }
    let bins = PaceProfile::bin_centers().len();
    let index = ((pace_seconds - low) / i64::from(BIN_WIDTH)) as usize;
    Some(index.min(bins - 1))
}

/// Build the profile from qualifying activities with their laps.
pub fn pace_profile(activities: &[ActivityData], calendar: &Calendar) -> PaceProfile {
    let bins = PaceProfile::bin_centers().len();
    let mut heart_rates: BTreeMap<i32, Vec<Vec<Option<f64>>>> = BTreeMap::new();

    for activity in activities {
        let Some((year, _)) = calendar.year_month_of(activity.header.start_time) else {
            continue;
        };
        let activity_hr = activity.header.heart_rate();
        for lap in &activity.laps {
            let Some(index) = lap
                .pace()
                .and_then(|pace| bin_index(pace.round() as i64))
            else {
                continue;
            };
            heart_rates
                .entry(year)
                .or_insert_with(|| vec![Vec::new(); bins])[index]
                .push(activity_hr);
        }
    }

    let years = heart_rates
        .into_iter()
        .map(|(year, per_bin)| {
            let row = PaceProfile::bin_centers()
                .into_iter()
                .zip(per_bin)
                .map(|(center, hrs)| PaceBin {
                    center,
                    laps: hrs.len() as u32,
                    avg_hr: mean(hrs.into_iter().flatten()),
                })
                .collect();
            (year, row)
        })
        .collect();

    PaceProfile { years }
}
