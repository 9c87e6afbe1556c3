//! Heart rate zone distribution.
//!
//! Laps are classified by their own average heart rate into one of six zones
//! and their full time and distance is accumulated into that zone. Laps
//! without a heart rate are left out of every zone.
//!
//! ## Example
//! ```rust
//! use run_analytics::config::HrZoneConfig;
//! use run_analytics::store::ActivityData;
//! use run_analytics::zones::zone_stats;
//! use run_analytics::{ActivityHeader, Lap};
//!
//! let activity = ActivityData::new(
//!     ActivityHeader::new(1, 0, 3000.0, 900.0, None),
//!     vec![
//!         Lap::new(0, 300.0, 1000.0, Some(110)),
//!         Lap::new(1, 300.0, 1000.0, Some(140)),
//!         Lap::new(2, 300.0, 1000.0, Some(170)),
//!     ],
//! );
//! let stats = zone_stats(&[activity], &HrZoneConfig::default(), 0);
//! assert_eq!(stats.len(), 6);
//! assert_eq!(stats[2].time_in_zone_ms, 300_000);
//! ```

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::HrZoneConfig;
use crate::finite_or_none;
use crate::store::ActivityData;

/// Time spent in one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrZoneStat {
    /// 0 (lowest intensity) to 5
    pub zone: u8,
    pub time_in_zone_ms: i64,
    /// Seconds per km over the laps in this zone
    pub avg_pace: Option<f64>,
    /// Epoch milliseconds
    pub last_computed: i64,
}

/// Accumulated time and distance for one zone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ZoneTotals {
    time_ms: f64,
    distance: f64,
}

impl ZoneTotals {
    fn merge(self, other: Self) -> Self {
        Self {
            time_ms: self.time_ms + other.time_ms,
            distance: self.distance + other.distance,
        }
    }

    /// ms per meter is numerically seconds per km.
    fn avg_pace(&self) -> Option<f64> {
        if self.time_ms > 0.0 && self.distance > 0.0 {
            finite_or_none(self.time_ms / self.distance)
        } else {
            None
        }
    }
}

type ZoneTable = [ZoneTotals; HrZoneConfig::ZONE_COUNT];

fn merge_tables(a: ZoneTable, b: ZoneTable) -> ZoneTable {
    let mut merged = a;
    for (slot, other) in merged.iter_mut().zip(b) {
        *slot = slot.merge(other);
    }
    merged
}

fn classify_activity(activity: &ActivityData, zones: &HrZoneConfig) -> ZoneTable {
    activity
        .laps
        .iter()
        .filter_map(|lap| Some((zones.zone_for(lap.heart_rate()?), lap)))
        .fold(ZoneTable::default(), |mut table, (zone, lap)| {
            let slot = &mut table[zone as usize];
            *slot = slot.merge(ZoneTotals {
                time_ms: lap.time * 1000.0,
                distance: lap.distance,
            });
            table
        })
}

fn classify(activities: &[ActivityData], zones: &HrZoneConfig) -> ZoneTable {
    activities
        .iter()
        .map(|a| classify_activity(a, zones))
        .fold(ZoneTable::default(), merge_tables)
}

/// Parallel variant for large histories.
#[cfg(feature = "parallel")]
fn classify_parallel(activities: &[ActivityData], zones: &HrZoneConfig) -> ZoneTable {
    if activities.len() < 100 {
        return classify(activities, zones);
    }
    activities
        .par_iter()
        .map(|a| classify_activity(a, zones))
        .reduce(ZoneTable::default, merge_tables)
}

/// Exactly six rows, zones 0 through 5.
pub fn zone_stats(
    activities: &[ActivityData],
    zones: &HrZoneConfig,
    last_computed: i64,
) -> Vec<HrZoneStat> {
    #[cfg(feature = "parallel")]
    let table = classify_parallel(activities, zones);
    #[cfg(not(feature = "parallel"))]
    let table = classify(activities, zones);

    table
        .iter()
        .enumerate()
        .map(|(zone, totals)| HrZoneStat {
            zone: zone as u8,
            time_in_zone_ms: totals.time_ms.round() as i64,
            avg_pace: totals.avg_pace(),
            last_computed,
        })
        .collect()
}
