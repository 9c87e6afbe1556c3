//! Engine configuration.
//!
//! The best-effort catalog, retention bound, zone thresholds and pace bands are
//! plain values passed into the engine rather than compiled-in constants, so a
//! catalog change is detected by comparing the tracked fingerprint against the
//! active configuration.
//!
//! ## Example
//! ```rust
//! use run_analytics::config::{AnalyticsConfig, BestEffortCatalog};
//!
//! let config = AnalyticsConfig {
//!     catalog: BestEffortCatalog::classic(),
//!     ..AnalyticsConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.catalog.retention, 3);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

/// One canonical race distance searched for best efforts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDistance {
    /// Distance in meters
    pub meters: u32,
    /// Number of consecutive laps expected to cover the distance.
    /// A value of 1 selects the single-lap strategy.
    pub expected_laps: u32,
}

impl TargetDistance {
    pub const fn new(meters: u32, expected_laps: u32) -> Self {
        Self {
            meters,
            expected_laps,
        }
    }

    /// Derive the expected lap count from one-kilometre splits.
    pub fn from_km_splits(meters: u32) -> Self {
        Self::new(meters, (meters / 1000).max(1))
    }

    pub fn is_single_lap(&self) -> bool {
        self.expected_laps <= 1
    }
}

/// The catalog of target distances and how many ranks to keep for each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestEffortCatalog {
    pub distances: Vec<TargetDistance>,
    /// Maximum number of ranked rows kept per target distance
    pub retention: usize,
}

impl BestEffortCatalog {
    /// Nine distances with top-25 retention.
    pub fn extended() -> Self {
        Self {
            distances: vec![
                TargetDistance::new(1000, 1),
                TargetDistance::new(5000, 5),
                TargetDistance::new(10000, 10),
                TargetDistance::new(15000, 15),
                TargetDistance::new(20000, 20),
                TargetDistance::new(21097, 21),
                TargetDistance::new(30000, 30),
                TargetDistance::new(40000, 40),
                TargetDistance::new(42195, 42),
            ],
            retention: 25,
        }
    }

    /// Five race distances with top-3 retention.
    pub fn classic() -> Self {
        Self {
            distances: vec![
                TargetDistance::new(1000, 1),
                TargetDistance::new(5000, 5),
                TargetDistance::new(10000, 10),
                TargetDistance::new(21097, 21),
                TargetDistance::new(42195, 42),
            ],
            retention: 3,
        }
    }

    /// Distances in ascending order.
    pub fn sorted_distances(&self) -> Vec<TargetDistance> {
        let mut distances = self.distances.clone();
        distances.sort_by_key(|d| d.meters);
        distances
    }

    pub fn find(&self, meters: u32) -> Option<TargetDistance> {
        self.distances.iter().copied().find(|d| d.meters == meters)
    }

    /// Stable textual fingerprint stored with the best-effort marker.
    pub fn fingerprint(&self) -> String {
        let distances: Vec<String> = self
            .sorted_distances()
            .iter()
            .map(|d| format!("{}x{}", d.meters, d.expected_laps))
            .collect();
        format!("{}|top{}", distances.join(","), self.retention)
    }
}

impl Default for BestEffortCatalog {
    fn default() -> Self {
        Self::extended()
    }
}

/// Accepted range of pace (seconds per km) for a lap or window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacePlausibility {
    pub min_pace: f64,
    pub max_pace: f64,
}

impl PacePlausibility {
    pub fn contains(&self, pace: f64) -> bool {
        pace.is_finite() && pace >= self.min_pace && pace <= self.max_pace
    }
}

impl Default for PacePlausibility {
    fn default() -> Self {
        // 2:00/km to 12:00/km
        Self {
            min_pace: 120.0,
            max_pace: 720.0,
        }
    }
}

/// Inclusive pace band used for the heart-rate-at-target-pace metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaceBand {
    pub min_pace: f64,
    pub max_pace: f64,
}

impl PaceBand {
    pub fn contains(&self, pace: f64) -> bool {
        pace.is_finite() && pace >= self.min_pace && pace <= self.max_pace
    }
}

impl Default for PaceBand {
    fn default() -> Self {
        // 4:50/km to 5:10/km
        Self {
            min_pace: 290.0,
            max_pace: 310.0,
        }
    }
}

/// Heart rate zone thresholds.
///
/// Six zones numbered 0..=5. `upper_bounds[i]` is the exclusive upper bound
/// of zone `i`; zone 5 is everything at or above `upper_bounds[4]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrZoneConfig {
    pub max_hr: u16,
    pub upper_bounds: [u16; 5],
}

impl HrZoneConfig {
    pub const ZONE_COUNT: usize = 6;

    /// Derive thresholds from max HR at 63/71/78/85/92 percent.
    pub fn from_max_hr(max_hr: u16) -> Self {
        let pct = |p: f64| (max_hr as f64 * p).round() as u16;
        Self {
            max_hr,
            upper_bounds: [pct(0.63), pct(0.71), pct(0.78), pct(0.85), pct(0.92)],
        }
    }

    /// Zone (0-5) for a heart rate value.
    pub fn zone_for(&self, hr: f64) -> u8 {
        for (zone, &bound) in self.upper_bounds.iter().enumerate() {
            if hr < bound as f64 {
                return zone as u8;
            }
        }
        5
    }
}

impl Default for HrZoneConfig {
    fn default() -> Self {
        // MHR 186
        Self {
            max_hr: 186,
            upper_bounds: [117, 132, 145, 158, 171],
        }
    }
}

/// Complete configuration for the analytics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub catalog: BestEffortCatalog,
    /// Relative distance tolerance for a lap or window to match a target
    pub distance_tolerance: f64,
    pub plausibility: PacePlausibility,
    pub zones: HrZoneConfig,
    pub pace_band: PaceBand,
    /// Ranks at or below this count towards the "top ranks" metric
    pub top_rank_limit: u32,
    /// Time-based kinds are stale once older than this
    pub freshness_window_ms: i64,
    /// Offset from UTC in which calendar days, months and years are evaluated
    pub utc_offset_minutes: i32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            catalog: BestEffortCatalog::default(),
            distance_tolerance: 0.05,
            plausibility: PacePlausibility::default(),
            zones: HrZoneConfig::default(),
            pace_band: PaceBand::default(),
            top_rank_limit: 25,
            freshness_window_ms: 60 * 60 * 1000,
            utc_offset_minutes: 0,
        }
    }
}

impl AnalyticsConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.distances.is_empty() {
            return Err(AnalyticsError::config("catalog has no target distances"));
        }
        if self.catalog.retention == 0 {
            return Err(AnalyticsError::config("catalog retention must be at least 1"));
        }
        let mut seen: Vec<u32> = Vec::with_capacity(self.catalog.distances.len());
        for target in &self.catalog.distances {
            if target.meters == 0 || target.expected_laps == 0 {
                return Err(AnalyticsError::config(format!(
                    "target {}m with {} laps is not searchable",
                    target.meters, target.expected_laps
                )));
            }
            if seen.contains(&target.meters) {
                return Err(AnalyticsError::config(format!(
                    "duplicate target distance {}m",
                    target.meters
                )));
            }
            seen.push(target.meters);
        }
        if !(self.distance_tolerance > 0.0 && self.distance_tolerance < 1.0) {
            return Err(AnalyticsError::config(
                "distance tolerance must be within (0, 1)",
            ));
        }
        if self.plausibility.min_pace >= self.plausibility.max_pace {
            return Err(AnalyticsError::config("plausibility band is empty"));
        }
        if self.pace_band.min_pace >= self.pace_band.max_pace {
            return Err(AnalyticsError::config("pace band is empty"));
        }
        if self.zones.upper_bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalyticsError::config(
                "zone bounds must be strictly ascending",
            ));
        }
        if self.freshness_window_ms <= 0 {
            return Err(AnalyticsError::config("freshness window must be positive"));
        }
        if self.utc_offset_minutes.abs() > 18 * 60 {
            return Err(AnalyticsError::config("UTC offset out of range"));
        }
        Ok(())
    }
}
