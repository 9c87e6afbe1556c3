//! # Run Analytics
//!
//! Personal running analytics computed from a history of recorded activities
//! and their laps.
//!
//! This library provides:
//! - Best efforts per target distance (single-lap and consecutive-lap matching)
//! - Yearly and monthly volume, pace and run length
//! - Heart rate zone distribution
//! - Current-month versus other-months comparison
//! - Day-by-day cumulative distance for the current and previous year
//!
//! Every computation is an idempotent batch pass that reads from an
//! [`ActivityStore`], replaces its derived table in a [`DerivedStore`], and is
//! guarded by a staleness check that avoids needless recomputation.
//!
//! ## Features
//!
//! - **`persistence`** (default) - SQLite store adapter
//! - **`parallel`** - Parallel segment matching with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use run_analytics::{
//!     ActivityHeader, ActivityRecord, AnalyticsConfig, AnalyticsEngine, InMemoryStore, Lap,
//! };
//!
//! let store = InMemoryStore::new();
//! let laps = vec![
//!     Lap::new(0, 300.0, 1000.0, Some(150)),
//!     Lap::new(1, 290.0, 1000.0, Some(155)),
//! ];
//! store.add_activity(ActivityRecord::running(
//!     ActivityHeader::new(1, 1_700_000_000, 2000.0, 590.0, Some(152)),
//!     laps,
//! ));
//!
//! let engine = AnalyticsEngine::new(store, AnalyticsConfig::default()).unwrap();
//! if engine.is_best_efforts_stale() {
//!     let written = engine.compute_best_efforts().unwrap();
//!     assert_eq!(written, 1);
//! }
//! let fastest_km = engine.best_efforts(Some(1000)).unwrap();
//! assert_eq!(fastest_km[0].time_ms, 290_000);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{AnalyticsError, OptionExt, Result};

// Engine configuration (catalog, zones, pace bands)
pub mod config;
pub use config::{
    AnalyticsConfig, BestEffortCatalog, HrZoneConfig, PaceBand, PacePlausibility, TargetDistance,
};

// Time source and calendar windows
pub mod clock;
pub use clock::{Calendar, Clock, FixedClock, SystemClock, TimeWindow};

// Store interfaces
pub mod store;
pub use store::{ActivityData, ActivityStore, DerivedStore, LoadOptions, Materialization};

// In-process store
pub mod memory;
pub use memory::InMemoryStore;

// SQLite store adapter
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Segment matching (single lap / consecutive laps)
pub mod segments;
pub use segments::{find_best_segment, segment_candidates, MatchCriteria, SegmentMatch};

// Best efforts per target distance
pub mod best_efforts;
pub use best_efforts::{BestEffort, BestEffortSummary, DistributionHistogram};

// Yearly/monthly aggregation
pub mod periods;
pub use periods::{MonthlyStats, YearlyStats};

// Heart rate zone distribution
pub mod zones;
pub use zones::HrZoneStat;

// Current month vs other months
pub mod comparison;
pub use comparison::{ComparisonSide, MonthlyComparison};

// Day-by-day cumulative distance
pub mod cumulative;
pub use cumulative::YearlyCumulative;

// Lap pace bins per year
pub mod pace_profile;
pub use pace_profile::{PaceBin, PaceProfile};

// Staleness tracking
pub mod staleness;
pub use staleness::{ComputationKind, ComputationTracking, StalenessOracle};

// Per-kind serialization and table replacement
pub mod materialize;
pub use materialize::{KindGuard, KindLocks, Materializer};

// Caller-facing engine
pub mod engine;
pub use engine::{AnalyticsEngine, RefreshReport};

// ============================================================================
// Core Types
// ============================================================================

/// Sport of a recorded activity. Only running activities are analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sport {
    Running,
    Biking,
    Other,
    Orienteering,
    Walking,
    Treadmill,
}

impl Sport {
    /// Numeric code used by the activity store.
    pub fn code(self) -> i64 {
        match self {
            Sport::Running => 0,
            Sport::Biking => 1,
            Sport::Other => 2,
            Sport::Orienteering => 3,
            Sport::Walking => 4,
            Sport::Treadmill => 5,
        }
    }
}

/// Activity summary as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityHeader {
    pub id: i64,
    /// Start time in seconds since the Unix epoch
    pub start_time: i64,
    /// Total distance in meters
    pub distance: f64,
    /// Total time in seconds
    pub time: f64,
    /// Average heart rate; `None` or 0 means absent
    pub avg_hr: Option<u16>,
}

impl ActivityHeader {
    pub fn new(id: i64, start_time: i64, distance: f64, time: f64, avg_hr: Option<u16>) -> Self {
        Self {
            id,
            start_time,
            distance,
            time,
            avg_hr,
        }
    }

    /// Average heart rate if recorded.
    pub fn heart_rate(&self) -> Option<f64> {
        present_hr(self.avg_hr)
    }
}

/// A contiguous segment of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    /// Ordering key within the activity
    pub lap_index: i64,
    /// Elapsed time in seconds
    pub time: f64,
    /// Distance in meters
    pub distance: f64,
    /// Average heart rate; `None` or 0 means absent
    pub avg_hr: Option<u16>,
}

impl Lap {
    pub fn new(lap_index: i64, time: f64, distance: f64, avg_hr: Option<u16>) -> Self {
        Self {
            lap_index,
            time,
            distance,
            avg_hr,
        }
    }

    /// Average heart rate if recorded.
    pub fn heart_rate(&self) -> Option<f64> {
        present_hr(self.avg_hr)
    }

    /// Pace in seconds per km, `None` for non-positive time or distance.
    pub fn pace(&self) -> Option<f64> {
        pace_seconds_per_km(self.time, self.distance)
    }

    /// Reject values no computation can use.
    pub fn validate(&self, activity_id: i64) -> Result<()> {
        let reason = if !self.time.is_finite() || !self.distance.is_finite() {
            "non-finite time or distance"
        } else if self.time < 0.0 {
            "negative time"
        } else if self.distance < 0.0 {
            "negative distance"
        } else {
            return Ok(());
        };
        Err(AnalyticsError::MalformedLap {
            activity_id,
            lap_index: self.lap_index,
            reason: reason.to_string(),
        })
    }
}

/// A heart-rate-bearing location sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Sample time in milliseconds since the Unix epoch
    pub time: i64,
    /// Heart rate in BPM
    pub hr: u16,
    /// Elapsed activity time in seconds
    pub elapsed: f64,
    /// Cumulative distance in meters
    pub distance: f64,
}

/// A complete activity as handed to a store for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub header: ActivityHeader,
    pub sport: Sport,
    pub deleted: bool,
    pub laps: Vec<Lap>,
    pub samples: Vec<HeartRateSample>,
}

impl ActivityRecord {
    /// A non-deleted running activity without samples.
    pub fn running(header: ActivityHeader, laps: Vec<Lap>) -> Self {
        Self {
            header,
            sport: Sport::Running,
            deleted: false,
            laps,
            samples: Vec::new(),
        }
    }

    pub fn with_sport(mut self, sport: Sport) -> Self {
        self.sport = sport;
        self
    }

    pub fn with_samples(mut self, samples: Vec<HeartRateSample>) -> Self {
        self.samples = samples;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Whether this activity takes part in analytics.
    pub fn is_qualifying(&self) -> bool {
        self.sport == Sport::Running && !self.deleted
    }
}

// ============================================================================
// Numeric helpers
// ============================================================================

/// Pace in seconds per km, `None` unless both values are positive.
pub fn pace_seconds_per_km(time_seconds: f64, distance_meters: f64) -> Option<f64> {
    if time_seconds > 0.0 && distance_meters > 0.0 {
        finite_or_none(time_seconds / (distance_meters / 1000.0))
    } else {
        None
    }
}

/// Drop NaN and infinities.
pub fn finite_or_none(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Arithmetic mean, `None` for an empty input.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        finite_or_none(sum / count as f64)
    }
}

fn present_hr(hr: Option<u16>) -> Option<f64> {
    hr.filter(|&v| v > 0).map(f64::from)
}
