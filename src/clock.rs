//! Time source and calendar windows.
//!
//! Every read of "now" goes through a [`Clock`] so batch computations and
//! staleness checks are reproducible. Calendar years, months and days are
//! evaluated in a fixed UTC offset taken from the configuration.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_millis: i64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Calendar arithmetic in a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    offset: FixedOffset,
}

/// A closed window of epoch seconds `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn contains(&self, epoch_seconds: i64) -> bool {
        epoch_seconds >= self.start && epoch_seconds <= self.end
    }
}

impl Calendar {
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(0)
    }

    fn datetime_from_seconds(&self, epoch_seconds: i64) -> Option<DateTime<FixedOffset>> {
        self.offset.timestamp_opt(epoch_seconds, 0).single()
    }

    /// Local calendar date of an epoch-second timestamp.
    pub fn date_of(&self, epoch_seconds: i64) -> Option<NaiveDate> {
        self.datetime_from_seconds(epoch_seconds)
            .map(|dt| dt.date_naive())
    }

    /// Local calendar date of an epoch-millisecond timestamp.
    pub fn date_of_millis(&self, epoch_millis: i64) -> Option<NaiveDate> {
        self.offset
            .timestamp_millis_opt(epoch_millis)
            .single()
            .map(|dt| dt.date_naive())
    }

    /// (year, month 1-12) of an epoch-second timestamp.
    pub fn year_month_of(&self, epoch_seconds: i64) -> Option<(i32, u32)> {
        self.date_of(epoch_seconds).map(|d| (d.year(), d.month()))
    }

    /// (year, month 1-12) of an epoch-millisecond timestamp.
    pub fn year_month_of_millis(&self, epoch_millis: i64) -> Option<(i32, u32)> {
        self.date_of_millis(epoch_millis)
            .map(|d| (d.year(), d.month()))
    }

    fn local_midnight_seconds(&self, date: NaiveDate) -> Option<i64> {
        let naive = date.and_hms_opt(0, 0, 0)?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp())
    }

    /// Window covering a whole calendar month.
    pub fn month_window(&self, year: i32, month: u32) -> Option<TimeWindow> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(TimeWindow {
            start: self.local_midnight_seconds(first)?,
            end: self.local_midnight_seconds(next)? - 1,
        })
    }

    /// Every date of a calendar year, January 1 through December 31.
    pub fn days_of_year(year: i32) -> Vec<NaiveDate> {
        let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
            return Vec::new();
        };
        first
            .iter_days()
            .take_while(|d| d.year() == year)
            .collect()
    }
}
