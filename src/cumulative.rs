//! Day-by-day cumulative distance.
//!
//! Activity distances are summed per calendar day of their start time, then
//! walked from January 1 to December 31 with a running total so every day of
//! the year has a row.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::clock::Calendar;
use crate::store::ActivityData;

/// Running total at the end of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyCumulative {
    pub date: NaiveDate,
    pub year: i32,
    pub cumulative_km: f64,
    /// Epoch milliseconds
    pub last_computed: i64,
}

/// The previous and the current year.
pub fn tracked_years(current_year: i32) -> [i32; 2] {
    [current_year - 1, current_year]
}

/// One row per day of `year`, in date order.
pub fn cumulative_series(
    activities: &[ActivityData],
    year: i32,
    calendar: &Calendar,
    last_computed: i64,
) -> Vec<YearlyCumulative> {
    let daily: BTreeMap<NaiveDate, f64> = activities
        .iter()
        .filter(|a| a.header.distance.is_finite() && a.header.distance > 0.0)
        .filter_map(|a| Some((calendar.date_of(a.header.start_time)?, a.header.distance)))
        .filter(|(date, _)| date.year() == year)
        .fold(BTreeMap::new(), |mut daily, (date, distance)| {
            *daily.entry(date).or_insert(0.0) += distance;
            daily
        });

    Calendar::days_of_year(year)
        .into_iter()
        .scan(0.0_f64, |meters, date| {
            *meters += daily.get(&date).copied().unwrap_or(0.0);
            Some(YearlyCumulative {
                date,
                year,
                cumulative_km: *meters / 1000.0,
                last_computed,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActivityHeader;

    fn run(id: i64, start: i64, distance: f64) -> ActivityData {
        ActivityData::new(ActivityHeader::new(id, start, distance, 0.0, None), Vec::new())
    }

    // 2024-01-01T08:00Z, 2024-03-10T12:00Z, 2023-06-01T12:00Z
    const JAN_01: i64 = 1_704_096_000;
    const MAR_10: i64 = 1_710_072_000;
    const JUN_01_2023: i64 = 1_685_620_800;

    #[test]
    fn test_leap_year_series() {
        let activities = vec![run(1, JAN_01, 5000.0), run(2, MAR_10, 10000.0)];
        let series = cumulative_series(&activities, 2024, &Calendar::utc(), 1);
        assert_eq!(series.len(), 366);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(series[0].cumulative_km, 5.0);
        assert!(series
            .windows(2)
            .all(|w| w[0].cumulative_km <= w[1].cumulative_km));
        assert_eq!(series.last().unwrap().cumulative_km, 15.0);
    }

    #[test]
    fn test_other_year_activities_ignored() {
        let activities = vec![run(1, JUN_01_2023, 8000.0), run(2, MAR_10, 1000.0)];
        let series = cumulative_series(&activities, 2023, &Calendar::utc(), 1);
        assert_eq!(series.len(), 365);
        assert_eq!(series.last().unwrap().cumulative_km, 8.0);
        assert_eq!(series[0].cumulative_km, 0.0);
    }

    #[test]
    fn test_same_day_summed() {
        let activities = vec![run(1, MAR_10, 3000.0), run(2, MAR_10 + 3600, 2000.0)];
        let series = cumulative_series(&activities, 2024, &Calendar::utc(), 1);
        let mar_10 = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let row = series.iter().find(|r| r.date == mar_10).unwrap();
        assert_eq!(row.cumulative_km, 5.0);
    }

    #[test]
    fn test_tracked_years() {
        assert_eq!(tracked_years(2024), [2023, 2024]);
    }
}
