//! SQLite store adapter.
//!
//! Holds activities, laps and heart-rate samples alongside the derived tables
//! in one database. Every materialization runs in a single transaction: the
//! table is cleared, the new rows inserted and the tracking row updated, or
//! nothing changes.
//!
//! ## Example
//! ```rust,no_run
//! use run_analytics::{ActivityHeader, ActivityRecord, Lap, SqliteStore};
//!
//! let store = SqliteStore::new("analytics.db").unwrap();
//! let id = store
//!     .insert_activity(&ActivityRecord::running(
//!         ActivityHeader::new(0, 1_700_000_000, 1000.0, 300.0, None),
//!         vec![Lap::new(0, 300.0, 1000.0, None)],
//!     ))
//!     .unwrap();
//! println!("stored activity {}", id);
//! ```

use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::best_efforts::BestEffort;
use crate::comparison::{ComparisonSide, MonthlyComparison};
use crate::cumulative::YearlyCumulative;
use crate::error::{AnalyticsError, Result};
use crate::periods::{MonthlyStats, YearlyStats};
use crate::staleness::{ComputationKind, ComputationTracking};
use crate::store::{ActivityStore, DerivedStore, Materialization};
use crate::zones::HrZoneStat;
use crate::{ActivityHeader, ActivityRecord, HeartRateSample, Lap, Sport};

/// SQLite-backed implementation of both store traits.
pub struct SqliteStore {
    db: Mutex<Connection>,
    db_path: String,
}

impl SqliteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a database at the given path.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteStore] Opened {}", db_path);
        Ok(Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Recorded activities
            CREATE TABLE IF NOT EXISTS activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sport INTEGER NOT NULL DEFAULT 0,
                start_time INTEGER NOT NULL,
                distance REAL NOT NULL,
                time REAL NOT NULL,
                avg_hr INTEGER,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS lap (
                activity_id INTEGER NOT NULL,
                lap INTEGER NOT NULL,
                time REAL NOT NULL,
                distance REAL NOT NULL,
                avg_hr INTEGER,
                PRIMARY KEY (activity_id, lap),
                FOREIGN KEY (activity_id) REFERENCES activity(id) ON DELETE CASCADE
            );

            -- Heart-rate-bearing location samples
            CREATE TABLE IF NOT EXISTS location (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activity_id INTEGER NOT NULL,
                time INTEGER NOT NULL,
                hr INTEGER,
                elapsed REAL NOT NULL DEFAULT 0,
                distance REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (activity_id) REFERENCES activity(id) ON DELETE CASCADE
            );

            -- Derived: ranked best efforts per target distance
            CREATE TABLE IF NOT EXISTS best_times (
                distance INTEGER NOT NULL,
                rank INTEGER NOT NULL,
                time_ms INTEGER NOT NULL,
                pace REAL NOT NULL,
                activity_id INTEGER NOT NULL,
                start_time INTEGER NOT NULL,
                avg_hr REAL,
                PRIMARY KEY (distance, rank)
            );

            CREATE TABLE IF NOT EXISTS yearly_stats (
                year INTEGER PRIMARY KEY,
                total_distance REAL NOT NULL,
                total_time REAL NOT NULL,
                avg_pace REAL,
                avg_run_length REAL,
                run_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monthly_stats (
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                total_distance REAL NOT NULL,
                total_time REAL NOT NULL,
                avg_pace REAL,
                avg_run_length REAL,
                run_count INTEGER NOT NULL,
                PRIMARY KEY (year, month)
            );

            CREATE TABLE IF NOT EXISTS hr_zone_stats (
                zone INTEGER PRIMARY KEY,
                time_in_zone_ms INTEGER NOT NULL,
                avg_pace REAL,
                last_computed INTEGER NOT NULL
            );

            -- Single row, current month vs other months
            CREATE TABLE IF NOT EXISTS monthly_comparison (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                current_avg_pace REAL,
                current_total_km REAL NOT NULL,
                current_avg_bpm REAL,
                current_pb_count INTEGER NOT NULL,
                current_avg_distance_per_run REAL,
                current_top_rank_count INTEGER NOT NULL,
                current_avg_bpm_at_target_pace REAL,
                other_avg_pace REAL,
                other_total_km REAL NOT NULL,
                other_avg_bpm REAL,
                other_pb_count INTEGER NOT NULL,
                other_avg_distance_per_run REAL,
                other_top_rank_count INTEGER NOT NULL,
                other_avg_bpm_at_target_pace REAL,
                last_computed INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS yearly_cumulative (
                date TEXT PRIMARY KEY,
                year INTEGER NOT NULL,
                cumulative_km REAL NOT NULL,
                last_computed INTEGER NOT NULL
            );

            -- Staleness markers
            CREATE TABLE IF NOT EXISTS computation_tracking (
                computation_type TEXT PRIMARY KEY,
                last_computed INTEGER NOT NULL,
                last_activity_id INTEGER,
                catalog TEXT
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_activity_running ON activity(sport, deleted, start_time);
            CREATE INDEX IF NOT EXISTS idx_location_activity ON location(activity_id, time);
            CREATE INDEX IF NOT EXISTS idx_cumulative_year ON yearly_cumulative(year);

            -- Enable foreign keys
            PRAGMA foreign_keys = ON;
        "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AnalyticsError::store("SQLite connection mutex poisoned"))
    }

    // ========================================================================
    // Activity ingestion
    // ========================================================================

    /// Insert or replace an activity with its laps and samples.
    /// A non-positive id lets SQLite assign one. Returns the id used.
    pub fn insert_activity(&self, record: &ActivityRecord) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let header = &record.header;
        let requested_id = (header.id > 0).then_some(header.id);
        if let Some(id) = requested_id {
            tx.execute("DELETE FROM lap WHERE activity_id = ?", [id])?;
            tx.execute("DELETE FROM location WHERE activity_id = ?", [id])?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO activity (id, sport, start_time, distance, time, avg_hr, deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                requested_id,
                record.sport.code(),
                header.start_time,
                header.distance,
                header.time,
                header.avg_hr,
                record.deleted,
            ],
        )?;
        let id = requested_id.unwrap_or_else(|| tx.last_insert_rowid());

        {
            let mut lap_stmt = tx.prepare(
                "INSERT INTO lap (activity_id, lap, time, distance, avg_hr) VALUES (?, ?, ?, ?, ?)",
            )?;
            for lap in &record.laps {
                lap_stmt.execute(params![id, lap.lap_index, lap.time, lap.distance, lap.avg_hr])?;
            }

            let mut sample_stmt = tx.prepare(
                "INSERT INTO location (activity_id, time, hr, elapsed, distance) VALUES (?, ?, ?, ?, ?)",
            )?;
            for sample in &record.samples {
                sample_stmt.execute(params![
                    id,
                    sample.time,
                    sample.hr,
                    sample.elapsed,
                    sample.distance
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            "[SqliteStore] Stored activity {} ({} laps, {} samples)",
            id,
            record.laps.len(),
            record.samples.len()
        );
        Ok(id)
    }

    /// Flag an activity as deleted. Returns false if it does not exist.
    pub fn set_deleted(&self, activity_id: i64, deleted: bool) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE activity SET deleted = ? WHERE id = ?",
            params![deleted, activity_id],
        )?;
        Ok(changed > 0)
    }

    /// Remove an activity together with its laps and samples.
    pub fn remove_activity(&self, activity_id: i64) -> Result<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM activity WHERE id = ?", [activity_id])?;
        Ok(changed > 0)
    }

    pub fn activity_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM activity", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    fn save_best_efforts(tx: &Transaction<'_>, rows: &[BestEffort]) -> Result<()> {
        tx.execute("DELETE FROM best_times", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO best_times (distance, rank, time_ms, pace, activity_id, start_time, avg_hr)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for e in rows {
            stmt.execute(params![
                e.distance,
                e.rank,
                e.time_ms,
                e.pace,
                e.activity_id,
                e.start_time,
                e.avg_hr
            ])?;
        }
        Ok(())
    }

    fn save_period_stats(
        tx: &Transaction<'_>,
        yearly: &[YearlyStats],
        monthly: &[MonthlyStats],
    ) -> Result<()> {
        tx.execute("DELETE FROM yearly_stats", [])?;
        tx.execute("DELETE FROM monthly_stats", [])?;

        let mut year_stmt = tx.prepare(
            "INSERT INTO yearly_stats (year, total_distance, total_time, avg_pace, avg_run_length, run_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for y in yearly {
            year_stmt.execute(params![
                y.year,
                y.total_distance,
                y.total_time,
                y.avg_pace,
                y.avg_run_length,
                y.run_count
            ])?;
        }

        let mut month_stmt = tx.prepare(
            "INSERT INTO monthly_stats (year, month, total_distance, total_time, avg_pace, avg_run_length, run_count)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for m in monthly {
            month_stmt.execute(params![
                m.year,
                m.month,
                m.total_distance,
                m.total_time,
                m.avg_pace,
                m.avg_run_length,
                m.run_count
            ])?;
        }
        Ok(())
    }

    fn save_zone_stats(tx: &Transaction<'_>, rows: &[HrZoneStat]) -> Result<()> {
        tx.execute("DELETE FROM hr_zone_stats", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO hr_zone_stats (zone, time_in_zone_ms, avg_pace, last_computed)
             VALUES (?, ?, ?, ?)",
        )?;
        for z in rows {
            stmt.execute(params![z.zone, z.time_in_zone_ms, z.avg_pace, z.last_computed])?;
        }
        Ok(())
    }

    fn save_comparison(tx: &Transaction<'_>, row: Option<&MonthlyComparison>) -> Result<()> {
        tx.execute("DELETE FROM monthly_comparison", [])?;
        let Some(c) = row else {
            return Ok(());
        };
        tx.execute(
            "INSERT INTO monthly_comparison (
                id, year, month,
                current_avg_pace, current_total_km, current_avg_bpm, current_pb_count,
                current_avg_distance_per_run, current_top_rank_count, current_avg_bpm_at_target_pace,
                other_avg_pace, other_total_km, other_avg_bpm, other_pb_count,
                other_avg_distance_per_run, other_top_rank_count, other_avg_bpm_at_target_pace,
                last_computed)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                c.year,
                c.month,
                c.current.avg_pace,
                c.current.total_km,
                c.current.avg_bpm,
                c.current.pb_count,
                c.current.avg_distance_per_run,
                c.current.top_rank_count,
                c.current.avg_bpm_at_target_pace,
                c.other.avg_pace,
                c.other.total_km,
                c.other.avg_bpm,
                c.other.pb_count,
                c.other.avg_distance_per_run,
                c.other.top_rank_count,
                c.other.avg_bpm_at_target_pace,
                c.last_computed,
            ],
        )?;
        Ok(())
    }

    fn save_cumulative(tx: &Transaction<'_>, rows: &[YearlyCumulative]) -> Result<()> {
        tx.execute("DELETE FROM yearly_cumulative", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO yearly_cumulative (date, year, cumulative_km, last_computed)
             VALUES (?, ?, ?, ?)",
        )?;
        for c in rows {
            stmt.execute(params![c.date, c.year, c.cumulative_km, c.last_computed])?;
        }
        Ok(())
    }

    fn save_tracking(tx: &Transaction<'_>, tracking: &ComputationTracking) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO computation_tracking
             (computation_type, last_computed, last_activity_id, catalog)
             VALUES (?, ?, ?, ?)",
            params![
                tracking.kind.as_str(),
                tracking.last_computed,
                tracking.last_activity_id,
                tracking.catalog_fingerprint
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn hr_from_sql(value: Option<i64>) -> Option<u16> {
    value.and_then(|v| u16::try_from(v).ok())
}

fn comparison_side(row: &Row<'_>, first: usize) -> rusqlite::Result<ComparisonSide> {
    Ok(ComparisonSide {
        avg_pace: row.get(first)?,
        total_km: row.get(first + 1)?,
        avg_bpm: row.get(first + 2)?,
        pb_count: row.get(first + 3)?,
        avg_distance_per_run: row.get(first + 4)?,
        top_rank_count: row.get(first + 5)?,
        avg_bpm_at_target_pace: row.get(first + 6)?,
    })
}

impl ActivityStore for SqliteStore {
    fn running_activity_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM activity WHERE sport = ? AND deleted = 0
             ORDER BY start_time DESC, id DESC",
        )?;
        let ids = stmt
            .query_map([Sport::Running.code()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn latest_running_activity_id(&self) -> Result<Option<i64>> {
        let id = self.conn()?.query_row(
            "SELECT MAX(id) FROM activity WHERE sport = ? AND deleted = 0",
            [Sport::Running.code()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn activity_header(&self, activity_id: i64) -> Result<Option<ActivityHeader>> {
        let header = self
            .conn()?
            .query_row(
                "SELECT id, start_time, distance, time, avg_hr FROM activity WHERE id = ?",
                [activity_id],
                |row| {
                    Ok(ActivityHeader {
                        id: row.get(0)?,
                        start_time: row.get(1)?,
                        distance: row.get(2)?,
                        time: row.get(3)?,
                        avg_hr: hr_from_sql(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(header)
    }

    fn laps(&self, activity_id: i64) -> Result<Vec<Lap>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT lap, time, distance, avg_hr FROM lap WHERE activity_id = ? ORDER BY lap ASC",
        )?;
        let laps = stmt
            .query_map([activity_id], |row| {
                Ok(Lap {
                    lap_index: row.get(0)?,
                    time: row.get(1)?,
                    distance: row.get(2)?,
                    avg_hr: hr_from_sql(row.get(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(laps)
    }

    fn heart_rate_samples(&self, activity_id: i64) -> Result<Vec<HeartRateSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT time, hr, elapsed, distance FROM location
             WHERE activity_id = ? AND hr > 0 ORDER BY time ASC",
        )?;
        let samples = stmt
            .query_map([activity_id], |row| {
                Ok(HeartRateSample {
                    time: row.get(0)?,
                    hr: row.get(1)?,
                    elapsed: row.get(2)?,
                    distance: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }
}

impl DerivedStore for SqliteStore {
    fn materialize(&self, batch: Materialization<'_>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        match batch {
            Materialization::BestEfforts { rows, .. } => Self::save_best_efforts(&tx, rows)?,
            Materialization::PeriodStats {
                yearly, monthly, ..
            } => Self::save_period_stats(&tx, yearly, monthly)?,
            Materialization::HrZones { rows } => Self::save_zone_stats(&tx, rows)?,
            Materialization::MonthlyComparison { row } => Self::save_comparison(&tx, row)?,
            Materialization::Cumulative { rows } => Self::save_cumulative(&tx, rows)?,
        }
        if let Some(tracking) = batch.tracking() {
            Self::save_tracking(&tx, tracking)?;
        }

        tx.commit()?;
        debug!(
            "[SqliteStore] Committed {} ({} rows)",
            batch.kind(),
            batch.row_count()
        );
        Ok(batch.row_count())
    }

    fn best_efforts(&self, distance: Option<u32>) -> Result<Vec<BestEffort>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT distance, time_ms, pace, activity_id, start_time, avg_hr, rank
             FROM best_times WHERE (?1 IS NULL OR distance = ?1)
             ORDER BY distance ASC, rank ASC",
        )?;
        let rows = stmt
            .query_map([distance], |row| {
                Ok(BestEffort {
                    distance: row.get(0)?,
                    time_ms: row.get(1)?,
                    pace: row.get(2)?,
                    activity_id: row.get(3)?,
                    start_time: row.get(4)?,
                    avg_hr: row.get(5)?,
                    rank: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn yearly_stats(&self, year: Option<i32>) -> Result<Vec<YearlyStats>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT year, total_distance, total_time, avg_pace, avg_run_length, run_count
             FROM yearly_stats WHERE (?1 IS NULL OR year = ?1) ORDER BY year ASC",
        )?;
        let rows = stmt
            .query_map([year], |row| {
                Ok(YearlyStats {
                    year: row.get(0)?,
                    total_distance: row.get(1)?,
                    total_time: row.get(2)?,
                    avg_pace: row.get(3)?,
                    avg_run_length: row.get(4)?,
                    run_count: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn monthly_stats(&self, year: Option<i32>, month: Option<u32>) -> Result<Vec<MonthlyStats>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT year, month, total_distance, total_time, avg_pace, avg_run_length, run_count
             FROM monthly_stats
             WHERE (?1 IS NULL OR year = ?1) AND (?2 IS NULL OR month = ?2)
             ORDER BY year ASC, month ASC",
        )?;
        let rows = stmt
            .query_map(params![year, month], |row| {
                Ok(MonthlyStats {
                    year: row.get(0)?,
                    month: row.get(1)?,
                    total_distance: row.get(2)?,
                    total_time: row.get(3)?,
                    avg_pace: row.get(4)?,
                    avg_run_length: row.get(5)?,
                    run_count: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn zone_stats(&self, zone: Option<u8>) -> Result<Vec<HrZoneStat>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT zone, time_in_zone_ms, avg_pace, last_computed
             FROM hr_zone_stats WHERE (?1 IS NULL OR zone = ?1) ORDER BY zone ASC",
        )?;
        let rows = stmt
            .query_map([zone], |row| {
                Ok(HrZoneStat {
                    zone: row.get(0)?,
                    time_in_zone_ms: row.get(1)?,
                    avg_pace: row.get(2)?,
                    last_computed: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn monthly_comparison(&self) -> Result<Option<MonthlyComparison>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT year, month,
                        current_avg_pace, current_total_km, current_avg_bpm, current_pb_count,
                        current_avg_distance_per_run, current_top_rank_count, current_avg_bpm_at_target_pace,
                        other_avg_pace, other_total_km, other_avg_bpm, other_pb_count,
                        other_avg_distance_per_run, other_top_rank_count, other_avg_bpm_at_target_pace,
                        last_computed
                 FROM monthly_comparison WHERE id = 1",
                [],
                |row| {
                    Ok(MonthlyComparison {
                        year: row.get(0)?,
                        month: row.get(1)?,
                        current: comparison_side(row, 2)?,
                        other: comparison_side(row, 9)?,
                        last_computed: row.get(16)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn cumulative(
        &self,
        year: Option<i32>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<YearlyCumulative>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, year, cumulative_km, last_computed
             FROM yearly_cumulative
             WHERE (?1 IS NULL OR year = ?1) AND (?2 IS NULL OR date = ?2)
             ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map(params![year, date], |row| {
                Ok(YearlyCumulative {
                    date: row.get(0)?,
                    year: row.get(1)?,
                    cumulative_km: row.get(2)?,
                    last_computed: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn tracking(&self, kind: ComputationKind) -> Result<Option<ComputationTracking>> {
        let tracking = self
            .conn()?
            .query_row(
                "SELECT last_computed, last_activity_id, catalog
                 FROM computation_tracking WHERE computation_type = ?",
                [kind.as_str()],
                |row| {
                    Ok(ComputationTracking {
                        kind,
                        last_computed: row.get(0)?,
                        last_activity_id: row.get(1)?,
                        catalog_fingerprint: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(tracking)
    }
}
