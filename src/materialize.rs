//! Per-kind serialization and table replacement.
//!
//! A recompute of one kind must not interleave with another recompute of the
//! same kind. [`Materializer::begin`] takes that kind's lock and hands back a
//! [`KindGuard`]; the computation reads its inputs while holding the guard and
//! finally calls [`KindGuard::commit`], which is the only way to write a batch.
//! Different kinds hold different locks and may run concurrently.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use log::info;

use crate::error::{AnalyticsError, Result};
use crate::staleness::ComputationKind;
use crate::store::{DerivedStore, Materialization};

/// One mutex per computation kind.
#[derive(Debug, Default)]
pub struct KindLocks {
    locks: [Mutex<()>; 5],
}

impl KindLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, kind: ComputationKind) -> Result<MutexGuard<'_, ()>> {
        self.locks[kind.index()]
            .lock()
            .map_err(|_| AnalyticsError::LockPoisoned {
                kind: kind.as_str(),
            })
    }
}

/// Writes derived tables through a [`DerivedStore`] under per-kind locks.
pub struct Materializer<'a, S: ?Sized> {
    store: &'a S,
    locks: &'a KindLocks,
}

impl<'a, S: DerivedStore + ?Sized> Materializer<'a, S> {
    pub fn new(store: &'a S, locks: &'a KindLocks) -> Self {
        Self { store, locks }
    }

    /// Block until no other recompute of `kind` is running.
    pub fn begin(&self, kind: ComputationKind) -> Result<KindGuard<'a, S>> {
        let guard = self.locks.acquire(kind)?;
        info!("[Materializer] Computing {}", kind);
        Ok(KindGuard {
            kind,
            store: self.store,
            _guard: guard,
            started: Instant::now(),
        })
    }
}

/// Exclusive right to replace one kind's table(s).
pub struct KindGuard<'a, S: ?Sized> {
    kind: ComputationKind,
    store: &'a S,
    _guard: MutexGuard<'a, ()>,
    started: Instant,
}

impl<S: DerivedStore + ?Sized> KindGuard<'_, S> {
    /// Replace the table(s) with `batch` and release the lock.
    pub fn commit(self, batch: Materialization<'_>) -> Result<usize> {
        if batch.kind() != self.kind {
            return Err(AnalyticsError::store(format!(
                "batch for {} committed under the {} lock",
                batch.kind(),
                self.kind
            )));
        }
        let written = self.store.materialize(batch)?;
        info!(
            "[Materializer] {} replaced with {} rows in {:?}",
            self.kind,
            written,
            self.started.elapsed()
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::zones::HrZoneStat;

    #[test]
    fn test_commit_writes_batch() {
        let store = InMemoryStore::new();
        let locks = KindLocks::new();
        let materializer = Materializer::new(&store, &locks);

        let rows: Vec<HrZoneStat> = (0..6)
            .map(|zone| HrZoneStat {
                zone,
                time_in_zone_ms: 0,
                avg_pace: None,
                last_computed: 0,
            })
            .collect();
        let guard = materializer.begin(ComputationKind::HrZones).unwrap();
        assert_eq!(guard.commit(Materialization::HrZones { rows: &rows }).unwrap(), 6);
        assert_eq!(store.zone_stats(None).unwrap().len(), 6);
    }

    #[test]
    fn test_commit_rejects_other_kind() {
        let store = InMemoryStore::new();
        let locks = KindLocks::new();
        let materializer = Materializer::new(&store, &locks);
        let guard = materializer.begin(ComputationKind::Cumulative).unwrap();
        assert!(guard
            .commit(Materialization::HrZones { rows: &[] })
            .is_err());
    }

    #[test]
    fn test_kinds_lock_independently() {
        let store = InMemoryStore::new();
        let locks = KindLocks::new();
        let materializer = Materializer::new(&store, &locks);
        let _zones = materializer.begin(ComputationKind::HrZones).unwrap();
        assert!(locks.locks[ComputationKind::Cumulative.index()]
            .try_lock()
            .is_ok());
        assert!(locks.locks[ComputationKind::HrZones.index()]
            .try_lock()
            .is_err());
    }
}
