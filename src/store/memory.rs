use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{ChangeSet, MetricQuery, PeriodQuery, SessionQuery, SleepStore, StoreResult};
use crate::error::StoreError;
use crate::models::{DataType, MetricSample, SleepPeriod, SleepSession, SyncCursor};

#[derive(Debug, Clone, Default)]
struct Tables {
    periods: BTreeMap<String, SleepPeriod>,
    sessions: BTreeMap<NaiveDate, SleepSession>,
    metrics: BTreeMap<String, MetricSample>,
    cursors: BTreeMap<DataType, SyncCursor>,
}

/// In-process store for tests and throwaway runs
///
/// Commits are applied to a copy of the tables and swapped in, so a commit is
/// all-or-nothing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failures_remaining: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a persistence failure
    pub fn fail_next_commits(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::PersistenceFailure {
            reason: "memory store lock poisoned".to_string(),
        })
    }
}

impl SleepStore for MemoryStore {
    fn fetch_periods(&self, query: &PeriodQuery) -> StoreResult<Vec<SleepPeriod>> {
        let tables = self.read()?;
        let mut periods: Vec<SleepPeriod> = tables
            .periods
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        periods.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(periods)
    }

    fn fetch_sessions(&self, query: &SessionQuery) -> StoreResult<Vec<SleepSession>> {
        let tables = self.read()?;
        let sessions = tables
            .sessions
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        Ok(query.arrange(sessions))
    }

    fn fetch_metric_samples(&self, query: &MetricQuery) -> StoreResult<Vec<MetricSample>> {
        let tables = self.read()?;
        let mut samples: Vec<MetricSample> = tables
            .metrics
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(samples)
    }

    fn load_cursor(&self, data_type: DataType) -> StoreResult<Option<SyncCursor>> {
        Ok(self.read()?.cursors.get(&data_type).cloned())
    }

    fn commit(&self, changes: ChangeSet) -> StoreResult<()> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::PersistenceFailure {
                reason: "injected commit failure".to_string(),
            });
        }

        let mut tables = self.tables.write().map_err(|_| StoreError::PersistenceFailure {
            reason: "memory store lock poisoned".to_string(),
        })?;

        let mut next = tables.clone();
        for id in &changes.deleted_periods {
            next.periods.remove(id);
        }
        for (id, period) in changes.upserted_periods {
            next.periods.insert(id, period);
        }
        for day in &changes.deleted_sessions {
            next.sessions.remove(day);
        }
        for (day, session) in changes.upserted_sessions {
            next.sessions.insert(day, session);
        }
        for id in &changes.deleted_metrics {
            next.metrics.remove(id);
        }
        for (id, sample) in changes.upserted_metrics {
            next.metrics.insert(id, sample);
        }
        for (data_type, cursor) in changes.cursors {
            next.cursors.insert(data_type, cursor);
        }

        *tables = next;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
