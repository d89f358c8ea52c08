use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{ChangeSet, MetricQuery, PeriodQuery, SessionQuery, SleepStore, StoreResult};
use crate::models::{DataType, MetricSample, SleepPeriod, SleepSession, SyncCursor};

/// Scoped set of staged changes against one store
///
/// Fetches see committed state with this unit's pending changes applied on
/// top, so a step can read back what it just wrote. Nothing reaches the store
/// until [`UnitOfWork::save`]; a failed save discards every staged change.
pub struct UnitOfWork<'a> {
    store: &'a dyn SleepStore,
    changes: ChangeSet,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a dyn SleepStore) -> Self {
        Self {
            store,
            changes: ChangeSet::default(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Periods matching `query`, ordered by start time
    pub fn fetch_periods(&self, query: &PeriodQuery) -> StoreResult<Vec<SleepPeriod>> {
        let mut by_id: BTreeMap<String, SleepPeriod> = self
            .store
            .fetch_periods(query)?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        for id in &self.changes.deleted_periods {
            by_id.remove(id);
        }
        for (id, period) in &self.changes.upserted_periods {
            if query.matches(period) {
                by_id.insert(id.clone(), period.clone());
            } else {
                by_id.remove(id);
            }
        }

        let mut periods: Vec<SleepPeriod> = by_id.into_values().collect();
        periods.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(periods)
    }

    pub fn fetch_period(&self, id: &str) -> StoreResult<Option<SleepPeriod>> {
        Ok(self.fetch_periods(&PeriodQuery::by_id(id))?.into_iter().next())
    }

    pub fn upsert_period(&mut self, period: SleepPeriod) {
        self.changes.deleted_periods.remove(&period.id);
        self.changes.upserted_periods.insert(period.id.clone(), period);
    }

    pub fn delete_period(&mut self, id: &str) {
        self.changes.upserted_periods.remove(id);
        self.changes.deleted_periods.insert(id.to_string());
    }

    /// Store `period` under its current id, dropping the record at `old_id`
    pub fn rekey_period(&mut self, old_id: &str, period: SleepPeriod) {
        if old_id != period.id {
            debug!(old_id, new_id = %period.id, "Re-keying sleep period");
            self.delete_period(old_id);
        }
        self.upsert_period(period);
    }

    pub fn fetch_sessions(&self, query: &SessionQuery) -> StoreResult<Vec<SleepSession>> {
        // Ordering and limit only apply after the overlay
        let unbounded = SessionQuery {
            limit: None,
            ..query.clone()
        };
        let mut by_day: BTreeMap<NaiveDate, SleepSession> = self
            .store
            .fetch_sessions(&unbounded)?
            .into_iter()
            .map(|s| (s.day, s))
            .collect();

        for day in &self.changes.deleted_sessions {
            by_day.remove(day);
        }
        for (day, session) in &self.changes.upserted_sessions {
            if query.matches(session) {
                by_day.insert(*day, session.clone());
            } else {
                by_day.remove(day);
            }
        }

        Ok(query.arrange(by_day.into_values().collect()))
    }

    pub fn fetch_session(&self, day: NaiveDate) -> StoreResult<Option<SleepSession>> {
        Ok(self.fetch_sessions(&SessionQuery::day(day))?.into_iter().next())
    }

    pub fn upsert_session(&mut self, session: SleepSession) {
        self.changes.deleted_sessions.remove(&session.day);
        self.changes.upserted_sessions.insert(session.day, session);
    }

    /// Unfinalize the session owning `day`, if there is one
    ///
    /// Called whenever a linked period's samples or bounds change, so a stale
    /// score is never committed as final. Returns whether a session existed.
    pub fn invalidate_session(&mut self, day: NaiveDate) -> StoreResult<bool> {
        let Some(mut session) = self.fetch_session(day)? else {
            return Ok(false);
        };
        if session.is_finalized {
            debug!(%day, "Unfinalizing session after period change");
        }
        session.invalidate();
        self.upsert_session(session);
        Ok(true)
    }

    pub fn delete_session(&mut self, day: NaiveDate) {
        self.changes.upserted_sessions.remove(&day);
        self.changes.deleted_sessions.insert(day);
    }

    pub fn fetch_metric_samples(&self, query: &MetricQuery) -> StoreResult<Vec<MetricSample>> {
        let mut by_id: BTreeMap<String, MetricSample> = self
            .store
            .fetch_metric_samples(query)?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        for id in &self.changes.deleted_metrics {
            by_id.remove(id);
        }
        for (id, sample) in &self.changes.upserted_metrics {
            if query.matches(sample) {
                by_id.insert(id.clone(), sample.clone());
            } else {
                by_id.remove(id);
            }
        }

        let mut samples: Vec<MetricSample> = by_id.into_values().collect();
        samples.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(samples)
    }

    pub fn upsert_metric_sample(&mut self, sample: MetricSample) {
        self.changes.deleted_metrics.remove(&sample.id);
        self.changes.upserted_metrics.insert(sample.id.clone(), sample);
    }

    pub fn delete_metric_sample(&mut self, id: &str) {
        self.changes.upserted_metrics.remove(id);
        self.changes.deleted_metrics.insert(id.to_string());
    }

    pub fn load_cursor(&self, data_type: DataType) -> StoreResult<Option<SyncCursor>> {
        if let Some(cursor) = self.changes.cursors.get(&data_type) {
            return Ok(Some(cursor.clone()));
        }
        self.store.load_cursor(data_type)
    }

    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.changes.cursors.insert(cursor.data_type, cursor);
    }

    /// Commit staged changes, returning how many records were written
    ///
    /// On failure the store has applied nothing and the staged changes are
    /// gone; the caller decides whether to retry the whole step.
    pub fn save(self) -> StoreResult<usize> {
        if self.changes.is_empty() {
            return Ok(0);
        }
        let count = self.changes.len();
        match self.store.commit(self.changes) {
            Ok(()) => {
                debug!(records = count, "Unit of work saved");
                Ok(count)
            }
            Err(err) => {
                warn!(records = count, error = %err, "Save failed, unit of work rolled back");
                Err(err)
            }
        }
    }

    /// Discard staged changes
    pub fn rollback(self) {
        if self.has_changes() {
            debug!(records = self.changes.len(), "Unit of work rolled back");
        }
    }
}
