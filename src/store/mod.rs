//! Transactional persistence interface
//!
//! The pipeline never writes to a store directly. Reads go through predicate
//! queries and writes are staged in a [`UnitOfWork`], then committed as one
//! [`ChangeSet`]. A backend must apply a change set atomically: either every
//! change lands or none does.

pub mod memory;
pub mod sqlite;
pub mod unit_of_work;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;
use crate::models::{
    DataType, MetricSample, PhysiologicalMetric, SleepPeriod, SleepSession, SyncCursor,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use unit_of_work::UnitOfWork;

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Predicate over sleep periods; every `Some` field must match
#[derive(Debug, Clone, Default)]
pub struct PeriodQuery {
    pub ids: Option<BTreeSet<String>>,
    pub source_id: Option<String>,
    pub is_resolved: Option<bool>,
    pub session_day: Option<NaiveDate>,
    /// Periods owning at least one of these sample ids
    pub containing_samples: Option<BTreeSet<String>>,
}

impl PeriodQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: Some(BTreeSet::from([id.into()])),
            ..Self::default()
        }
    }

    pub fn by_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Self::default()
        }
    }

    pub fn unresolved() -> Self {
        Self {
            is_resolved: Some(false),
            ..Self::default()
        }
    }

    pub fn for_session(day: NaiveDate) -> Self {
        Self {
            session_day: Some(day),
            ..Self::default()
        }
    }

    pub fn containing_samples<I, S>(sample_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            containing_samples: Some(sample_ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, period: &SleepPeriod) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&period.id) {
                return false;
            }
        }
        if let Some(source_id) = &self.source_id {
            if &period.source_id != source_id {
                return false;
            }
        }
        if let Some(resolved) = self.is_resolved {
            if period.is_resolved != resolved {
                return false;
            }
        }
        if let Some(day) = self.session_day {
            if period.session_day != Some(day) {
                return false;
            }
        }
        if let Some(sample_ids) = &self.containing_samples {
            if !period.samples.iter().any(|s| sample_ids.contains(&s.id)) {
                return false;
            }
        }
        true
    }
}

/// Predicate over sessions
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    /// Inclusive lower bound on the ownership day
    pub from_day: Option<NaiveDate>,
    /// Inclusive upper bound on the ownership day
    pub to_day: Option<NaiveDate>,
    pub is_finalized: Option<bool>,
    /// Newest first when set, oldest first otherwise
    pub descending: bool,
    pub limit: Option<usize>,
}

impl SessionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn day(day: NaiveDate) -> Self {
        Self {
            from_day: Some(day),
            to_day: Some(day),
            ..Self::default()
        }
    }

    pub fn between(from_day: NaiveDate, to_day: NaiveDate) -> Self {
        Self {
            from_day: Some(from_day),
            to_day: Some(to_day),
            ..Self::default()
        }
    }

    pub fn unfinalized() -> Self {
        Self {
            is_finalized: Some(false),
            ..Self::default()
        }
    }

    pub fn latest(limit: usize) -> Self {
        Self {
            descending: true,
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn matches(&self, session: &SleepSession) -> bool {
        if let Some(from) = self.from_day {
            if session.day < from {
                return false;
            }
        }
        if let Some(to) = self.to_day {
            if session.day > to {
                return false;
            }
        }
        if let Some(finalized) = self.is_finalized {
            if session.is_finalized != finalized {
                return false;
            }
        }
        true
    }

    /// Apply ordering and limit to an already filtered result
    pub fn arrange(&self, mut sessions: Vec<SleepSession>) -> Vec<SleepSession> {
        sessions.sort_by_key(|s| s.day);
        if self.descending {
            sessions.reverse();
        }
        if let Some(limit) = self.limit {
            sessions.truncate(limit);
        }
        sessions
    }
}

/// Predicate over physiological samples
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub ids: Option<BTreeSet<String>>,
    pub metric: Option<PhysiologicalMetric>,
    /// Samples intersecting `[start, end]`
    pub overlapping: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl MetricQuery {
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn overlapping(
        metric: PhysiologicalMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            metric: Some(metric),
            overlapping: Some((start, end)),
            ..Self::default()
        }
    }

    pub fn matches(&self, sample: &MetricSample) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&sample.id) {
                return false;
            }
        }
        if let Some(metric) = self.metric {
            if sample.metric != metric {
                return false;
            }
        }
        if let Some((start, end)) = self.overlapping {
            if sample.start > end || sample.end < start {
                return false;
            }
        }
        true
    }
}

/// Staged writes of one unit of work
///
/// Upserts and deletes of the same key are mutually exclusive: staging one
/// clears the other.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub upserted_periods: BTreeMap<String, SleepPeriod>,
    pub deleted_periods: BTreeSet<String>,
    pub upserted_sessions: BTreeMap<NaiveDate, SleepSession>,
    pub deleted_sessions: BTreeSet<NaiveDate>,
    pub upserted_metrics: BTreeMap<String, MetricSample>,
    pub deleted_metrics: BTreeSet<String>,
    pub cursors: BTreeMap<DataType, SyncCursor>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserted_periods.is_empty()
            && self.deleted_periods.is_empty()
            && self.upserted_sessions.is_empty()
            && self.deleted_sessions.is_empty()
            && self.upserted_metrics.is_empty()
            && self.deleted_metrics.is_empty()
            && self.cursors.is_empty()
    }

    /// Number of staged record changes
    pub fn len(&self) -> usize {
        self.upserted_periods.len()
            + self.deleted_periods.len()
            + self.upserted_sessions.len()
            + self.deleted_sessions.len()
            + self.upserted_metrics.len()
            + self.deleted_metrics.len()
            + self.cursors.len()
    }
}

/// Persistent store consumed by the pipeline
///
/// Fetches return committed state only; [`UnitOfWork`] overlays staged
/// changes on top.
pub trait SleepStore: Send + Sync {
    fn fetch_periods(&self, query: &PeriodQuery) -> StoreResult<Vec<SleepPeriod>>;

    fn fetch_sessions(&self, query: &SessionQuery) -> StoreResult<Vec<SleepSession>>;

    fn fetch_metric_samples(&self, query: &MetricQuery) -> StoreResult<Vec<MetricSample>>;

    fn load_cursor(&self, data_type: DataType) -> StoreResult<Option<SyncCursor>>;

    /// Apply every change or none of them
    fn commit(&self, changes: ChangeSet) -> StoreResult<()>;
}
