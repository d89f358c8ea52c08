use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{ProviderPage, ProviderRecord, SleepDataProvider};
use crate::error::ProviderError;
use crate::models::{DataType, DateRange, MetricSample, StageSample};

/// On-disk fixture format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureFile {
    #[serde(default)]
    pub stage_samples: Vec<StageSample>,

    #[serde(default)]
    pub metric_samples: Vec<MetricSample>,
}

#[derive(Debug, Clone)]
enum Change {
    Added(ProviderRecord),
    Deleted(String),
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    data_type: DataType,
    change: Change,
}

#[derive(Debug, Default)]
struct FixtureState {
    entries: Vec<Entry>,
    next_seq: u64,
    authorized: bool,
    unavailable: HashSet<DataType>,
    pending_failures: VecDeque<ProviderError>,
    fetch_count: usize,
}

/// Provider backed by an in-memory change log
///
/// Every added or deleted record gets a sequence number; a cursor is the last
/// sequence number the caller has seen, so incremental fetches return exactly
/// the changes made since. Used by the CLI with a JSON fixture and by tests to
/// script provider behavior.
#[derive(Debug)]
pub struct FixtureProvider {
    state: Mutex<FixtureState>,
    page_size: usize,
    latency: Option<Duration>,
}

impl FixtureProvider {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                authorized: true,
                next_seq: 1,
                ..FixtureState::default()
            }),
            page_size: page_size.max(1),
            latency: None,
        }
    }

    /// Load a JSON fixture file
    pub fn from_json_file<P: AsRef<Path>>(path: P, page_size: usize) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fixture: {}", path.as_ref().display()))?;
        let fixture: FixtureFile =
            serde_json::from_str(&content).with_context(|| "Failed to parse fixture JSON")?;

        let provider = Self::new(page_size);
        provider.push_stage_samples(fixture.stage_samples);
        provider.push_metric_samples(fixture.metric_samples);
        Ok(provider)
    }

    /// Delay every fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        // The state holds plain data; a poisoned lock still has a usable value
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_stage_samples(&self, samples: impl IntoIterator<Item = StageSample>) {
        let mut state = self.lock();
        for sample in samples {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(Entry {
                seq,
                data_type: DataType::SleepAnalysis,
                change: Change::Added(ProviderRecord::Stage(sample)),
            });
        }
    }

    pub fn push_metric_samples(&self, samples: impl IntoIterator<Item = MetricSample>) {
        let mut state = self.lock();
        for sample in samples {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(Entry {
                seq,
                data_type: sample.metric.data_type(),
                change: Change::Added(ProviderRecord::Metric(sample)),
            });
        }
    }

    /// Record deletions of previously delivered records
    pub fn delete(&self, data_type: DataType, ids: impl IntoIterator<Item = impl Into<String>>) {
        let mut state = self.lock();
        for id in ids {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(Entry {
                seq,
                data_type,
                change: Change::Deleted(id.into()),
            });
        }
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.lock().authorized = authorized;
    }

    /// Report `data_type` as unsupported on this platform
    pub fn set_unavailable(&self, data_type: DataType) {
        self.lock().unavailable.insert(data_type);
    }

    /// Fail upcoming fetches with `error`, one per call
    pub fn fail_next_fetch(&self, error: ProviderError) {
        self.lock().pending_failures.push_back(error);
    }

    /// Number of fetches served so far, failures included
    pub fn fetch_count(&self) -> usize {
        self.lock().fetch_count
    }

    fn page_for(
        &self,
        data_type: DataType,
        range: Option<DateRange>,
        cursor: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        let mut state = self.lock();
        state.fetch_count += 1;

        if let Some(err) = state.pending_failures.pop_front() {
            return Err(err);
        }
        if state.unavailable.contains(&data_type) {
            return Err(ProviderError::Unavailable { data_type });
        }
        if !state.authorized {
            return Err(ProviderError::AuthorizationDenied { data_type });
        }
        if !state.entries.iter().any(|e| e.data_type == data_type) {
            return Err(ProviderError::NoDataAvailable { data_type });
        }

        let after: u64 = match cursor {
            None => 0,
            Some(token) => token.parse().map_err(|_| ProviderError::Fetch {
                data_type,
                reason: format!("invalid cursor: {}", token),
            })?,
        };

        let mut page = ProviderPage::empty();
        let mut last_seen = after;
        for entry in state
            .entries
            .iter()
            .filter(|e| e.data_type == data_type && e.seq > after)
        {
            if page.added.len() + page.deleted.len() >= self.page_size {
                break;
            }
            last_seen = entry.seq;
            match &entry.change {
                Change::Added(record) => {
                    let (start, end) = match record {
                        ProviderRecord::Stage(s) => (s.start, s.end),
                        ProviderRecord::Metric(m) => (m.start, m.end),
                    };
                    if range.map_or(true, |r| r.overlaps(start, end)) {
                        page.added.push(record.clone());
                    }
                }
                Change::Deleted(id) => page.deleted.push(id.clone()),
            }
        }
        page.next_cursor = Some(last_seen.to_string());

        debug!(
            %data_type,
            added = page.added.len(),
            deleted = page.deleted.len(),
            cursor = ?page.next_cursor,
            "Fixture page served"
        );
        Ok(page)
    }
}

#[async_trait]
impl SleepDataProvider for FixtureProvider {
    async fn request_authorization(&self, types: &[DataType]) -> Result<bool, ProviderError> {
        let state = self.lock();
        if let Some(data_type) = types.iter().find(|t| state.unavailable.contains(t)) {
            debug!(%data_type, "Requested type is unavailable");
        }
        Ok(state.authorized)
    }

    async fn fetch_interval_samples(
        &self,
        data_type: DataType,
        range: Option<DateRange>,
        cursor: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.page_for(data_type, range, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SleepStage;
    use chrono::{TimeZone, Utc};

    fn sample(id: &str, hour: u32) -> StageSample {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap();
        StageSample::new(
            id,
            SleepStage::Core,
            start,
            start + chrono::Duration::minutes(30),
            "com.apple.health.abc",
            "Watch7,1",
        )
    }

    #[tokio::test]
    async fn test_pages_follow_cursor() {
        let provider = FixtureProvider::new(2);
        provider.push_stage_samples(vec![sample("a", 1), sample("b", 2), sample("c", 3)]);

        let first = provider
            .fetch_interval_samples(DataType::SleepAnalysis, None, None)
            .await
            .unwrap();
        assert_eq!(first.added.len(), 2);

        let second = provider
            .fetch_interval_samples(DataType::SleepAnalysis, None, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.added.len(), 1);
        assert_eq!(second.added[0].id(), "c");

        let third = provider
            .fetch_interval_samples(DataType::SleepAnalysis, None, second.next_cursor.as_deref())
            .await
            .unwrap();
        assert!(third.added.is_empty());
        assert_eq!(third.next_cursor, second.next_cursor);
    }

    #[tokio::test]
    async fn test_deletions_after_cursor() {
        let provider = FixtureProvider::new(10);
        provider.push_stage_samples(vec![sample("a", 1)]);
        let first = provider
            .fetch_interval_samples(DataType::SleepAnalysis, None, None)
            .await
            .unwrap();

        provider.delete(DataType::SleepAnalysis, ["a"]);
        let next = provider
            .fetch_interval_samples(DataType::SleepAnalysis, None, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(next.deleted, vec!["a".to_string()]);
        assert!(next.added.is_empty());
    }

    #[tokio::test]
    async fn test_error_modes() {
        let provider = FixtureProvider::new(10);
        let err = provider
            .fetch_interval_samples(DataType::HeartRate, None, None)
            .await
            .unwrap_err();
        assert!(err.is_no_data());

        provider.push_stage_samples(vec![sample("a", 1)]);
        provider.set_authorized(false);
        assert!(!provider.request_authorization(&DataType::ALL).await.unwrap());
        assert!(matches!(
            provider
                .fetch_interval_samples(DataType::SleepAnalysis, None, None)
                .await,
            Err(ProviderError::AuthorizationDenied { .. })
        ));

        provider.set_authorized(true);
        provider.set_unavailable(DataType::SleepAnalysis);
        let err = provider
            .fetch_interval_samples(DataType::SleepAnalysis, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { data_type: DataType::SleepAnalysis }));
        assert!(!err.is_no_data());
    }

    #[tokio::test]
    async fn test_range_filters_additions() {
        let provider = FixtureProvider::new(10);
        provider.push_stage_samples(vec![sample("a", 1), sample("b", 10)]);
        let range = DateRange::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap(),
        );

        let page = provider
            .fetch_interval_samples(DataType::SleepAnalysis, Some(range), None)
            .await
            .unwrap();
        assert_eq!(page.added.len(), 1);
        assert_eq!(page.added[0].id(), "a");
    }
}
