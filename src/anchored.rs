//! Anchored, paginated ingestion of one provider stream
//!
//! Each page is applied and committed in its own unit of work together with
//! the cursor that produced it, so the committed cursor is always a valid
//! resume point. A failure aborts the loop and leaves earlier pages in place.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{ProviderError, Result};
use crate::grouping::PeriodGrouper;
use crate::merge::PeriodMerger;
use crate::models::{DataType, DateRange, StageSample, SyncCursor};
use crate::provider::{ProviderPage, SleepDataProvider};
use crate::store::{PeriodQuery, SleepStore, StoreResult, UnitOfWork};

/// How a stream is pulled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One page from the stored cursor
    Incremental,
    /// Start over without a cursor, restricted to a date range, and follow
    /// the issued cursors until the provider runs dry
    Full { range: DateRange },
}

impl SyncMode {
    pub fn range(&self) -> Option<DateRange> {
        match self {
            SyncMode::Incremental => None,
            SyncMode::Full { range } => Some(*range),
        }
    }

    /// Whether the loop keeps fetching while pages carry additions
    pub fn follows_cursors(&self) -> bool {
        matches!(self, SyncMode::Full { .. })
    }
}

/// Outcome of syncing one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSyncReport {
    pub data_type: DataType,
    pub pages: usize,
    pub added: usize,
    pub deleted: usize,
    /// Periods created, re-derived, merged or removed
    pub periods_touched: usize,
    pub cancelled: bool,
}

impl StreamSyncReport {
    fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            pages: 0,
            added: 0,
            deleted: 0,
            periods_touched: 0,
            cancelled: false,
        }
    }
}

/// Pulls a provider stream page by page into the store
pub struct AnchoredSyncController {
    store: Arc<dyn SleepStore>,
    provider: Arc<dyn SleepDataProvider>,
    grouper: PeriodGrouper,
    merger: PeriodMerger,
    fetch_timeout: Duration,
}

impl AnchoredSyncController {
    pub fn new(
        store: Arc<dyn SleepStore>,
        provider: Arc<dyn SleepDataProvider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            provider,
            grouper: PeriodGrouper::from_config(config),
            merger: PeriodMerger::from_config(config),
            fetch_timeout: Duration::from_secs(config.sync.fetch_timeout_seconds),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sync `data_type` until the mode's stop condition or cancellation
    ///
    /// Cancellation is not an error: the report comes back with `cancelled`
    /// set and every page applied so far stays committed.
    pub async fn sync_stream(
        &self,
        data_type: DataType,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> Result<StreamSyncReport> {
        let mut report = StreamSyncReport::new(data_type);
        let range = mode.range();
        let mut cursor = match mode {
            SyncMode::Incremental => self.store.load_cursor(data_type)?.map(|c| c.token),
            SyncMode::Full { .. } => None,
        };

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let page = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                page = self.fetch_page(data_type, range, cursor.as_deref()) => page?,
            };

            let added = page.added.len();
            let fresh_cursor = page
                .next_cursor
                .as_ref()
                .filter(|next| Some(next.as_str()) != cursor.as_deref())
                .cloned();

            self.apply_page(data_type, &page, &mut report)?;
            report.pages += 1;
            debug!(
                %data_type,
                page = report.pages,
                added,
                deleted = page.deleted.len(),
                "Applied provider page"
            );

            if let Some(next) = page.next_cursor {
                cursor = Some(next);
            }
            if !(mode.follows_cursors() && added > 0 && fresh_cursor.is_some()) {
                break;
            }
        }

        info!(
            %data_type,
            pages = report.pages,
            added = report.added,
            deleted = report.deleted,
            periods = report.periods_touched,
            cancelled = report.cancelled,
            "Stream sync finished"
        );
        Ok(report)
    }

    /// One bounded fetch; no data at the provider reads as an empty page
    async fn fetch_page(
        &self,
        data_type: DataType,
        range: Option<DateRange>,
        cursor: Option<&str>,
    ) -> Result<ProviderPage> {
        let fetch = self.provider.fetch_interval_samples(data_type, range, cursor);
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(err)) if err.is_no_data() => {
                debug!(%data_type, "No data available, treating as empty page");
                Ok(ProviderPage::empty())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                warn!(%data_type, timeout = ?self.fetch_timeout, "Provider fetch timed out");
                Err(ProviderError::Timeout {
                    data_type,
                    seconds: self.fetch_timeout.as_secs(),
                }
                .into())
            }
        }
    }

    /// Apply deletions, then additions, then the cursor, in one commit
    fn apply_page(
        &self,
        data_type: DataType,
        page: &ProviderPage,
        report: &mut StreamSyncReport,
    ) -> Result<()> {
        let mut uow = UnitOfWork::new(self.store.as_ref());

        if data_type == DataType::SleepAnalysis {
            report.periods_touched += remove_stage_samples(&mut uow, &self.grouper, &page.deleted)?;
            let samples: Vec<StageSample> = page.stage_samples().cloned().collect();
            let (added, touched) = self.ingest_stage_samples(&mut uow, samples)?;
            report.added += added;
            report.periods_touched += touched;
        } else {
            for id in &page.deleted {
                uow.delete_metric_sample(id);
            }
            for sample in page.metric_samples() {
                if sample.metric.data_type() == data_type {
                    uow.upsert_metric_sample(sample.clone());
                    report.added += 1;
                }
            }
        }
        report.deleted += page.deleted.len();

        if let Some(token) = &page.next_cursor {
            uow.set_cursor(SyncCursor::new(data_type, token.clone()));
        }

        uow.save()?;
        Ok(())
    }

    /// Group new samples, fold them into periods and merge across the batch
    /// boundary; returns (samples added, periods touched)
    fn ingest_stage_samples(
        &self,
        uow: &mut UnitOfWork<'_>,
        samples: Vec<StageSample>,
    ) -> StoreResult<(usize, usize)> {
        if samples.is_empty() {
            return Ok((0, 0));
        }

        let known: HashSet<String> = uow
            .fetch_periods(&PeriodQuery::containing_samples(samples.iter().map(|s| s.id.clone())))?
            .into_iter()
            .flat_map(|p| p.samples.into_iter().map(|s| s.id))
            .collect();
        let fresh: Vec<StageSample> = samples
            .into_iter()
            .filter(|s| !known.contains(&s.id))
            .collect();
        if !known.is_empty() {
            debug!(duplicates = known.len(), "Skipping already persisted samples");
        }

        let candidates = self.grouper.group(fresh);
        let added = candidates.iter().map(|p| p.samples.len()).sum();
        let mut candidate_ids = Vec::with_capacity(candidates.len());

        for mut candidate in candidates {
            // Same source and start as a stored period: extend it in place
            if let Some(mut existing) = uow.fetch_period(&candidate.id)? {
                existing.samples.append(&mut candidate.samples);
                existing.recompute_bounds();
                existing.is_resolved = false;
                if let Some(day) = existing.session_day {
                    uow.invalidate_session(day)?;
                }
                candidate = existing;
            }
            candidate_ids.push(candidate.id.clone());
            uow.upsert_period(candidate);
        }

        let merged = self.merger.merge(uow, &candidate_ids)?;
        Ok((added, candidate_ids.len() + merged.absorbed))
    }
}

/// Remove deleted samples from their periods; returns periods touched
///
/// The remaining samples of each owner are regrouped, so a deletion that
/// opens a gap over the threshold splits the period. The first group keeps
/// the session link under a recomputed id; the others become new unresolved
/// periods. A period left empty is deleted. Either way the linked session is
/// unfinalized.
fn remove_stage_samples(
    uow: &mut UnitOfWork<'_>,
    grouper: &PeriodGrouper,
    ids: &[String],
) -> StoreResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let owners = uow.fetch_periods(&PeriodQuery::containing_samples(ids.iter().cloned()))?;
    let mut touched = 0;

    for period in owners {
        touched += 1;
        if let Some(day) = period.session_day {
            uow.invalidate_session(day)?;
        }

        let remaining: Vec<StageSample> = period
            .samples
            .into_iter()
            .filter(|s| !doomed.contains(s.id.as_str()))
            .collect();
        let mut groups = grouper.group(remaining).into_iter();

        let Some(mut first) = groups.next() else {
            debug!(period = %period.id, "Deleting period without samples");
            uow.delete_period(&period.id);
            continue;
        };
        first.session_day = period.session_day;
        uow.rekey_period(&period.id, first);

        for split in groups {
            debug!(period = %period.id, split = %split.id, "Deletion split sleep period");
            touched += 1;
            uow.upsert_period(split);
        }
    }

    Ok(touched)
}
