//! Merging of periods split across ingestion batches
//!
//! A night delivered over two pages is grouped into two periods. After each
//! batch the merger looks at the new periods and collapses every same-source
//! period within the gap threshold into the earliest one.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::grouping::DEFAULT_GAP_SECONDS;
use crate::models::SleepPeriod;
use crate::store::{PeriodQuery, StoreResult, UnitOfWork};

/// What one merge pass changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Ids of the periods that absorbed others, after re-keying
    pub survivors: Vec<String>,

    /// Number of period records folded into a survivor and deleted
    pub absorbed: usize,

    /// Sessions whose linked periods were merged, now unfinalized
    pub invalidated_sessions: BTreeSet<NaiveDate>,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.absorbed == 0
    }
}

/// Collapses same-source periods separated by at most the gap threshold
#[derive(Debug, Clone, Copy)]
pub struct PeriodMerger {
    gap_seconds: i64,
}

impl PeriodMerger {
    pub fn new(gap_seconds: i64) -> Self {
        Self {
            gap_seconds: gap_seconds.max(0),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.sync.merge_gap_seconds)
    }

    /// Merge each of `candidate_ids` with its mergeable neighbours
    ///
    /// Candidates already absorbed earlier in the pass are skipped. Running
    /// the pass again over its own output changes nothing.
    pub fn merge(&self, uow: &mut UnitOfWork<'_>, candidate_ids: &[String]) -> StoreResult<MergeReport> {
        let mut report = MergeReport::default();

        for candidate_id in candidate_ids {
            let Some(candidate) = uow.fetch_period(candidate_id)? else {
                continue;
            };

            let siblings = uow.fetch_periods(&PeriodQuery::by_source(candidate.source_id.clone()))?;
            let cluster = self.cluster_containing(siblings, &candidate.id);
            if cluster.len() < 2 {
                continue;
            }

            self.collapse(uow, cluster, &mut report)?;
        }

        if !report.is_noop() {
            info!(
                survivors = report.survivors.len(),
                absorbed = report.absorbed,
                "Merged split sleep periods"
            );
        }
        Ok(report)
    }

    /// The chain of periods around `target_id` whose consecutive gaps are
    /// within the threshold, in start order
    fn cluster_containing(&self, mut periods: Vec<SleepPeriod>, target_id: &str) -> Vec<SleepPeriod> {
        periods.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let mut chain: Vec<SleepPeriod> = Vec::new();
        let mut chain_end: Option<DateTime<Utc>> = None;

        for period in periods {
            if let Some(end) = chain_end {
                if (period.start - end).num_seconds() > self.gap_seconds {
                    if chain.iter().any(|p| p.id == target_id) {
                        return chain;
                    }
                    chain.clear();
                    chain_end = None;
                }
            }
            chain_end = Some(match chain_end {
                Some(end) if end > period.end => end,
                _ => period.end,
            });
            chain.push(period);
        }

        if chain.iter().any(|p| p.id == target_id) {
            chain
        } else {
            Vec::new()
        }
    }

    fn collapse(
        &self,
        uow: &mut UnitOfWork<'_>,
        cluster: Vec<SleepPeriod>,
        report: &mut MergeReport,
    ) -> StoreResult<()> {
        let mut members = cluster.into_iter();
        let Some(mut survivor) = members.next() else {
            return Ok(());
        };
        let old_id = survivor.id.clone();
        let mut known: HashSet<String> = survivor.samples.iter().map(|s| s.id.clone()).collect();
        let mut linked_days = Vec::new();

        for absorbed in members {
            debug!(survivor = %old_id, absorbed = %absorbed.id, "Absorbing sleep period");
            if survivor.session_day.is_none() {
                survivor.session_day = absorbed.session_day;
            } else if let Some(day) = absorbed.session_day {
                linked_days.push(day);
            }
            for sample in absorbed.samples {
                if known.insert(sample.id.clone()) {
                    survivor.samples.push(sample);
                }
            }
            uow.delete_period(&absorbed.id);
            report.absorbed += 1;
        }

        survivor.recompute_bounds();
        survivor.is_resolved = false;

        // The survivor's own session is rescored too, its period just changed
        linked_days.extend(survivor.session_day);
        for day in linked_days {
            if uow.invalidate_session(day)? {
                report.invalidated_sessions.insert(day);
            }
        }

        report.survivors.push(survivor.id.clone());
        uow.rekey_period(&old_id, survivor);
        Ok(())
    }
}

impl Default for PeriodMerger {
    fn default() -> Self {
        Self::new(DEFAULT_GAP_SECONDS)
    }
}
