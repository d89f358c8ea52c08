//! Grouping of raw stage samples into candidate sleep periods

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

use crate::config::{AppConfig, SampleFilterSettings};
use crate::models::{SleepPeriod, SleepStage, StageSample};

/// Default gap that still joins two samples into one period
pub const DEFAULT_GAP_SECONDS: i64 = 900;

/// Decides which samples take part in grouping
///
/// A sample participates when its source id starts with a recognized bundle
/// prefix, its product type starts with a recognized wearable class, and it
/// is not an in-bed marker.
#[derive(Debug, Clone)]
pub struct SampleFilter {
    bundle_prefixes: Vec<String>,
    product_classes: Vec<String>,
}

impl SampleFilter {
    pub fn new(bundle_prefixes: Vec<String>, product_classes: Vec<String>) -> Self {
        Self {
            bundle_prefixes,
            product_classes,
        }
    }

    pub fn from_settings(settings: &SampleFilterSettings) -> Self {
        Self::new(
            settings.bundle_prefixes.clone(),
            settings.product_classes.clone(),
        )
    }

    pub fn accepts(&self, sample: &StageSample) -> bool {
        sample.stage != SleepStage::InBed
            && sample.is_valid()
            && self
                .bundle_prefixes
                .iter()
                .any(|prefix| sample.source_id.starts_with(prefix.as_str()))
            && self
                .product_classes
                .iter()
                .any(|class| sample.product_type.starts_with(class.as_str()))
    }
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::from_settings(&SampleFilterSettings::default())
    }
}

/// Splits a flat sample list into contiguous candidate periods
#[derive(Debug, Clone)]
pub struct PeriodGrouper {
    filter: SampleFilter,
    gap_seconds: i64,
}

impl PeriodGrouper {
    pub fn new(filter: SampleFilter, gap_seconds: i64) -> Self {
        Self {
            filter,
            gap_seconds: gap_seconds.max(0),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            SampleFilter::from_settings(&config.filter),
            config.sync.merge_gap_seconds,
        )
    }

    /// Group samples into unresolved periods, one list per source
    ///
    /// Rejected samples are dropped, and so are repeated ids within the batch.
    /// The result is ordered by period start.
    pub fn group(&self, samples: Vec<StageSample>) -> Vec<SleepPeriod> {
        let total = samples.len();
        let mut seen = HashSet::new();
        let mut by_source: BTreeMap<String, Vec<StageSample>> = BTreeMap::new();

        for sample in samples {
            if !self.filter.accepts(&sample) {
                trace!(id = %sample.id, source = %sample.source_id, "Sample filtered out");
                continue;
            }
            if !seen.insert(sample.id.clone()) {
                continue;
            }
            by_source
                .entry(sample.source_id.clone())
                .or_default()
                .push(sample);
        }

        let mut periods: Vec<SleepPeriod> = by_source
            .into_values()
            .flat_map(|samples| self.group_single_source(samples))
            .collect();
        periods.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        debug!(
            samples = total,
            accepted = seen.len(),
            periods = periods.len(),
            "Grouped stage samples"
        );
        periods
    }

    fn group_single_source(&self, mut samples: Vec<StageSample>) -> Vec<SleepPeriod> {
        samples.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let mut groups: Vec<Vec<StageSample>> = Vec::new();
        let mut current: Vec<StageSample> = Vec::new();
        let mut group_end: Option<DateTime<Utc>> = None;

        for sample in samples {
            if let Some(end) = group_end {
                // Running maximum end, so nested samples never open a gap
                if (sample.start - end).num_seconds() > self.gap_seconds {
                    groups.push(std::mem::take(&mut current));
                    group_end = None;
                }
            }
            group_end = Some(match group_end {
                Some(end) if end > sample.end => end,
                _ => sample.end,
            });
            current.push(sample);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        groups
            .into_iter()
            .filter_map(SleepPeriod::from_samples)
            .collect()
    }
}

impl Default for PeriodGrouper {
    fn default() -> Self {
        Self::new(SampleFilter::default(), DEFAULT_GAP_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap()
    }

    fn sample(id: &str, stage: SleepStage, start_min: i64, end_min: i64) -> StageSample {
        StageSample::new(
            id,
            stage,
            base() + Duration::minutes(start_min),
            base() + Duration::minutes(end_min),
            "com.apple.health.8F2A",
            "Watch6,2",
        )
    }

    #[test]
    fn test_gap_at_threshold_stays_in_period() {
        let grouper = PeriodGrouper::default();
        let periods = grouper.group(vec![
            sample("a", SleepStage::Core, 0, 60),
            sample("b", SleepStage::Deep, 75, 120),
        ]);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].samples.len(), 2);
    }

    #[test]
    fn test_gap_over_threshold_splits() {
        let grouper = PeriodGrouper::default();
        let mut late = sample("b", SleepStage::Deep, 75, 120);
        late.start += Duration::seconds(1);

        let periods = grouper.group(vec![sample("a", SleepStage::Core, 0, 60), late]);
        assert_eq!(periods.len(), 2);
    }

    #[test]
    fn test_nested_sample_does_not_open_gap() {
        let grouper = PeriodGrouper::default();
        let periods = grouper.group(vec![
            sample("outer", SleepStage::Core, 0, 240),
            sample("inner", SleepStage::Awake, 30, 35),
            sample("next", SleepStage::Rem, 200, 260),
        ]);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].end, base() + Duration::minutes(260));
    }

    #[test]
    fn test_filter_rejects_unrecognized_samples() {
        let grouper = PeriodGrouper::default();
        let mut phone = sample("phone", SleepStage::Core, 0, 30);
        phone.product_type = "iPhone14,2".to_string();
        let mut third_party = sample("app", SleepStage::Core, 0, 30);
        third_party.source_id = "com.example.sleepapp".to_string();

        let periods = grouper.group(vec![
            sample("bed", SleepStage::InBed, 0, 480),
            phone,
            third_party,
            sample("ok", SleepStage::Core, 10, 40),
        ]);

        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].samples.len(), 1);
        assert_eq!(periods[0].samples[0].id, "ok");
    }

    #[test]
    fn test_sources_grouped_separately() {
        let grouper = PeriodGrouper::default();
        let mut other = sample("other", SleepStage::Core, 10, 40);
        other.source_id = "com.apple.health.C001".to_string();

        let periods = grouper.group(vec![sample("a", SleepStage::Core, 0, 30), other]);
        assert_eq!(periods.len(), 2);
        assert_ne!(periods[0].source_id, periods[1].source_id);
    }

    #[test]
    fn test_isolated_sample_forms_period() {
        let grouper = PeriodGrouper::default();
        let periods = grouper.group(vec![sample("nap", SleepStage::Core, 0, 20)]);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].duration_seconds, 1200);
        assert!(grouper.group(Vec::new()).is_empty());
    }

    proptest! {
        #[test]
        fn prop_gap_threshold_decides_split(gap in 0i64..3600) {
            let grouper = PeriodGrouper::default();
            let first = sample("a", SleepStage::Core, 0, 60);
            let mut second = first.clone();
            second.id = "b".to_string();
            second.start = first.end + Duration::seconds(gap);
            second.end = second.start + Duration::minutes(30);

            let periods = grouper.group(vec![first, second]);
            let expected = if gap <= DEFAULT_GAP_SECONDS { 1 } else { 2 };
            prop_assert_eq!(periods.len(), expected);
        }

        #[test]
        fn prop_every_accepted_sample_lands_in_one_period(
            offsets in proptest::collection::vec((0i64..1440, 1i64..120), 1..40)
        ) {
            let grouper = PeriodGrouper::default();
            let samples: Vec<StageSample> = offsets
                .iter()
                .enumerate()
                .map(|(i, (start, len))| sample(&format!("s{}", i), SleepStage::Core, *start, start + len))
                .collect();

            let periods = grouper.group(samples.clone());
            let total: usize = periods.iter().map(|p| p.samples.len()).sum();
            prop_assert_eq!(total, samples.len());
            for window in periods.windows(2) {
                prop_assert!(window[0].gap_to(&window[1]) > DEFAULT_GAP_SECONDS);
            }
        }
    }
}
