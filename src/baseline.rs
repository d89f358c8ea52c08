//! Rolling personal baselines and z-scores for recovery metrics
//!
//! For a session on day D the baseline of each metric is the mean of that
//! metric's nightly averages over the sessions from D-90 to D-1. Zero means
//! "no measurement" and is excluded. With fewer than seven valid nights the
//! baseline is not computed and every field carries [`NOT_COMPUTED`].

use chrono::Duration;
use statrs::statistics::Statistics;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::models::{
    MetricBaseline, PhysiologicalAverages, PhysiologicalMetric, RecoveryBaselines, SleepPeriod,
    SleepSession, NOT_COMPUTED,
};
use crate::store::{MetricQuery, SessionQuery, StoreResult, UnitOfWork};

/// Baseline and z-score engine
#[derive(Debug, Clone, Copy)]
pub struct RecoveryBaselineEngine {
    window_days: i64,
    min_valid_samples: usize,
}

impl RecoveryBaselineEngine {
    pub fn new(window_days: i64, min_valid_samples: usize) -> Self {
        Self {
            window_days: window_days.max(1),
            min_valid_samples: min_valid_samples.max(2),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.baseline.window_days, config.baseline.min_valid_samples)
    }

    /// Baseline of `history` and the z-score of `current` against it
    pub fn baseline_for(&self, current: f64, history: &[f64]) -> MetricBaseline {
        let valid: Vec<f64> = history
            .iter()
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();
        if valid.len() < self.min_valid_samples {
            return MetricBaseline::not_computed();
        }

        let mean = valid.iter().mean();
        let std_dev = valid.iter().std_dev();

        let z_score = if !(current.is_finite() && current > 0.0) {
            NOT_COMPUTED
        } else if std_dev == 0.0 {
            0.0
        } else {
            (current - mean) / std_dev
        };

        MetricBaseline {
            baseline: mean,
            std_dev,
            z_score,
        }
    }

    /// Baselines for `session` from the sessions in its trailing window
    pub fn compute(&self, uow: &UnitOfWork<'_>, session: &SleepSession) -> StoreResult<RecoveryBaselines> {
        let from = session.day - Duration::days(self.window_days);
        let to = session.day - Duration::days(1);
        let history = uow.fetch_sessions(&SessionQuery::between(from, to))?;

        let mut baselines = RecoveryBaselines::not_computed();
        for metric in PhysiologicalMetric::ALL {
            let values: Vec<f64> = history.iter().map(|s| s.averages.get(metric)).collect();
            let baseline = self.baseline_for(session.averages.get(metric), &values);
            trace!(day = %session.day, %metric, ?baseline, "Metric baseline");
            baselines.set(metric, baseline);
        }

        debug!(day = %session.day, history = history.len(), "Computed recovery baselines");
        Ok(baselines)
    }
}

impl Default for RecoveryBaselineEngine {
    fn default() -> Self {
        Self::new(90, 7)
    }
}

/// Mean of each metric's samples overlapping `period`, `0.0` when there are none
pub fn physiological_averages(
    uow: &UnitOfWork<'_>,
    period: &SleepPeriod,
) -> StoreResult<PhysiologicalAverages> {
    let mut averages = PhysiologicalAverages::default();
    for metric in PhysiologicalMetric::ALL {
        let values: Vec<f64> = uow
            .fetch_metric_samples(&MetricQuery::overlapping(metric, period.start, period.end))?
            .iter()
            .filter(|s| s.value.is_finite() && s.value > 0.0)
            .map(|s| s.value)
            .collect();
        if !values.is_empty() {
            averages.set(metric, values.iter().mean());
        }
    }
    Ok(averages)
}
