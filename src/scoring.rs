//! Composite sleep-quality score
//!
//! The score is out of 100 and made of four parts:
//!
//! | Part     | Max | Measure                                              |
//! |----------|-----|------------------------------------------------------|
//! | Duration | 60  | total sleep against the sleep need                   |
//! | REM      | 15  | REM time against a quarter of the sleep need         |
//! | Deep     | 15  | deep time against a quarter of the sleep need        |
//! | Awake    | 10  | wake-ups of two minutes or more and the longest one  |

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::models::{SleepSession, SleepStage, StageSample};

/// Shortest continuous awake span counted as a wake-up
pub const WAKE_UP_MIN_SECONDS: i64 = 120;

/// Awake spans longer than this cost a flat penalty
pub const LONG_AWAKE_SECONDS: i64 = 20 * 60;

const DURATION_POINTS: f64 = 60.0;
const STAGE_POINTS: f64 = 15.0;
const AWAKE_POINTS: f64 = 10.0;
const FREE_WAKE_UPS: u32 = 2;
const MAX_WAKE_UPS: u32 = 7;
const LONG_AWAKE_PENALTY: f64 = 5.0;

/// Lengths in seconds of continuous awake spans, in start order
///
/// Awake samples are taken in start order and joined while the next one
/// starts no later than the end of the current span.
pub fn awake_spans(samples: &[StageSample]) -> Vec<i64> {
    let mut awake: Vec<&StageSample> = samples
        .iter()
        .filter(|s| s.stage == SleepStage::Awake && s.is_valid())
        .collect();
    awake.sort_by_key(|s| s.start);

    let mut spans = Vec::new();
    let mut current: Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> = None;

    for sample in awake {
        current = match current {
            Some((start, end)) if sample.start <= end => Some((start, end.max(sample.end))),
            Some((start, end)) => {
                spans.push((end - start).num_seconds());
                Some((sample.start, sample.end))
            }
            None => Some((sample.start, sample.end)),
        };
    }
    if let Some((start, end)) = current {
        spans.push((end - start).num_seconds());
    }
    spans
}

/// Per-part points behind a total score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub duration: f64,
    pub rem: f64,
    pub deep: f64,
    pub awake: f64,
    pub total: u8,
}

/// Sleep score calculator for a given sleep need
#[derive(Debug, Clone, Copy)]
pub struct SleepScoreCalculator {
    target_seconds: f64,
}

impl SleepScoreCalculator {
    pub fn new(sleep_need_hours: f64) -> Self {
        Self {
            target_seconds: sleep_need_hours * 3600.0,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            target_seconds: config.target_sleep_seconds(),
        }
    }

    /// Total score for a session whose durations are up to date
    pub fn calculate(&self, session: &SleepSession) -> u8 {
        self.breakdown(session).total
    }

    pub fn breakdown(&self, session: &SleepSession) -> ScoreBreakdown {
        let stage_target = self.target_seconds / 4.0;

        let duration = ratio(session.total_sleep_seconds, self.target_seconds) * DURATION_POINTS;
        let rem = ratio(session.rem_seconds, stage_target) * STAGE_POINTS;
        let deep = ratio(session.deep_seconds, stage_target) * STAGE_POINTS;
        let awake = Self::awake_points(session.wake_up_count, session.longest_awake_seconds);

        let total = (duration + rem + deep + awake).round().clamp(0.0, 100.0) as u8;

        ScoreBreakdown {
            duration,
            rem,
            deep,
            awake,
            total,
        }
    }

    /// Awake part, 0 to 10
    pub fn awake_points(wake_ups: u32, longest_awake_seconds: i64) -> f64 {
        let mut points = if wake_ups > MAX_WAKE_UPS {
            0.0
        } else {
            AWAKE_POINTS - 2.0 * wake_ups.saturating_sub(FREE_WAKE_UPS) as f64
        };
        if longest_awake_seconds > LONG_AWAKE_SECONDS {
            points -= LONG_AWAKE_PENALTY;
        }
        points.max(0.0)
    }
}

impl Default for SleepScoreCalculator {
    fn default() -> Self {
        Self::new(8.0)
    }
}

fn ratio(seconds: i64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (seconds.max(0) as f64 / target).min(1.0)
}
