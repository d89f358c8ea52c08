//! Core data model for sleep reconciliation
//!
//! Raw stage samples arrive from a sensor-data provider, are grouped into
//! [`SleepPeriod`]s and filed under one [`SleepSession`] per ownership day.
//! Physiological quantity samples ([`MetricSample`]) feed the session's
//! averages and the recovery baselines.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel stored in baseline and z-score fields that could not be computed.
///
/// Consumers must treat it as "unknown", never as a measurement.
pub const NOT_COMPUTED: f64 = -100.0;

/// Sleep stage reported by the provider for one interval sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    /// Lying in bed, not necessarily asleep
    InBed,
    /// Asleep, stage not classified by the device
    AsleepUnspecified,
    /// Awake during the sleep period
    Awake,
    /// Core (light) sleep, NREM 1 & 2
    Core,
    /// Deep sleep, NREM 3
    Deep,
    /// REM sleep
    Rem,
}

impl SleepStage {
    pub const ALL: [SleepStage; 6] = [
        SleepStage::InBed,
        SleepStage::AsleepUnspecified,
        SleepStage::Awake,
        SleepStage::Core,
        SleepStage::Deep,
        SleepStage::Rem,
    ];

    /// Whether the stage counts toward total sleep time
    pub fn is_asleep(&self) -> bool {
        matches!(
            self,
            SleepStage::AsleepUnspecified | SleepStage::Core | SleepStage::Deep | SleepStage::Rem
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::InBed => "in_bed",
            SleepStage::AsleepUnspecified => "asleep_unspecified",
            SleepStage::Awake => "awake",
            SleepStage::Core => "core",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
        }
    }
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepStage::InBed => write!(f, "In Bed"),
            SleepStage::AsleepUnspecified => write!(f, "Asleep"),
            SleepStage::Awake => write!(f, "Awake"),
            SleepStage::Core => write!(f, "Core"),
            SleepStage::Deep => write!(f, "Deep"),
            SleepStage::Rem => write!(f, "REM"),
        }
    }
}

impl FromStr for SleepStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SleepStage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("Invalid sleep stage: {}", s))
    }
}

/// Logical data stream exposed by the provider
///
/// Every data type is synced independently and keeps its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    SleepAnalysis,
    HeartRate,
    HeartRateVariability,
    OxygenSaturation,
    RespiratoryRate,
    WristTemperature,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::SleepAnalysis,
        DataType::HeartRate,
        DataType::HeartRateVariability,
        DataType::OxygenSaturation,
        DataType::RespiratoryRate,
        DataType::WristTemperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::SleepAnalysis => "sleep_analysis",
            DataType::HeartRate => "heart_rate",
            DataType::HeartRateVariability => "heart_rate_variability",
            DataType::OxygenSaturation => "oxygen_saturation",
            DataType::RespiratoryRate => "respiratory_rate",
            DataType::WristTemperature => "wrist_temperature",
        }
    }

    /// Physiological metric carried by this stream, `None` for sleep analysis
    pub fn metric(&self) -> Option<PhysiologicalMetric> {
        match self {
            DataType::SleepAnalysis => None,
            DataType::HeartRate => Some(PhysiologicalMetric::HeartRate),
            DataType::HeartRateVariability => Some(PhysiologicalMetric::HeartRateVariability),
            DataType::OxygenSaturation => Some(PhysiologicalMetric::OxygenSaturation),
            DataType::RespiratoryRate => Some(PhysiologicalMetric::RespiratoryRate),
            DataType::WristTemperature => Some(PhysiologicalMetric::WristTemperature),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|data_type| data_type.as_str() == s)
            .ok_or_else(|| format!("Invalid data type: {}", s))
    }
}

/// Half-open UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering the `days` days before `end`
    pub fn trailing_days(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Whether `[start, end]` intersects this range
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end >= self.start
    }
}

/// A single sleep-stage observation delivered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSample {
    /// Provider-issued unique id, stable across deliveries
    pub id: String,

    pub stage: SleepStage,

    pub start: DateTime<Utc>,

    pub end: DateTime<Utc>,

    /// Originating source identifier (e.g. a health-platform bundle id)
    pub source_id: String,

    /// Originating device product class (e.g. "Watch7,1")
    pub product_type: String,

    /// UTC offset of the recording device's time zone, in seconds
    #[serde(default)]
    pub utc_offset_seconds: i32,
}

impl StageSample {
    pub fn new(
        id: impl Into<String>,
        stage: SleepStage,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source_id: impl Into<String>,
        product_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            stage,
            start,
            end,
            source_id: source_id.into(),
            product_type: product_type.into(),
            utc_offset_seconds: 0,
        }
    }

    pub fn with_utc_offset(mut self, seconds: i32) -> Self {
        self.utc_offset_seconds = seconds;
        self
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }

    /// A sample must end after it starts
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

/// A contiguous sleep interval built from grouped stage samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepPeriod {
    /// Stable identity, see [`crate::identity::StableIdentity`]
    pub id: String,

    pub start: DateTime<Utc>,

    pub end: DateTime<Utc>,

    pub duration_seconds: i64,

    pub source_id: String,

    /// UTC offset of the time zone the period was recorded in
    pub utc_offset_seconds: i32,

    /// Primary sleep of its ownership day (as opposed to a nap)
    pub is_major_sleep: bool,

    /// Linked to its session with up-to-date boundaries
    pub is_resolved: bool,

    /// Ownership day of the linked session
    pub session_day: Option<NaiveDate>,

    /// Samples ordered by start time
    pub samples: Vec<StageSample>,
}

impl SleepPeriod {
    /// Build an unresolved period from a non-empty group of samples
    ///
    /// Returns `None` when `samples` is empty.
    pub fn from_samples(mut samples: Vec<StageSample>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let first = &samples[0];
        let source_id = first.source_id.clone();
        let utc_offset_seconds = first.utc_offset_seconds;
        let start = first.start;
        let end = samples.iter().map(|s| s.end).max().unwrap_or(start);

        Some(Self {
            id: crate::identity::StableIdentity::compute(&source_id, start),
            start,
            end,
            duration_seconds: (end - start).num_seconds(),
            source_id,
            utc_offset_seconds,
            is_major_sleep: false,
            is_resolved: false,
            session_day: None,
            samples,
        })
    }

    /// Re-sort samples and recompute start, end, duration and identity
    ///
    /// Returns `true` when the boundaries changed, in which case the period is
    /// marked unresolved. A period without samples keeps its old boundaries.
    pub fn recompute_bounds(&mut self) -> bool {
        self.samples
            .sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let Some(first) = self.samples.first() else {
            return false;
        };
        let start = first.start;
        let offset = first.utc_offset_seconds;
        let end = self.samples.iter().map(|s| s.end).max().unwrap_or(start);

        let changed = start != self.start || end != self.end;
        self.start = start;
        self.end = end;
        self.duration_seconds = (end - start).num_seconds();
        self.utc_offset_seconds = offset;
        self.id = crate::identity::StableIdentity::compute(&self.source_id, start);
        if changed {
            self.is_resolved = false;
        }
        changed
    }

    /// Origin time zone as a fixed offset, UTC when the stored offset is out of range
    pub fn origin_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_seconds).unwrap_or_else(|| Utc.fix())
    }

    /// Seconds spent in any asleep stage
    pub fn asleep_seconds(&self) -> i64 {
        self.samples
            .iter()
            .filter(|s| s.stage.is_asleep())
            .map(StageSample::duration_seconds)
            .sum()
    }

    /// Gap in seconds from the end of `self` to the start of `later`
    ///
    /// Negative when the two overlap.
    pub fn gap_to(&self, later: &SleepPeriod) -> i64 {
        (later.start - self.end).num_seconds()
    }
}

/// Physiological signals averaged over a session and tracked against a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysiologicalMetric {
    HeartRate,
    HeartRateVariability,
    OxygenSaturation,
    RespiratoryRate,
    WristTemperature,
}

impl PhysiologicalMetric {
    pub const ALL: [PhysiologicalMetric; 5] = [
        PhysiologicalMetric::HeartRate,
        PhysiologicalMetric::HeartRateVariability,
        PhysiologicalMetric::OxygenSaturation,
        PhysiologicalMetric::RespiratoryRate,
        PhysiologicalMetric::WristTemperature,
    ];

    pub fn data_type(&self) -> DataType {
        match self {
            PhysiologicalMetric::HeartRate => DataType::HeartRate,
            PhysiologicalMetric::HeartRateVariability => DataType::HeartRateVariability,
            PhysiologicalMetric::OxygenSaturation => DataType::OxygenSaturation,
            PhysiologicalMetric::RespiratoryRate => DataType::RespiratoryRate,
            PhysiologicalMetric::WristTemperature => DataType::WristTemperature,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            PhysiologicalMetric::HeartRate => "bpm",
            PhysiologicalMetric::HeartRateVariability => "ms",
            PhysiologicalMetric::OxygenSaturation => "%",
            PhysiologicalMetric::RespiratoryRate => "br/min",
            PhysiologicalMetric::WristTemperature => "°C",
        }
    }
}

impl fmt::Display for PhysiologicalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysiologicalMetric::HeartRate => write!(f, "Heart Rate"),
            PhysiologicalMetric::HeartRateVariability => write!(f, "HRV"),
            PhysiologicalMetric::OxygenSaturation => write!(f, "SpO2"),
            PhysiologicalMetric::RespiratoryRate => write!(f, "Respiratory Rate"),
            PhysiologicalMetric::WristTemperature => write!(f, "Wrist Temperature"),
        }
    }
}

/// A physiological quantity sample from an auxiliary stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: String,
    pub metric: PhysiologicalMetric,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    pub source_id: String,
}

/// Per-metric averages over a session's primary period
///
/// A value of `0.0` means no valid samples were recorded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysiologicalAverages {
    pub heart_rate: f64,
    pub heart_rate_variability: f64,
    pub oxygen_saturation: f64,
    pub respiratory_rate: f64,
    pub wrist_temperature: f64,
}

impl PhysiologicalAverages {
    pub fn get(&self, metric: PhysiologicalMetric) -> f64 {
        match metric {
            PhysiologicalMetric::HeartRate => self.heart_rate,
            PhysiologicalMetric::HeartRateVariability => self.heart_rate_variability,
            PhysiologicalMetric::OxygenSaturation => self.oxygen_saturation,
            PhysiologicalMetric::RespiratoryRate => self.respiratory_rate,
            PhysiologicalMetric::WristTemperature => self.wrist_temperature,
        }
    }

    pub fn set(&mut self, metric: PhysiologicalMetric, value: f64) {
        match metric {
            PhysiologicalMetric::HeartRate => self.heart_rate = value,
            PhysiologicalMetric::HeartRateVariability => self.heart_rate_variability = value,
            PhysiologicalMetric::OxygenSaturation => self.oxygen_saturation = value,
            PhysiologicalMetric::RespiratoryRate => self.respiratory_rate = value,
            PhysiologicalMetric::WristTemperature => self.wrist_temperature = value,
        }
    }
}

/// How a metric compares to the personal baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricStatus {
    /// Not enough history, or no current value
    Unknown,
    /// Within one standard deviation of baseline
    Optimal,
    /// More than one standard deviation above baseline
    Elevated,
    /// More than one standard deviation below baseline
    Depressed,
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricStatus::Unknown => write!(f, "Unknown"),
            MetricStatus::Optimal => write!(f, "Optimal"),
            MetricStatus::Elevated => write!(f, "Elevated"),
            MetricStatus::Depressed => write!(f, "Depressed"),
        }
    }
}

/// Baseline, spread and z-score for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    pub baseline: f64,
    pub std_dev: f64,
    pub z_score: f64,
}

impl MetricBaseline {
    pub const fn not_computed() -> Self {
        Self {
            baseline: NOT_COMPUTED,
            std_dev: NOT_COMPUTED,
            z_score: NOT_COMPUTED,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline != NOT_COMPUTED
    }

    pub fn has_z_score(&self) -> bool {
        self.z_score != NOT_COMPUTED
    }

    pub fn status(&self) -> MetricStatus {
        if !self.has_baseline() || !self.has_z_score() {
            MetricStatus::Unknown
        } else if self.z_score > 1.0 {
            MetricStatus::Elevated
        } else if self.z_score < -1.0 {
            MetricStatus::Depressed
        } else {
            MetricStatus::Optimal
        }
    }
}

impl Default for MetricBaseline {
    fn default() -> Self {
        Self::not_computed()
    }
}

/// Baselines for all five metrics, computed on demand from history
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RecoveryBaselines {
    pub heart_rate: MetricBaseline,
    pub heart_rate_variability: MetricBaseline,
    pub oxygen_saturation: MetricBaseline,
    pub respiratory_rate: MetricBaseline,
    pub wrist_temperature: MetricBaseline,
}

impl RecoveryBaselines {
    pub fn not_computed() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: PhysiologicalMetric) -> &MetricBaseline {
        match metric {
            PhysiologicalMetric::HeartRate => &self.heart_rate,
            PhysiologicalMetric::HeartRateVariability => &self.heart_rate_variability,
            PhysiologicalMetric::OxygenSaturation => &self.oxygen_saturation,
            PhysiologicalMetric::RespiratoryRate => &self.respiratory_rate,
            PhysiologicalMetric::WristTemperature => &self.wrist_temperature,
        }
    }

    pub fn set(&mut self, metric: PhysiologicalMetric, value: MetricBaseline) {
        match metric {
            PhysiologicalMetric::HeartRate => self.heart_rate = value,
            PhysiologicalMetric::HeartRateVariability => self.heart_rate_variability = value,
            PhysiologicalMetric::OxygenSaturation => self.oxygen_saturation = value,
            PhysiologicalMetric::RespiratoryRate => self.respiratory_rate = value,
            PhysiologicalMetric::WristTemperature => self.wrist_temperature = value,
        }
    }
}

/// One authoritative sleep record per ownership day
///
/// Score and recovery values are only trustworthy once `is_finalized` is set;
/// use [`SleepSession::score`] and [`SleepSession::recovery`] to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
    /// Ownership day, unique key
    pub day: NaiveDate,

    /// Start of the primary period, `None` until one is linked
    pub start: Option<DateTime<Utc>>,

    pub end: Option<DateTime<Utc>>,

    pub time_in_bed_seconds: i64,
    pub total_sleep_seconds: i64,
    pub core_seconds: i64,
    pub deep_seconds: i64,
    pub rem_seconds: i64,
    pub awake_seconds: i64,

    /// Awake spans of at least two minutes in the primary period
    pub wake_up_count: u32,

    pub longest_awake_seconds: i64,

    pub sleep_score: u8,

    pub averages: PhysiologicalAverages,

    pub baselines: RecoveryBaselines,

    pub is_finalized: bool,
}

impl SleepSession {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            start: None,
            end: None,
            time_in_bed_seconds: 0,
            total_sleep_seconds: 0,
            core_seconds: 0,
            deep_seconds: 0,
            rem_seconds: 0,
            awake_seconds: 0,
            wake_up_count: 0,
            longest_awake_seconds: 0,
            sleep_score: 0,
            averages: PhysiologicalAverages::default(),
            baselines: RecoveryBaselines::not_computed(),
            is_finalized: false,
        }
    }

    /// Drop computed results so the session is rescored on the next pass
    pub fn invalidate(&mut self) {
        self.is_finalized = false;
        self.sleep_score = 0;
        self.baselines = RecoveryBaselines::not_computed();
    }

    /// Recompute durations from the primary period's samples
    ///
    /// Stage durations are summed, never estimated. Every duration field is
    /// zeroed when there is no primary period or it has no samples.
    pub fn update_from_primary_sleep_period(&mut self, primary: Option<&SleepPeriod>) {
        self.time_in_bed_seconds = 0;
        self.total_sleep_seconds = 0;
        self.core_seconds = 0;
        self.deep_seconds = 0;
        self.rem_seconds = 0;
        self.awake_seconds = 0;
        self.wake_up_count = 0;
        self.longest_awake_seconds = 0;

        let Some(period) = primary.filter(|p| !p.samples.is_empty()) else {
            self.start = None;
            self.end = None;
            return;
        };

        self.start = Some(period.start);
        self.end = Some(period.end);
        self.time_in_bed_seconds = period.duration_seconds;

        for sample in &period.samples {
            let seconds = sample.duration_seconds();
            match sample.stage {
                SleepStage::Core => self.core_seconds += seconds,
                SleepStage::Deep => self.deep_seconds += seconds,
                SleepStage::Rem => self.rem_seconds += seconds,
                SleepStage::Awake => self.awake_seconds += seconds,
                SleepStage::AsleepUnspecified | SleepStage::InBed => {}
            }
            if sample.stage.is_asleep() {
                self.total_sleep_seconds += seconds;
            }
        }

        let spans = crate::scoring::awake_spans(&period.samples);
        self.wake_up_count = spans
            .iter()
            .filter(|span| **span >= crate::scoring::WAKE_UP_MIN_SECONDS)
            .count() as u32;
        self.longest_awake_seconds = spans.iter().copied().max().unwrap_or(0);
    }

    /// Sleep score, only once the session is finalized
    pub fn score(&self) -> Option<u8> {
        self.is_finalized.then_some(self.sleep_score)
    }

    /// Recovery baselines and z-scores, only once the session is finalized
    pub fn recovery(&self) -> Option<&RecoveryBaselines> {
        self.is_finalized.then_some(&self.baselines)
    }
}

/// Resumable position in one provider stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub data_type: DataType,

    /// Opaque token issued by the provider
    pub token: String,

    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(data_type: DataType, token: impl Into<String>) -> Self {
        Self {
            data_type,
            token: token.into(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn sample(id: &str, stage: SleepStage, start: DateTime<Utc>, end: DateTime<Utc>) -> StageSample {
        StageSample::new(id, stage, start, end, "com.apple.health.abc", "Watch7,1")
    }

    #[test]
    fn test_stage_round_trip_from_str() {
        for stage in SleepStage::ALL {
            assert_eq!(stage.as_str().parse::<SleepStage>().unwrap(), stage);
        }
        assert!("napping".parse::<SleepStage>().is_err());
    }

    #[test]
    fn test_period_from_samples_orders_and_bounds() {
        let period = SleepPeriod::from_samples(vec![
            sample("b", SleepStage::Deep, at(1, 0), at(2, 0)),
            sample("a", SleepStage::Core, at(0, 0), at(1, 0)),
        ])
        .unwrap();

        assert_eq!(period.samples[0].id, "a");
        assert_eq!(period.start, at(0, 0));
        assert_eq!(period.end, at(2, 0));
        assert_eq!(period.duration_seconds, 7200);
        assert!(!period.is_resolved);
        assert!(SleepPeriod::from_samples(Vec::new()).is_none());
    }

    #[test]
    fn test_recompute_bounds_marks_unresolved() {
        let mut period = SleepPeriod::from_samples(vec![
            sample("a", SleepStage::Core, at(0, 0), at(1, 0)),
            sample("b", SleepStage::Deep, at(1, 0), at(2, 0)),
        ])
        .unwrap();
        period.is_resolved = true;
        let old_id = period.id.clone();

        period.samples.remove(0);
        assert!(period.recompute_bounds());
        assert!(!period.is_resolved);
        assert_eq!(period.start, at(1, 0));
        assert_ne!(period.id, old_id);
    }

    #[test]
    fn test_update_from_primary_sums_stages() {
        let period = SleepPeriod::from_samples(vec![
            sample("a", SleepStage::Core, at(0, 0), at(1, 0)),
            sample("b", SleepStage::Awake, at(1, 0), at(1, 10)),
            sample("c", SleepStage::Deep, at(1, 10), at(2, 10)),
            sample("d", SleepStage::Rem, at(2, 10), at(3, 0)),
        ])
        .unwrap();

        let mut session = SleepSession::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        session.update_from_primary_sleep_period(Some(&period));

        assert_eq!(session.time_in_bed_seconds, 3 * 3600);
        assert_eq!(session.core_seconds, 3600);
        assert_eq!(session.deep_seconds, 3600);
        assert_eq!(session.rem_seconds, 50 * 60);
        assert_eq!(session.awake_seconds, 600);
        assert_eq!(session.total_sleep_seconds, 3600 + 3600 + 50 * 60);
        assert_eq!(session.wake_up_count, 1);
        assert_eq!(session.longest_awake_seconds, 600);

        session.update_from_primary_sleep_period(None);
        assert_eq!(session.total_sleep_seconds, 0);
        assert_eq!(session.time_in_bed_seconds, 0);
        assert_eq!(session.awake_seconds, 0);
        assert!(session.start.is_none());
    }

    #[test]
    fn test_unfinalized_session_hides_results() {
        let mut session = SleepSession::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        session.baselines.heart_rate = MetricBaseline {
            baseline: 55.0,
            std_dev: 2.0,
            z_score: 1.5,
        };
        assert!(session.score().is_none());
        assert!(session.recovery().is_none());

        session.is_finalized = true;
        assert!(session.recovery().is_some());

        session.invalidate();
        assert!(session.recovery().is_none());
        assert!(!session.baselines.heart_rate.has_z_score());
    }

    #[test]
    fn test_metric_status() {
        assert_eq!(MetricBaseline::not_computed().status(), MetricStatus::Unknown);
        let mut baseline = MetricBaseline {
            baseline: 50.0,
            std_dev: 5.0,
            z_score: 0.4,
        };
        assert_eq!(baseline.status(), MetricStatus::Optimal);
        baseline.z_score = 1.8;
        assert_eq!(baseline.status(), MetricStatus::Elevated);
        baseline.z_score = -2.0;
        assert_eq!(baseline.status(), MetricStatus::Depressed);
    }

    #[test]
    fn test_date_range_overlap() {
        let range = DateRange::new(at(0, 0), at(6, 0));
        assert!(range.contains(at(0, 0)));
        assert!(!range.contains(at(6, 0)));
        assert!(range.overlaps(at(5, 0), at(7, 0)));
        assert!(!range.overlaps(at(6, 0), at(7, 0)));
    }
}
