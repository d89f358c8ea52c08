//! Sensor-data provider interface
//!
//! The provider is an external collaborator reached only through
//! [`SleepDataProvider`]. Every call is awaitable and returns an explicit
//! `Result`; pages carry additions, deletions by id and a fresh cursor.

pub mod fixture;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::{DataType, DateRange, MetricSample, StageSample};

pub use fixture::FixtureProvider;

/// One added record from a provider page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderRecord {
    Stage(StageSample),
    Metric(MetricSample),
}

impl ProviderRecord {
    pub fn id(&self) -> &str {
        match self {
            ProviderRecord::Stage(sample) => &sample.id,
            ProviderRecord::Metric(sample) => &sample.id,
        }
    }
}

/// Response to one anchored fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPage {
    pub added: Vec<ProviderRecord>,

    /// Ids of records removed at the source since the cursor
    pub deleted: Vec<String>,

    /// Cursor to resume from, `None` when the provider issued none
    pub next_cursor: Option<String>,
}

impl ProviderPage {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Added stage samples, ignoring records of other kinds
    pub fn stage_samples(&self) -> impl Iterator<Item = &StageSample> {
        self.added.iter().filter_map(|record| match record {
            ProviderRecord::Stage(sample) => Some(sample),
            ProviderRecord::Metric(_) => None,
        })
    }

    /// Added metric samples, ignoring records of other kinds
    pub fn metric_samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.added.iter().filter_map(|record| match record {
            ProviderRecord::Metric(sample) => Some(sample),
            ProviderRecord::Stage(_) => None,
        })
    }
}

/// External source of interval samples
#[async_trait]
pub trait SleepDataProvider: Send + Sync {
    /// Ask for read access to `types`; `Ok(false)` means the user declined
    async fn request_authorization(&self, types: &[DataType]) -> Result<bool, ProviderError>;

    /// Fetch one page of changes for `data_type`
    ///
    /// Without a cursor the provider starts from the beginning of its
    /// history. `range` restricts added records to those overlapping it.
    async fn fetch_interval_samples(
        &self,
        data_type: DataType,
        range: Option<DateRange>,
        cursor: Option<&str>,
    ) -> Result<ProviderPage, ProviderError>;
}
