// Library interface for sleeprs modules
// The CLI and the integration tests both drive the pipeline through here

pub mod anchored;
pub mod baseline;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod grouping;
pub mod identity;
pub mod logging;
pub mod merge;
pub mod models;
pub mod provider;
pub mod scoring;
pub mod session;
pub mod store;

// Re-export commonly used types for convenience
pub use models::*;
pub use anchored::{AnchoredSyncController, StreamSyncReport, SyncMode};
pub use baseline::RecoveryBaselineEngine;
pub use config::AppConfig;
pub use coordinator::{
    RunReport, SyncCoordinator, SyncEvent, SyncOutcome, SyncProgress, SyncRequest, SyncScope,
};
pub use grouping::{PeriodGrouper, SampleFilter};
pub use identity::StableIdentity;
pub use merge::PeriodMerger;
pub use provider::{FixtureProvider, ProviderPage, ProviderRecord, SleepDataProvider};
pub use scoring::SleepScoreCalculator;
pub use session::SessionResolver;
pub use store::{MemoryStore, SleepStore, SqliteStore, UnitOfWork};
pub use error::{ProviderError, Result, SleepRsError, StoreError};
pub use logging::{LogConfig, LogFormat, LogLevel, SyncDiagnostics};
