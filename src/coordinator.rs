//! End-to-end sync orchestration
//!
//! One run executes, in order: provider authorization, the sleep stream, the
//! five metric streams, session resolution, then scoring and finalization of
//! every unfinalized session with sleep in it. A failed step is recorded and
//! the run moves on; nothing a step does can take the host down.
//!
//! Runs with equal scopes are deduplicated; runs with different scopes are
//! serialized, so period and session records never see two writers.
//!
//! Progress is published on a `watch` channel and run completion on a
//! `broadcast` channel, so any number of views can follow a sync.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex as RunLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::anchored::{AnchoredSyncController, StreamSyncReport, SyncMode};
use crate::baseline::{physiological_averages, RecoveryBaselineEngine};
use crate::config::AppConfig;
use crate::error::{ErrorSeverity, ProviderError, Result, SleepRsError};
use crate::logging::SyncDiagnostics;
use crate::models::{DataType, DateRange, SleepSession};
use crate::provider::SleepDataProvider;
use crate::scoring::SleepScoreCalculator;
use crate::session::{ResolveReport, SessionResolver};
use crate::store::{PeriodQuery, SessionQuery, SleepStore, UnitOfWork};

const EVENT_CAPACITY: usize = 16;

/// What a run covers; equal scopes are the same logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncScope {
    /// Continue every stream from its stored cursor
    Incremental,
    /// Re-read the configured history window
    Full,
    /// Re-read the days `from..=to`
    Range { from: NaiveDate, to: NaiveDate },
}

/// A request to sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub scope: SyncScope,

    /// User-initiated runs bypass the resync interval
    pub user_initiated: bool,
}

impl SyncRequest {
    pub fn incremental() -> Self {
        Self {
            scope: SyncScope::Incremental,
            user_initiated: false,
        }
    }

    pub fn full() -> Self {
        Self {
            scope: SyncScope::Full,
            user_initiated: false,
        }
    }

    pub fn range(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            scope: SyncScope::Range { from, to },
            user_initiated: false,
        }
    }

    pub fn by_user(mut self) -> Self {
        self.user_initiated = true;
        self
    }
}

/// Published sync progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncProgress {
    /// Fraction done in `[0, 1]`, never decreasing within a run
    pub fraction: f64,
    pub status: String,
    pub is_syncing: bool,
}

impl SyncProgress {
    fn idle() -> Self {
        Self {
            fraction: 0.0,
            status: "Idle".to_string(),
            is_syncing: false,
        }
    }
}

/// Notifications sent when a run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Sent after every run, successful or not
    Completed { run_id: Uuid, success: bool },
    /// Sent only after a run where every step succeeded
    RefreshCachedViews,
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub request: SyncRequest,
    pub streams: Vec<StreamSyncReport>,
    pub resolve: Option<ResolveReport>,
    pub finalized_sessions: Vec<NaiveDate>,
    pub cancelled: bool,
    pub diagnostics: SyncDiagnostics,
}

impl RunReport {
    pub fn success(&self) -> bool {
        !self.cancelled && self.diagnostics.success
    }

    /// Final status line, naming failed steps
    pub fn status(&self) -> String {
        if self.cancelled {
            return "Sync cancelled".to_string();
        }
        let failed: Vec<&str> = self
            .diagnostics
            .failed_steps()
            .map(|s| s.step.as_str())
            .collect();
        if failed.is_empty() {
            "Sync complete".to_string()
        } else {
            format!("Sync finished with errors in: {}", failed.join(", "))
        }
    }
}

/// Result of a sync request
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(Box<RunReport>),
    /// An equivalent run is in flight; this request was dropped
    AlreadyRunning,
    /// A background run came too soon after the last successful one
    RateLimited { retry_after_seconds: i64 },
}

#[derive(Debug, Default)]
struct CoordinatorState {
    in_flight: HashMap<SyncScope, Uuid>,
    last_success: Option<DateTime<Utc>>,
    availability: HashMap<NaiveDate, bool>,
}

/// Clears the in-flight entry however the run ends
struct InFlightGuard<'a> {
    state: &'a Mutex<CoordinatorState>,
    scope: SyncScope,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.state).in_flight.remove(&self.scope);
    }
}

fn lock_state(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    // Bookkeeping stays consistent even if a holder panicked
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Orchestrates ingestion, resolution and scoring
pub struct SyncCoordinator {
    store: Arc<dyn SleepStore>,
    provider: Arc<dyn SleepDataProvider>,
    config: AppConfig,
    controller: AnchoredSyncController,
    resolver: SessionResolver,
    scorer: SleepScoreCalculator,
    baselines: RecoveryBaselineEngine,
    state: Mutex<CoordinatorState>,
    /// Held for a whole run; runs with different scopes queue behind it
    run_lock: RunLock<()>,
    progress: watch::Sender<SyncProgress>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn SleepStore>,
        provider: Arc<dyn SleepDataProvider>,
        config: AppConfig,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            controller: AnchoredSyncController::new(store.clone(), provider.clone(), &config),
            resolver: SessionResolver::from_config(&config),
            scorer: SleepScoreCalculator::from_config(&config),
            baselines: RecoveryBaselineEngine::from_config(&config),
            store,
            provider,
            config,
            state: Mutex::new(CoordinatorState::default()),
            run_lock: RunLock::new(()),
            progress,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn progress(&self) -> SyncProgress {
        self.progress.borrow().clone()
    }

    /// Cancel every running and future run of this coordinator
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn last_successful_sync(&self) -> Option<DateTime<Utc>> {
        lock_state(&self.state).last_success
    }

    /// Whether `day` has a session with sleep in it, cached until the next run
    pub fn has_sleep_data(&self, day: NaiveDate) -> Result<bool> {
        if let Some(cached) = lock_state(&self.state).availability.get(&day) {
            return Ok(*cached);
        }

        let available = self
            .store
            .fetch_sessions(&SessionQuery::day(day))?
            .iter()
            .any(|s| s.total_sleep_seconds > 0);
        lock_state(&self.state).availability.insert(day, available);
        Ok(available)
    }

    /// Run a sync unless an equivalent run is active or the request is rate limited
    pub async fn sync(&self, request: SyncRequest) -> SyncOutcome {
        let run_id = Uuid::new_v4();
        {
            let mut state = lock_state(&self.state);
            if let Some(active) = state.in_flight.get(&request.scope) {
                info!(%run_id, active = %active, scope = ?request.scope, "Equivalent sync in flight, dropping request");
                return SyncOutcome::AlreadyRunning;
            }
            if !request.user_initiated {
                if let Some(last) = state.last_success {
                    let elapsed = (Utc::now() - last).num_seconds();
                    let interval = self.config.sync.min_resync_interval_seconds;
                    if elapsed < interval {
                        debug!(elapsed, interval, "Background sync rate limited");
                        return SyncOutcome::RateLimited {
                            retry_after_seconds: interval - elapsed,
                        };
                    }
                }
            }
            state.in_flight.insert(request.scope, run_id);
        }
        let guard = InFlightGuard {
            state: &self.state,
            scope: request.scope,
        };

        let exclusive = match self.run_lock.try_lock() {
            Ok(held) => held,
            Err(_) => {
                debug!(%run_id, scope = ?request.scope, "Waiting for the active sync to finish");
                self.run_lock.lock().await
            }
        };

        info!(%run_id, scope = ?request.scope, user = request.user_initiated, "Sync started");
        let report = self.run(run_id, request).await;
        drop(exclusive);
        drop(guard);

        {
            let mut state = lock_state(&self.state);
            if report.success() {
                state.last_success = Some(Utc::now());
            }
            state.availability.clear();
        }

        let success = report.success();
        self.progress.send_replace(SyncProgress {
            fraction: 1.0,
            status: report.status(),
            is_syncing: false,
        });
        // No subscribers is fine
        let _ = self.events.send(SyncEvent::Completed { run_id, success });
        if success {
            let _ = self.events.send(SyncEvent::RefreshCachedViews);
        }

        info!(
            %run_id,
            success,
            duration = ?report.diagnostics.duration,
            status = %report.status(),
            "Sync finished"
        );
        SyncOutcome::Completed(Box::new(report))
    }

    async fn run(&self, run_id: Uuid, request: SyncRequest) -> RunReport {
        let started = Instant::now();
        let cancel = self.shutdown.child_token();
        let mode = self.mode_for(request.scope);
        let total_steps = (DataType::ALL.len() + 3) as f64;
        let mut completed = 0.0;

        let mut report = RunReport {
            run_id,
            request,
            streams: Vec::new(),
            resolve: None,
            finalized_sessions: Vec::new(),
            cancelled: false,
            diagnostics: SyncDiagnostics::new(run_id.to_string()),
        };

        self.publish(0.0, "Requesting authorization");
        let step_started = Instant::now();
        let authorization = self.request_authorization().await;
        if let Ok(false) = authorization {
            report
                .diagnostics
                .add_warning("Health data access not granted; streams may fail");
        }
        self.record(&mut report, "authorization", step_started, authorization.map(|_| ()));
        completed += 1.0;

        for data_type in DataType::ALL {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.publish(completed / total_steps, &format!("Syncing {}", data_type));
            let step_started = Instant::now();
            let result = match self.controller.sync_stream(data_type, mode, &cancel).await {
                Ok(stream) => {
                    report.cancelled |= stream.cancelled;
                    report.streams.push(stream);
                    Ok(())
                }
                Err(err) => Err(err),
            };
            self.record(&mut report, data_type.as_str(), step_started, result);
            completed += 1.0;
        }

        if !(report.cancelled || cancel.is_cancelled()) {
            self.publish(completed / total_steps, "Resolving sessions");
            let step_started = Instant::now();
            let result = self.resolve_sessions().map(|resolved| {
                report.resolve = Some(resolved);
            });
            self.record(&mut report, "resolve", step_started, result);
            completed += 1.0;
        }

        if !(report.cancelled || cancel.is_cancelled()) {
            self.publish(completed / total_steps, "Scoring sessions");
            let step_started = Instant::now();
            let result = self.score_sessions(&mut report.finalized_sessions);
            self.record(&mut report, "score", step_started, result);
        }

        if report.cancelled || cancel.is_cancelled() {
            report.cancelled = true;
            self.record(&mut report, "cancelled", started, Err(SleepRsError::Cancelled));
        }

        report.diagnostics.finish(started.elapsed());
        report
    }

    fn mode_for(&self, scope: SyncScope) -> SyncMode {
        match scope {
            SyncScope::Incremental => SyncMode::Incremental,
            SyncScope::Full => SyncMode::Full {
                range: DateRange::trailing_days(Utc::now(), self.config.sync.history_days),
            },
            SyncScope::Range { from, to } => SyncMode::Full {
                range: DateRange::new(
                    from.and_time(NaiveTime::MIN).and_utc(),
                    (to + ChronoDuration::days(1)).and_time(NaiveTime::MIN).and_utc(),
                ),
            },
        }
    }

    async fn request_authorization(&self) -> Result<bool> {
        let timeout = Duration::from_secs(self.config.sync.fetch_timeout_seconds);
        match tokio::time::timeout(timeout, self.provider.request_authorization(&DataType::ALL)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProviderError::Timeout {
                data_type: DataType::SleepAnalysis,
                seconds: timeout.as_secs(),
            }
            .into()),
        }
    }

    fn resolve_sessions(&self) -> Result<ResolveReport> {
        let mut uow = UnitOfWork::new(self.store.as_ref());
        let report = self.resolver.resolve(&mut uow)?;
        uow.save()?;
        Ok(report)
    }

    /// Finalize every unfinalized session with sleep, oldest first, one commit each
    ///
    /// A session that fails is left unfinalized for the next run; the others
    /// still go through.
    fn score_sessions(&self, finalized: &mut Vec<NaiveDate>) -> Result<()> {
        let pending: Vec<SleepSession> = self
            .store
            .fetch_sessions(&SessionQuery::unfinalized())?
            .into_iter()
            .filter(|s| s.total_sleep_seconds > 0)
            .collect();

        let mut failures = Vec::new();
        for session in pending {
            let day = session.day;
            match self.finalize_session(session) {
                Ok(()) => finalized.push(day),
                Err(err) => {
                    warn!(%day, error = %err, "Session not finalized");
                    failures.push(format!("{}: {}", day, err));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SleepRsError::Internal(format!(
                "{} session(s) not finalized ({})",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    fn finalize_session(&self, mut session: SleepSession) -> Result<()> {
        let mut uow = UnitOfWork::new(self.store.as_ref());
        let primary = uow
            .fetch_periods(&PeriodQuery::for_session(session.day))?
            .into_iter()
            .find(|p| p.is_major_sleep);
        let Some(primary) = primary else {
            uow.rollback();
            return Err(SleepRsError::Internal(format!(
                "session {} has sleep but no primary period",
                session.day
            )));
        };

        session.averages = physiological_averages(&uow, &primary)?;
        session.baselines = self.baselines.compute(&uow, &session)?;
        session.sleep_score = self.scorer.calculate(&session);
        session.is_finalized = true;

        debug!(day = %session.day, score = session.sleep_score, "Session finalized");
        uow.upsert_session(session);
        uow.save()?;
        Ok(())
    }

    fn publish(&self, fraction: f64, status: &str) {
        self.progress.send_replace(SyncProgress {
            fraction: fraction.clamp(0.0, 1.0),
            status: status.to_string(),
            is_syncing: true,
        });
    }

    fn record(&self, report: &mut RunReport, step: &str, started: Instant, result: Result<()>) {
        let error = match result {
            Ok(()) => None,
            Err(err) => {
                match err.severity() {
                    ErrorSeverity::Critical | ErrorSeverity::Error => {
                        error!(step, error = %err, "Sync step failed")
                    }
                    ErrorSeverity::Warning => warn!(step, error = %err, "Sync step failed"),
                    ErrorSeverity::Info => info!(step, error = %err, "Sync step stopped"),
                }
                Some(err.user_message())
            }
        };
        report.diagnostics.record_step(step, started.elapsed(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSample, PhysiologicalMetric, SleepStage, StageSample};
    use crate::provider::{FixtureProvider, ProviderPage};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast::error::TryRecvError;

    const SOURCE: &str = "com.apple.health.8F2A";

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn stage(id: &str, stage: SleepStage, start: DateTime<Utc>, end: DateTime<Utc>) -> StageSample {
        StageSample::new(id, stage, start, end, SOURCE, "Watch7,1")
    }

    /// Eight hours with two of REM and two of deep
    fn perfect_night(provider: &FixtureProvider) {
        provider.push_stage_samples(vec![
            stage("c1", SleepStage::Core, at(1, 23), at(2, 1)),
            stage("d1", SleepStage::Deep, at(2, 1), at(2, 3)),
            stage("c2", SleepStage::Core, at(2, 3), at(2, 5)),
            stage("r1", SleepStage::Rem, at(2, 5), at(2, 7)),
        ]);
        provider.push_metric_samples(vec![
            MetricSample {
                id: "hr1".to_string(),
                metric: PhysiologicalMetric::HeartRate,
                start: at(2, 2),
                end: at(2, 2),
                value: 50.0,
                source_id: SOURCE.to_string(),
            },
            MetricSample {
                id: "hr2".to_string(),
                metric: PhysiologicalMetric::HeartRate,
                start: at(2, 4),
                end: at(2, 4),
                value: 54.0,
                source_id: SOURCE.to_string(),
            },
        ]);
    }

    /// Tracks how many fetches are in progress at once
    struct CountingProvider {
        inner: FixtureProvider,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SleepDataProvider for CountingProvider {
        async fn request_authorization(&self, types: &[DataType]) -> std::result::Result<bool, ProviderError> {
            self.inner.request_authorization(types).await
        }

        async fn fetch_interval_samples(
            &self,
            data_type: DataType,
            range: Option<DateRange>,
            cursor: Option<&str>,
        ) -> std::result::Result<ProviderPage, ProviderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let page = self.inner.fetch_interval_samples(data_type, range, cursor).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            page
        }
    }

    fn coordinator(store: Arc<MemoryStore>, provider: Arc<FixtureProvider>) -> SyncCoordinator {
        SyncCoordinator::new(store, provider, AppConfig::default())
    }

    fn completed(outcome: SyncOutcome) -> RunReport {
        match outcome {
            SyncOutcome::Completed(report) => *report,
            other => panic!("expected a completed run, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pipeline_finalizes_scored_session() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FixtureProvider::new(100));
        perfect_night(&provider);
        let coordinator = coordinator(store.clone(), provider);
        let mut events = coordinator.subscribe_events();

        let report = completed(coordinator.sync(SyncRequest::incremental().by_user()).await);
        assert!(report.success(), "{:?}", report.diagnostics);
        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(report.finalized_sessions, vec![day]);

        let session = store.fetch_sessions(&SessionQuery::day(day)).unwrap().remove(0);
        assert_eq!(session.score(), Some(100));
        assert_eq!(session.averages.heart_rate, 52.0);
        let recovery = session.recovery().unwrap();
        assert!(!recovery.heart_rate.has_baseline());

        let progress = coordinator.progress();
        assert_eq!(progress.fraction, 1.0);
        assert!(!progress.is_syncing);

        assert_eq!(
            events.try_recv().unwrap(),
            SyncEvent::Completed {
                run_id: report.run_id,
                success: true
            }
        );
        assert_eq!(events.try_recv().unwrap(), SyncEvent::RefreshCachedViews);

        assert!(coordinator.has_sleep_data(day).unwrap());
        assert!(!coordinator.has_sleep_data(day.succ_opt().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_background_run_is_rate_limited() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FixtureProvider::new(100));
        perfect_night(&provider);
        let coordinator = coordinator(store, provider);

        assert!(completed(coordinator.sync(SyncRequest::incremental()).await).success());
        assert!(coordinator.last_successful_sync().is_some());

        assert!(matches!(
            coordinator.sync(SyncRequest::incremental()).await,
            SyncOutcome::RateLimited { .. }
        ));
        assert!(matches!(
            coordinator.sync(SyncRequest::incremental().by_user()).await,
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_equivalent_request_is_dropped_while_running() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FixtureProvider::new(100).with_latency(Duration::from_millis(50)));
        perfect_night(&provider);
        let coordinator = coordinator(store, provider);

        let (first, second) = tokio::join!(
            coordinator.sync(SyncRequest::incremental().by_user()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                coordinator.sync(SyncRequest::incremental().by_user()).await
            }
        );

        assert!(matches!(first, SyncOutcome::Completed(_)));
        assert!(matches!(second, SyncOutcome::AlreadyRunning));

        // The in-flight entry is cleared once the run ends
        assert!(matches!(
            coordinator.sync(SyncRequest::incremental().by_user()).await,
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_runs_with_different_scopes_are_serialized() {
        let store = Arc::new(MemoryStore::new());
        let inner = FixtureProvider::new(100).with_latency(Duration::from_millis(20));
        perfect_night(&inner);
        let provider = Arc::new(CountingProvider {
            inner,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let coordinator = SyncCoordinator::new(store.clone(), provider.clone(), AppConfig::default());
        let range = SyncRequest::range(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
        );

        let (first, second) = tokio::join!(
            coordinator.sync(SyncRequest::incremental().by_user()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                coordinator.sync(range.by_user()).await
            }
        );

        // The second scope queued instead of interleaving its pages
        assert!(completed(first).success());
        assert!(completed(second).success());
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);

        let periods = store.fetch_periods(&PeriodQuery::all()).unwrap();
        assert_eq!(periods.len(), 1);
        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let session = store.fetch_sessions(&SessionQuery::day(day)).unwrap().remove(0);
        assert_eq!(session.score(), Some(100));
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_later_steps() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FixtureProvider::new(100));
        perfect_night(&provider);
        provider.fail_next_fetch(ProviderError::Fetch {
            data_type: DataType::SleepAnalysis,
            reason: "connection reset".to_string(),
        });
        let coordinator = coordinator(store.clone(), provider);
        let mut events = coordinator.subscribe_events();

        let report = completed(coordinator.sync(SyncRequest::incremental().by_user()).await);
        assert!(!report.success());
        let failed: Vec<&str> = report
            .diagnostics
            .failed_steps()
            .map(|s| s.step.as_str())
            .collect();
        assert_eq!(failed, vec!["sleep_analysis"]);
        assert_eq!(report.streams.len(), 5);
        assert!(report.resolve.is_some());
        assert!(report.status().contains("sleep_analysis"));

        assert!(matches!(
            events.try_recv().unwrap(),
            SyncEvent::Completed { success: false, .. }
        ));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert!(coordinator.last_successful_sync().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_cancellation() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FixtureProvider::new(100));
        perfect_night(&provider);
        let coordinator = coordinator(store.clone(), provider);

        coordinator.cancel();
        let report = completed(coordinator.sync(SyncRequest::incremental().by_user()).await);
        assert!(report.cancelled);
        assert!(!report.success());
        assert!(report.streams.is_empty());
        assert!(store.fetch_sessions(&SessionQuery::all()).unwrap().is_empty());
    }
}
