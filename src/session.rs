//! Assignment of periods to daily sessions
//!
//! Each period belongs to exactly one ownership day. With the default
//! boundary of 18:00 a day runs from 18:00 the evening before to 18:00 on the
//! day itself, measured in the time zone the period was recorded in, so a
//! night that starts at 23:00 on the 1st belongs to the 2nd.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::models::{SleepPeriod, SleepSession};
use crate::store::{PeriodQuery, SessionQuery, StoreResult, UnitOfWork};

/// What one resolver pass changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    pub resolved_periods: usize,
    pub refreshed_sessions: BTreeSet<NaiveDate>,
    pub deleted_sessions: BTreeSet<NaiveDate>,
}

/// Links unresolved periods to sessions and keeps sessions up to date
#[derive(Debug, Clone, Copy)]
pub struct SessionResolver {
    day_boundary_hour: u32,
}

impl SessionResolver {
    pub fn new(day_boundary_hour: u32) -> Self {
        Self {
            day_boundary_hour: day_boundary_hour.min(23),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.sleep.day_boundary_hour)
    }

    /// Ownership day of a period, from its midpoint in the origin time zone
    pub fn ownership_day(&self, period: &SleepPeriod) -> NaiveDate {
        let midpoint = period.start + (period.end - period.start) / 2;
        let local = midpoint.with_timezone(&period.origin_offset()).naive_local();
        (local + Duration::hours(24 - i64::from(self.day_boundary_hour))).date()
    }

    /// Resolve every unresolved period, then refresh every unfinalized session
    ///
    /// A period that moves to another day is unlinked from the old session,
    /// which is unfinalized and deleted once it has no periods left.
    pub fn resolve(&self, uow: &mut UnitOfWork<'_>) -> StoreResult<ResolveReport> {
        let mut report = ResolveReport::default();
        let mut abandoned = BTreeSet::new();
        let mut touched = BTreeSet::new();

        for mut period in uow.fetch_periods(&PeriodQuery::unresolved())? {
            let day = self.ownership_day(&period);
            if let Some(previous) = period.session_day.filter(|d| *d != day) {
                debug!(period = %period.id, from = %previous, to = %day, "Period changed ownership day");
                abandoned.insert(previous);
            }
            period.session_day = Some(day);
            period.is_resolved = true;
            uow.upsert_period(period);
            touched.insert(day);
            report.resolved_periods += 1;
        }

        for day in abandoned {
            uow.invalidate_session(day)?;
        }
        for day in &touched {
            let mut session = uow
                .fetch_session(*day)?
                .unwrap_or_else(|| SleepSession::new(*day));
            session.invalidate();
            uow.upsert_session(session);
        }

        for session in uow.fetch_sessions(&SessionQuery::unfinalized())? {
            let day = session.day;
            if self.refresh_session(uow, session)? {
                report.deleted_sessions.insert(day);
            } else {
                report.refreshed_sessions.insert(day);
            }
        }

        if report.resolved_periods > 0 || !report.deleted_sessions.is_empty() {
            info!(
                periods = report.resolved_periods,
                sessions = report.refreshed_sessions.len(),
                deleted = report.deleted_sessions.len(),
                "Resolved sleep sessions"
            );
        }
        Ok(report)
    }

    /// Reclassify a session's periods and recompute its durations
    ///
    /// Returns `true` when the session had no periods and was deleted.
    fn refresh_session(&self, uow: &mut UnitOfWork<'_>, mut session: SleepSession) -> StoreResult<bool> {
        let mut periods = uow.fetch_periods(&PeriodQuery::for_session(session.day))?;
        if periods.is_empty() {
            debug!(day = %session.day, "Deleting session without periods");
            uow.delete_session(session.day);
            return Ok(true);
        }

        let primary = classify_major_sleep(&mut periods);
        for period in &periods {
            uow.upsert_period(period.clone());
        }

        session.update_from_primary_sleep_period(primary.map(|i| &periods[i]));
        session.invalidate();
        uow.upsert_session(session);
        Ok(false)
    }
}

impl Default for SessionResolver {
    fn default() -> Self {
        Self::new(18)
    }
}

/// Mark the major sleep among one day's periods, returning its index
///
/// Periods with asleep time qualify; the longest qualifying period wins and
/// ties go to the earliest start. Without a qualifying period the longest
/// overall wins. Every other period is a nap.
pub fn classify_major_sleep(periods: &mut [SleepPeriod]) -> Option<usize> {
    let pick = |qualifies: &dyn Fn(&SleepPeriod) -> bool| {
        periods
            .iter()
            .enumerate()
            .filter(|(_, p)| qualifies(p))
            .min_by(|(_, a), (_, b)| {
                b.duration_seconds
                    .cmp(&a.duration_seconds)
                    .then_with(|| a.start.cmp(&b.start))
            })
            .map(|(i, _)| i)
    };

    let primary = pick(&|p| p.asleep_seconds() > 0).or_else(|| pick(&|_| true));
    for (i, period) in periods.iter_mut().enumerate() {
        period.is_major_sleep = Some(i) == primary;
    }
    primary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SleepStage, StageSample};
    use crate::store::{MemoryStore, SleepStore};
    use chrono::{DateTime, TimeZone, Utc};

    const SOURCE: &str = "com.apple.health.abc";

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, h, m, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn period(id: &str, stage: SleepStage, start: DateTime<Utc>, end: DateTime<Utc>) -> SleepPeriod {
        SleepPeriod::from_samples(vec![StageSample::new(id, stage, start, end, SOURCE, "Watch7,1")]).unwrap()
    }

    fn seed(store: &MemoryStore, periods: Vec<SleepPeriod>) {
        let mut uow = UnitOfWork::new(store);
        for p in periods {
            uow.upsert_period(p);
        }
        uow.save().unwrap();
    }

    #[test]
    fn test_ownership_day_boundary() {
        let resolver = SessionResolver::default();
        let night = period("n", SleepStage::Core, at(1, 23, 0), at(2, 7, 0));
        assert_eq!(resolver.ownership_day(&night), date(2));

        let evening = period("e", SleepStage::Core, at(1, 18, 30), at(1, 19, 30));
        assert_eq!(resolver.ownership_day(&evening), date(2));

        let afternoon = period("a", SleepStage::Core, at(1, 14, 0), at(1, 15, 0));
        assert_eq!(resolver.ownership_day(&afternoon), date(1));
    }

    #[test]
    fn test_ownership_day_uses_origin_offset() {
        let resolver = SessionResolver::default();
        // 16:30-17:30 UTC is 18:30-19:30 at UTC+2
        let sample = StageSample::new("s", SleepStage::Core, at(1, 16, 30), at(1, 17, 30), SOURCE, "Watch7,1")
            .with_utc_offset(2 * 3600);
        let period = SleepPeriod::from_samples(vec![sample]).unwrap();
        assert_eq!(resolver.ownership_day(&period), date(2));
    }

    #[test]
    fn test_one_session_per_day_with_major_and_nap() {
        let store = MemoryStore::new();
        seed(
            &store,
            vec![
                period("night", SleepStage::Core, at(1, 23, 0), at(2, 6, 0)),
                period("nap", SleepStage::Core, at(2, 13, 0), at(2, 13, 40)),
            ],
        );

        let mut uow = UnitOfWork::new(&store);
        let report = SessionResolver::default().resolve(&mut uow).unwrap();
        uow.save().unwrap();

        assert_eq!(report.resolved_periods, 2);
        let sessions = store.fetch_sessions(&SessionQuery::all()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].day, date(2));
        assert_eq!(sessions[0].total_sleep_seconds, 7 * 3600);
        assert!(!sessions[0].is_finalized);

        let periods = store.fetch_periods(&PeriodQuery::for_session(date(2))).unwrap();
        assert_eq!(periods.len(), 2);
        assert!(periods.iter().all(|p| p.is_resolved));
        assert_eq!(periods.iter().filter(|p| p.is_major_sleep).count(), 1);
        assert!(periods.iter().find(|p| p.is_major_sleep).unwrap().start == at(1, 23, 0));

        // A second pass finds nothing new and keeps one session
        let mut uow = UnitOfWork::new(&store);
        let report = SessionResolver::default().resolve(&mut uow).unwrap();
        uow.save().unwrap();
        assert_eq!(report.resolved_periods, 0);
        assert_eq!(store.fetch_sessions(&SessionQuery::all()).unwrap().len(), 1);
    }

    #[test]
    fn test_moved_period_leaves_empty_session_deleted() {
        let store = MemoryStore::new();
        let mut moved = period("p", SleepStage::Core, at(1, 23, 0), at(2, 6, 0));
        moved.session_day = Some(date(1));
        seed(&store, vec![moved]);

        let mut old = SleepSession::new(date(1));
        old.is_finalized = true;
        let mut uow = UnitOfWork::new(&store);
        uow.upsert_session(old);
        uow.save().unwrap();

        let mut uow = UnitOfWork::new(&store);
        let report = SessionResolver::default().resolve(&mut uow).unwrap();
        uow.save().unwrap();

        assert!(report.deleted_sessions.contains(&date(1)));
        let days: Vec<NaiveDate> = store
            .fetch_sessions(&SessionQuery::all())
            .unwrap()
            .iter()
            .map(|s| s.day)
            .collect();
        assert_eq!(days, vec![date(2)]);
    }

    #[test]
    fn test_major_sleep_prefers_asleep_time() {
        let mut periods = vec![
            period("awake", SleepStage::Awake, at(1, 20, 0), at(2, 8, 0)),
            period("short", SleepStage::Core, at(2, 1, 0), at(2, 2, 0)),
            period("tie", SleepStage::Deep, at(2, 3, 0), at(2, 4, 0)),
        ];
        assert_eq!(classify_major_sleep(&mut periods), Some(1));
        assert!(periods[1].is_major_sleep);
        assert!(!periods[0].is_major_sleep);

        let mut only_awake = vec![
            period("a", SleepStage::Awake, at(1, 20, 0), at(1, 21, 0)),
            period("b", SleepStage::Awake, at(1, 22, 0), at(2, 0, 0)),
        ];
        assert_eq!(classify_major_sleep(&mut only_awake), Some(1));
        assert_eq!(classify_major_sleep(&mut []), None);
    }
}
