use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{ChangeSet, MetricQuery, PeriodQuery, SessionQuery, SleepStore, StoreResult};
use crate::error::StoreError;
use crate::models::{
    DataType, MetricSample, PhysiologicalAverages, RecoveryBaselines, SleepPeriod, SleepSession,
    SleepStage, StageSample, SyncCursor,
};

/// Most ids bound in one `IN (...)` list; SQLite caps a statement at 32766 parameters
const MAX_BOUND_IDS: usize = 10_000;

/// SQLite-backed store
///
/// Timestamps are stored as fixed-width RFC 3339 text (nanosecond precision,
/// `Z` suffix) so lexical order matches time order. A commit runs inside one
/// transaction; any error drops the transaction and SQLite rolls it back.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::PersistenceFailure {
                    reason: format!("cannot create {}: {}", parent.display(), e),
                })?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::PersistenceFailure {
            reason: "sqlite connection lock poisoned".to_string(),
        })
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        // WAL is unavailable for in-memory databases; the pragma then reports "memory"
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS sleep_periods (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                utc_offset_seconds INTEGER NOT NULL,
                is_major_sleep INTEGER NOT NULL,
                is_resolved INTEGER NOT NULL,
                session_day TEXT
            );

            CREATE TABLE IF NOT EXISTS stage_samples (
                id TEXT PRIMARY KEY,
                period_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                source_id TEXT NOT NULL,
                product_type TEXT NOT NULL,
                utc_offset_seconds INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sleep_sessions (
                day TEXT PRIMARY KEY,
                start_time TEXT,
                end_time TEXT,
                time_in_bed_seconds INTEGER NOT NULL,
                total_sleep_seconds INTEGER NOT NULL,
                core_seconds INTEGER NOT NULL,
                deep_seconds INTEGER NOT NULL,
                rem_seconds INTEGER NOT NULL,
                awake_seconds INTEGER NOT NULL,
                wake_up_count INTEGER NOT NULL,
                longest_awake_seconds INTEGER NOT NULL,
                sleep_score INTEGER NOT NULL,
                averages TEXT NOT NULL,
                baselines TEXT NOT NULL,
                is_finalized INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metric_samples (
                id TEXT PRIMARY KEY,
                metric TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                value REAL NOT NULL,
                source_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_cursors (
                data_type TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_periods_source_start ON sleep_periods (source_id, start_time);
            CREATE INDEX IF NOT EXISTS idx_periods_resolved ON sleep_periods (is_resolved);
            CREATE INDEX IF NOT EXISTS idx_periods_session ON sleep_periods (session_day);
            CREATE INDEX IF NOT EXISTS idx_samples_period ON stage_samples (period_id);
            CREATE INDEX IF NOT EXISTS idx_metrics_metric_start ON metric_samples (metric, start_time);
            "#,
        )?;

        Ok(())
    }

    fn load_samples(conn: &Connection, period_id: &str) -> StoreResult<Vec<StageSample>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, stage, start_time, end_time, source_id, product_type, utc_offset_seconds
             FROM stage_samples WHERE period_id = ?1 ORDER BY start_time, id",
        )?;
        let samples = stmt
            .query_map(params![period_id], |row| {
                Ok(StageSample {
                    id: row.get(0)?,
                    stage: parse_column(1, row.get::<_, String>(1)?, |s| s.parse::<SleepStage>())?,
                    start: parse_timestamp(2, row.get(2)?)?,
                    end: parse_timestamp(3, row.get(3)?)?,
                    source_id: row.get(4)?,
                    product_type: row.get(5)?,
                    utc_offset_seconds: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn write_period(tx: &Transaction<'_>, period: &SleepPeriod) -> StoreResult<()> {
        tx.execute(
            r#"
            INSERT INTO sleep_periods (
                id, source_id, start_time, end_time, duration_seconds,
                utc_offset_seconds, is_major_sleep, is_resolved, session_day
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                duration_seconds = excluded.duration_seconds,
                utc_offset_seconds = excluded.utc_offset_seconds,
                is_major_sleep = excluded.is_major_sleep,
                is_resolved = excluded.is_resolved,
                session_day = excluded.session_day
            "#,
            params![
                period.id,
                period.source_id,
                format_timestamp(period.start),
                format_timestamp(period.end),
                period.duration_seconds,
                period.utc_offset_seconds,
                period.is_major_sleep,
                period.is_resolved,
                period.session_day.map(|d| d.to_string()),
            ],
        )?;

        tx.execute(
            "DELETE FROM stage_samples WHERE period_id = ?1",
            params![period.id],
        )?;
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT OR REPLACE INTO stage_samples (
                id, period_id, stage, start_time, end_time, source_id, product_type, utc_offset_seconds
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )?;
        for sample in &period.samples {
            stmt.execute(params![
                sample.id,
                period.id,
                sample.stage.as_str(),
                format_timestamp(sample.start),
                format_timestamp(sample.end),
                sample.source_id,
                sample.product_type,
                sample.utc_offset_seconds,
            ])?;
        }
        Ok(())
    }

    fn write_session(tx: &Transaction<'_>, session: &SleepSession) -> StoreResult<()> {
        let averages = serde_json::to_string(&session.averages)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let baselines = serde_json::to_string(&session.baselines)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO sleep_sessions (
                day, start_time, end_time, time_in_bed_seconds, total_sleep_seconds,
                core_seconds, deep_seconds, rem_seconds, awake_seconds, wake_up_count,
                longest_awake_seconds, sleep_score, averages, baselines, is_finalized
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                session.day.to_string(),
                session.start.map(format_timestamp),
                session.end.map(format_timestamp),
                session.time_in_bed_seconds,
                session.total_sleep_seconds,
                session.core_seconds,
                session.deep_seconds,
                session.rem_seconds,
                session.awake_seconds,
                session.wake_up_count,
                session.longest_awake_seconds,
                session.sleep_score,
                averages,
                baselines,
                session.is_finalized,
            ],
        )?;
        Ok(())
    }
}

impl SleepStore for SqliteStore {
    fn fetch_periods(&self, query: &PeriodQuery) -> StoreResult<Vec<SleepPeriod>> {
        if let Some(parts) = split_period_query(query) {
            debug!(chunks = parts.len(), "Fetching periods in id chunks");
            let mut by_id = BTreeMap::new();
            for part in &parts {
                for period in self.fetch_periods(part)? {
                    by_id.insert(period.id.clone(), period);
                }
            }
            let mut periods: Vec<SleepPeriod> = by_id.into_values().collect();
            periods.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
            return Ok(periods);
        }

        let conn = self.lock()?;

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(ids) = &query.ids {
            clauses.push(format!("id IN ({})", placeholders(values.len(), ids.len())));
            values.extend(ids.iter().cloned());
        }
        if let Some(source_id) = &query.source_id {
            values.push(source_id.clone());
            clauses.push(format!("source_id = ?{}", values.len()));
        }
        if let Some(resolved) = query.is_resolved {
            clauses.push(format!("is_resolved = {}", i32::from(resolved)));
        }
        if let Some(day) = query.session_day {
            values.push(day.to_string());
            clauses.push(format!("session_day = ?{}", values.len()));
        }
        if let Some(sample_ids) = &query.containing_samples {
            clauses.push(format!(
                "id IN (SELECT period_id FROM stage_samples WHERE id IN ({}))",
                placeholders(values.len(), sample_ids.len())
            ));
            values.extend(sample_ids.iter().cloned());
        }

        let mut sql = String::from(
            "SELECT id, source_id, start_time, end_time, duration_seconds, utc_offset_seconds,
                    is_major_sleep, is_resolved, session_day
             FROM sleep_periods",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY start_time, id");

        let mut stmt = conn.prepare(&sql)?;
        let mut periods = stmt
            .query_map(params_from_iter(values.iter()), period_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for period in &mut periods {
            period.samples = Self::load_samples(&conn, &period.id)?;
        }
        Ok(periods)
    }

    fn fetch_sessions(&self, query: &SessionQuery) -> StoreResult<Vec<SleepSession>> {
        let conn = self.lock()?;

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(from) = query.from_day {
            values.push(from.to_string());
            clauses.push(format!("day >= ?{}", values.len()));
        }
        if let Some(to) = query.to_day {
            values.push(to.to_string());
            clauses.push(format!("day <= ?{}", values.len()));
        }
        if let Some(finalized) = query.is_finalized {
            clauses.push(format!("is_finalized = {}", i32::from(finalized)));
        }

        let mut sql = String::from(
            "SELECT day, start_time, end_time, time_in_bed_seconds, total_sleep_seconds,
                    core_seconds, deep_seconds, rem_seconds, awake_seconds, wake_up_count,
                    longest_awake_seconds, sleep_score, averages, baselines, is_finalized
             FROM sleep_sessions",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(if query.descending {
            " ORDER BY day DESC"
        } else {
            " ORDER BY day ASC"
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params_from_iter(values.iter()), session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn fetch_metric_samples(&self, query: &MetricQuery) -> StoreResult<Vec<MetricSample>> {
        if let Some(ids) = query.ids.as_ref().filter(|ids| ids.len() > MAX_BOUND_IDS) {
            let mut samples = Vec::with_capacity(ids.len());
            for chunk in chunk_ids(ids) {
                samples.extend(self.fetch_metric_samples(&MetricQuery {
                    ids: Some(chunk),
                    ..query.clone()
                })?);
            }
            samples.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
            return Ok(samples);
        }

        let conn = self.lock()?;

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(ids) = &query.ids {
            clauses.push(format!("id IN ({})", placeholders(values.len(), ids.len())));
            values.extend(ids.iter().cloned());
        }
        if let Some(metric) = query.metric {
            values.push(metric.data_type().as_str().to_string());
            clauses.push(format!("metric = ?{}", values.len()));
        }
        if let Some((start, end)) = query.overlapping {
            values.push(format_timestamp(end));
            clauses.push(format!("start_time <= ?{}", values.len()));
            values.push(format_timestamp(start));
            clauses.push(format!("end_time >= ?{}", values.len()));
        }

        let mut sql = String::from(
            "SELECT id, metric, start_time, end_time, value, source_id FROM metric_samples",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY start_time, id");

        let mut stmt = conn.prepare(&sql)?;
        let samples = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let metric = parse_column(1, row.get::<_, String>(1)?, |s| {
                    s.parse::<DataType>()?
                        .metric()
                        .ok_or_else(|| format!("{} is not a metric stream", s))
                })?;
                Ok(MetricSample {
                    id: row.get(0)?,
                    metric,
                    start: parse_timestamp(2, row.get(2)?)?,
                    end: parse_timestamp(3, row.get(3)?)?,
                    value: row.get(4)?,
                    source_id: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn load_cursor(&self, data_type: DataType) -> StoreResult<Option<SyncCursor>> {
        let conn = self.lock()?;
        let cursor = conn
            .query_row(
                "SELECT token, updated_at FROM sync_cursors WHERE data_type = ?1",
                params![data_type.as_str()],
                |row| {
                    Ok(SyncCursor {
                        data_type,
                        token: row.get(0)?,
                        updated_at: parse_timestamp(1, row.get(1)?)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    fn commit(&self, changes: ChangeSet) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for id in &changes.deleted_periods {
            tx.execute("DELETE FROM stage_samples WHERE period_id = ?1", params![id])?;
            tx.execute("DELETE FROM sleep_periods WHERE id = ?1", params![id])?;
        }
        for period in changes.upserted_periods.values() {
            Self::write_period(&tx, period)?;
        }

        for day in &changes.deleted_sessions {
            tx.execute(
                "DELETE FROM sleep_sessions WHERE day = ?1",
                params![day.to_string()],
            )?;
        }
        for session in changes.upserted_sessions.values() {
            Self::write_session(&tx, session)?;
        }

        for id in &changes.deleted_metrics {
            tx.execute("DELETE FROM metric_samples WHERE id = ?1", params![id])?;
        }
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO metric_samples (id, metric, start_time, end_time, value, source_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for sample in changes.upserted_metrics.values() {
                stmt.execute(params![
                    sample.id,
                    sample.metric.data_type().as_str(),
                    format_timestamp(sample.start),
                    format_timestamp(sample.end),
                    sample.value,
                    sample.source_id,
                ])?;
            }
        }

        for cursor in changes.cursors.values() {
            tx.execute(
                "INSERT OR REPLACE INTO sync_cursors (data_type, token, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    cursor.data_type.as_str(),
                    cursor.token,
                    format_timestamp(cursor.updated_at)
                ],
            )?;
        }

        tx.commit()?;
        debug!(records = changes.len(), "SQLite commit complete");
        Ok(())
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn chunk_ids(ids: &BTreeSet<String>) -> Vec<BTreeSet<String>> {
    let ids: Vec<&String> = ids.iter().collect();
    ids.chunks(MAX_BOUND_IDS)
        .map(|chunk| chunk.iter().map(|id| (*id).clone()).collect())
        .collect()
}

/// Sub-queries each binding at most `MAX_BOUND_IDS` ids, or `None` when the
/// query already fits in one statement
fn split_period_query(query: &PeriodQuery) -> Option<Vec<PeriodQuery>> {
    if let Some(ids) = query.ids.as_ref().filter(|ids| ids.len() > MAX_BOUND_IDS) {
        return Some(
            chunk_ids(ids)
                .into_iter()
                .map(|chunk| PeriodQuery {
                    ids: Some(chunk),
                    ..query.clone()
                })
                .collect(),
        );
    }
    if let Some(ids) = query
        .containing_samples
        .as_ref()
        .filter(|ids| ids.len() > MAX_BOUND_IDS)
    {
        return Some(
            chunk_ids(ids)
                .into_iter()
                .map(|chunk| PeriodQuery {
                    containing_samples: Some(chunk),
                    ..query.clone()
                })
                .collect(),
        );
    }
    None
}

/// Numbered placeholders `?n+1, ?n+2, ...` for `count` values after `offset` bound ones
fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_column<T, E, F>(idx: usize, raw: String, parse: F) -> rusqlite::Result<T>
where
    F: FnOnce(&str) -> Result<T, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    parse(&raw).map_err(|e| conversion_error(idx, e))
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    parse_column(idx, raw, |s| {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    })
}

fn parse_day(idx: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    parse_column(idx, raw, |s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
}

fn period_from_row(row: &Row<'_>) -> rusqlite::Result<SleepPeriod> {
    let session_day: Option<String> = row.get(8)?;
    Ok(SleepPeriod {
        id: row.get(0)?,
        source_id: row.get(1)?,
        start: parse_timestamp(2, row.get(2)?)?,
        end: parse_timestamp(3, row.get(3)?)?,
        duration_seconds: row.get(4)?,
        utc_offset_seconds: row.get(5)?,
        is_major_sleep: row.get(6)?,
        is_resolved: row.get(7)?,
        session_day: session_day.map(|d| parse_day(8, d)).transpose()?,
        samples: Vec::new(),
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SleepSession> {
    let start: Option<String> = row.get(1)?;
    let end: Option<String> = row.get(2)?;
    let averages = parse_column(12, row.get::<_, String>(12)?, |s| {
        serde_json::from_str::<PhysiologicalAverages>(s)
    })?;
    let baselines = parse_column(13, row.get::<_, String>(13)?, |s| {
        serde_json::from_str::<RecoveryBaselines>(s)
    })?;

    Ok(SleepSession {
        day: parse_day(0, row.get(0)?)?,
        start: start.map(|s| parse_timestamp(1, s)).transpose()?,
        end: end.map(|s| parse_timestamp(2, s)).transpose()?,
        time_in_bed_seconds: row.get(3)?,
        total_sleep_seconds: row.get(4)?,
        core_seconds: row.get(5)?,
        deep_seconds: row.get(6)?,
        rem_seconds: row.get(7)?,
        awake_seconds: row.get(8)?,
        wake_up_count: row.get(9)?,
        longest_awake_seconds: row.get(10)?,
        sleep_score: row.get(11)?,
        averages,
        baselines,
        is_finalized: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricBaseline, PhysiologicalMetric};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample(id: &str, stage: SleepStage, start_h: u32, end_h: u32) -> StageSample {
        StageSample::new(
            id,
            stage,
            Utc.with_ymd_and_hms(2024, 3, 1, start_h, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, end_h, 0, 0).unwrap(),
            "com.apple.health.abc",
            "Watch7,1",
        )
        .with_utc_offset(3600)
    }

    #[test]
    fn test_period_round_trip_with_samples() {
        let store = SqliteStore::in_memory().unwrap();
        let mut period = SleepPeriod::from_samples(vec![
            sample("a", SleepStage::Core, 0, 1),
            sample("b", SleepStage::Deep, 1, 2),
        ])
        .unwrap();
        period.session_day = NaiveDate::from_ymd_opt(2024, 3, 1);

        let mut changes = ChangeSet::default();
        changes.upserted_periods.insert(period.id.clone(), period.clone());
        store.commit(changes).unwrap();

        let loaded = store.fetch_periods(&PeriodQuery::all()).unwrap();
        assert_eq!(loaded, vec![period.clone()]);

        let by_sample = store
            .fetch_periods(&PeriodQuery::containing_samples(["b"]))
            .unwrap();
        assert_eq!(by_sample.len(), 1);
        assert!(store
            .fetch_periods(&PeriodQuery::containing_samples(["zzz"]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_large_sample_id_lists_are_chunked() {
        let store = SqliteStore::in_memory().unwrap();
        let period = SleepPeriod::from_samples(vec![sample("real", SleepStage::Core, 0, 1)]).unwrap();
        let mut changes = ChangeSet::default();
        changes.upserted_periods.insert(period.id.clone(), period.clone());
        store.commit(changes).unwrap();

        // More ids than SQLite accepts as parameters of one statement
        let ids: Vec<String> = (0..40_000)
            .map(|i| format!("missing-{}", i))
            .chain(["real".to_string()])
            .collect();
        let found = store
            .fetch_periods(&PeriodQuery::containing_samples(ids.iter().cloned()))
            .unwrap();
        assert_eq!(found, vec![period.clone()]);

        let by_id = store
            .fetch_periods(&PeriodQuery {
                ids: Some(ids.into_iter().chain([period.id.clone()]).collect()),
                ..PeriodQuery::default()
            })
            .unwrap();
        assert_eq!(by_id.len(), 1);
    }

    #[test]
    fn test_session_and_cursor_round_trip() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("sleep.db")).unwrap();

        let mut session = SleepSession::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        session.sleep_score = 87;
        session.is_finalized = true;
        session.averages.heart_rate = 52.5;
        session.baselines.heart_rate = MetricBaseline {
            baseline: 54.0,
            std_dev: 2.0,
            z_score: -0.75,
        };

        let mut changes = ChangeSet::default();
        changes.upserted_sessions.insert(session.day, session.clone());
        changes.cursors.insert(
            DataType::SleepAnalysis,
            SyncCursor::new(DataType::SleepAnalysis, "anchor-42"),
        );
        store.commit(changes).unwrap();

        let sessions = store.fetch_sessions(&SessionQuery::all()).unwrap();
        assert_eq!(sessions, vec![session]);
        assert_eq!(
            store.load_cursor(DataType::SleepAnalysis).unwrap().unwrap().token,
            "anchor-42"
        );
        assert!(store.load_cursor(DataType::HeartRate).unwrap().is_none());
    }

    #[test]
    fn test_metric_overlap_query() {
        let store = SqliteStore::in_memory().unwrap();
        let at = |h| Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap();

        let mut changes = ChangeSet::default();
        for (id, h) in [("m1", 1), ("m2", 5), ("m3", 9)] {
            changes.upserted_metrics.insert(
                id.to_string(),
                MetricSample {
                    id: id.to_string(),
                    metric: PhysiologicalMetric::HeartRate,
                    start: at(h),
                    end: at(h),
                    value: 50.0,
                    source_id: "watch".to_string(),
                },
            );
        }
        store.commit(changes).unwrap();

        let found = store
            .fetch_metric_samples(&MetricQuery::overlapping(
                PhysiologicalMetric::HeartRate,
                at(0),
                at(6),
            ))
            .unwrap();
        assert_eq!(found.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
        assert!(store
            .fetch_metric_samples(&MetricQuery::overlapping(
                PhysiologicalMetric::HeartRateVariability,
                at(0),
                at(23),
            ))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rekey_moves_samples() {
        let store = SqliteStore::in_memory().unwrap();
        let period = SleepPeriod::from_samples(vec![
            sample("a", SleepStage::Core, 0, 1),
            sample("b", SleepStage::Deep, 1, 2),
        ])
        .unwrap();
        let mut changes = ChangeSet::default();
        changes.upserted_periods.insert(period.id.clone(), period.clone());
        store.commit(changes).unwrap();

        let mut moved = period.clone();
        moved.samples.remove(0);
        moved.recompute_bounds();

        let mut changes = ChangeSet::default();
        changes.deleted_periods.insert(period.id.clone());
        changes.upserted_periods.insert(moved.id.clone(), moved.clone());
        store.commit(changes).unwrap();

        let loaded = store.fetch_periods(&PeriodQuery::all()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, moved.id);
        assert_eq!(loaded[0].samples.len(), 1);
    }
}
