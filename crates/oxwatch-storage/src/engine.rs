use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use oxwatch_alert::store::{StoreError, StoreResult};
use oxwatch_common::types::{
    AlertEvent, AlertRule, AlertStatus, Comparator, MetricSample, NewAlertRule, Severity, Target,
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DB_FILE: &str = "oxwatch.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS targets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_seen_at INTEGER
);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    metric TEXT NOT NULL,
    comparator TEXT NOT NULL,
    threshold REAL NOT NULL,
    duration_secs INTEGER NOT NULL,
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    target_pattern TEXT NOT NULL DEFAULT '*',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_enabled ON alert_rules(enabled);

CREATE TABLE IF NOT EXISTS metric_samples (
    id TEXT PRIMARY KEY,
    target_id TEXT NOT NULL REFERENCES targets(id),
    collected_at INTEGER NOT NULL,
    metric_values TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_samples_target_time
    ON metric_samples(target_id, collected_at);
CREATE INDEX IF NOT EXISTS idx_samples_time ON metric_samples(collected_at);

CREATE TABLE IF NOT EXISTS alert_events (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL REFERENCES alert_rules(id),
    rule_name TEXT NOT NULL,
    target_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'firing',
    started_at INTEGER NOT NULL,
    acknowledged_at INTEGER,
    resolved_at INTEGER,
    triggered_value REAL NOT NULL,
    threshold REAL NOT NULL,
    summary TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_open_pair
    ON alert_events(rule_id, target_id) WHERE status != 'resolved';
CREATE INDEX IF NOT EXISTS idx_events_status ON alert_events(status);
CREATE INDEX IF NOT EXISTS idx_events_started ON alert_events(started_at);
";

pub(crate) const RULE_COLUMNS: &str = "id, name, description, metric, comparator, threshold, \
     duration_secs, severity, enabled, target_pattern, created_at, updated_at";

pub(crate) const EVENT_COLUMNS: &str = "id, rule_id, rule_name, target_id, metric, severity, \
     status, started_at, acknowledged_at, resolved_at, triggered_value, threshold, summary";

/// Failure inside a blocking database closure. Kept local so both SQLite
/// and domain errors can be raised with `?`.
pub(crate) enum DbError {
    Sql(rusqlite::Error),
    Store(StoreError),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sql(e)
    }
}

impl From<StoreError> for DbError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Store(e) => e,
            DbError::Sql(rusqlite::Error::SqliteFailure(err, msg)) => {
                let detail = msg.unwrap_or_else(|| err.to_string());
                match err.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => StoreError::Conflict(detail),
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        StoreError::InvalidReference(detail)
                    }
                    _ => StoreError::Backend(anyhow::anyhow!("SQLite error: {detail}")),
                }
            }
            DbError::Sql(e) => StoreError::Backend(e.into()),
        }
    }
}

pub(crate) type DbResult<T> = std::result::Result<T, DbError>;

/// Aggregate counts over rules, events and targets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_rules: u64,
    pub enabled_rules: u64,
    pub targets: u64,
    pub total_events: u64,
    pub firing_events: u64,
    pub acknowledged_events: u64,
    pub resolved_events: u64,
    pub events_last_24h: u64,
}

/// Single-file SQLite store shared by the evaluator, housekeeping and the
/// HTTP handlers.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) `<data_dir>/oxwatch.db` in WAL mode.
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let path = data_dir.join(DB_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, Some(path))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> anyhow::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(SCHEMA).context("applying schema")?;
        tracing::info!(
            path = %path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".into()),
            "Alert store opened"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> DbResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&conn);
            f(&mut guard).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("database task failed: {e}")))?
    }

    pub async fn insert_rule(&self, rule: NewAlertRule) -> StoreResult<AlertRule> {
        let now = Utc::now();
        let rule = AlertRule {
            id: oxwatch_common::id::next_id(),
            name: rule.name,
            description: rule.description,
            metric: rule.metric,
            comparator: rule.comparator,
            threshold: rule.threshold,
            duration_secs: rule.duration_secs,
            severity: rule.severity,
            enabled: rule.enabled,
            target_pattern: rule.target_pattern,
            created_at: now,
            updated_at: now,
        };
        let stored = rule.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO alert_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
                rusqlite::params![
                    stored.id,
                    stored.name,
                    stored.description,
                    stored.metric,
                    stored.comparator.symbol(),
                    stored.threshold,
                    i64::try_from(stored.duration_secs).unwrap_or(i64::MAX),
                    stored.severity.to_string(),
                    stored.enabled,
                    stored.target_pattern,
                    stored.created_at.timestamp_millis(),
                    stored.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await?;
        tracing::info!(
            rule_id = %rule.id,
            name = %rule.name,
            rule = %format!("{} {} {}", rule.metric, rule.comparator, rule.threshold),
            severity = %rule.severity,
            "Alert rule created"
        );
        Ok(rule)
    }

    /// All rules, enabled or not. Rows that no longer parse are skipped.
    pub async fn list_rules(&self) -> StoreResult<Vec<AlertRule>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {RULE_COLUMNS} FROM alert_rules ORDER BY created_at, rowid"))?;
            let rows = stmt.query_map([], read_rule_row)?;
            collect_rules(rows)
        })
        .await
    }

    pub async fn find_rule_by_name(&self, name: &str) -> StoreResult<Option<AlertRule>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE name = ?1"),
                    [name],
                    read_rule_row,
                )
                .optional()?;
            Ok(row.and_then(RawRule::into_rule))
        })
        .await
    }

    pub async fn count_rules(&self) -> StoreResult<u64> {
        self.with_conn(|conn| Ok(count(conn, "SELECT COUNT(*) FROM alert_rules", [])?))
            .await
    }

    /// Registers a target, or refreshes its name and last-seen time.
    pub async fn upsert_target(&self, id: &str, name: Option<&str>) -> StoreResult<Target> {
        let id = id.to_string();
        let name = name.map(str::to_string);
        self.with_conn(move |conn| upsert_target(conn, &id, name.as_deref(), Utc::now()))
            .await
    }

    pub async fn list_targets(&self) -> StoreResult<Vec<Target>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, created_at FROM targets ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Target {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: from_millis(row.get(2)?)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Stores one sample, registering the target on first sight.
    pub async fn insert_sample(
        &self,
        target_id: &str,
        collected_at: DateTime<Utc>,
        values: BTreeMap<String, f64>,
    ) -> StoreResult<MetricSample> {
        let sample = MetricSample {
            id: oxwatch_common::id::next_id(),
            target_id: target_id.to_string(),
            collected_at,
            values,
        };
        let stored = sample.clone();
        self.with_conn(move |conn| {
            let json = serde_json::to_string(&stored.values)
                .map_err(|e| StoreError::Backend(e.into()))?;
            let tx = conn.transaction()?;
            upsert_target(&tx, &stored.target_id, None, Utc::now())?;
            tx.execute(
                "INSERT INTO metric_samples (id, target_id, collected_at, metric_values) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    stored.id,
                    stored.target_id,
                    stored.collected_at.timestamp_millis(),
                    json
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(sample)
    }

    /// Events that are firing or acknowledged, newest first.
    pub async fn list_open_events(&self) -> StoreResult<Vec<AlertEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM alert_events WHERE status != 'resolved' ORDER BY started_at DESC"
            ))?;
            let rows = stmt.query_map([], read_event_row)?;
            collect_events(rows)
        })
        .await
    }

    pub async fn get_event(&self, event_id: &str) -> StoreResult<Option<AlertEvent>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| load_event(conn, &event_id)).await
    }

    pub async fn statistics(&self) -> StoreResult<StoreStats> {
        let since = (Utc::now() - Duration::hours(24)).timestamp_millis();
        self.with_conn(move |conn| {
            let conn: &Connection = conn;
            let by_status = |status: &str| {
                count(
                    conn,
                    "SELECT COUNT(*) FROM alert_events WHERE status = ?1",
                    [status],
                )
            };
            Ok(StoreStats {
                total_rules: count(conn, "SELECT COUNT(*) FROM alert_rules", [])?,
                enabled_rules: count(conn, "SELECT COUNT(*) FROM alert_rules WHERE enabled = 1", [])?,
                targets: count(conn, "SELECT COUNT(*) FROM targets", [])?,
                total_events: count(conn, "SELECT COUNT(*) FROM alert_events", [])?,
                firing_events: by_status(AlertStatus::Firing.as_str())?,
                acknowledged_events: by_status(AlertStatus::Acknowledged.as_str())?,
                resolved_events: by_status(AlertStatus::Resolved.as_str())?,
                events_last_24h: count(
                    conn,
                    "SELECT COUNT(*) FROM alert_events WHERE started_at >= ?1",
                    [since],
                )?,
            })
        })
        .await
    }

    /// Deletes samples collected before `cutoff`. Returns rows removed.
    pub async fn cleanup_samples(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM metric_samples WHERE collected_at < ?1", [cutoff])?;
            Ok(removed as u64)
        })
        .await
    }

    /// Deletes resolved events whose resolution predates `cutoff`.
    pub async fn cleanup_resolved_events(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM alert_events WHERE status = 'resolved' AND resolved_at < ?1",
                [cutoff],
            )?;
            Ok(removed as u64)
        })
        .await
    }
}

fn count<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

fn upsert_target(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<Target> {
    let now_ms = now.timestamp_millis();
    conn.execute(
        "INSERT INTO targets (id, name, created_at, last_seen_at) VALUES (?1, COALESCE(?2, ?1), ?3, ?3)
         ON CONFLICT(id) DO UPDATE SET
             name = COALESCE(?2, targets.name),
             last_seen_at = ?3",
        rusqlite::params![id, name, now_ms],
    )?;
    let target = conn.query_row(
        "SELECT id, name, created_at FROM targets WHERE id = ?1",
        [id],
        |row| {
            Ok(Target {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: from_millis(row.get(2)?)?,
            })
        },
    )?;
    Ok(target)
}

pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

fn opt_millis(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

/// A rule row before its enum columns are parsed.
pub(crate) struct RawRule {
    id: String,
    name: String,
    description: Option<String>,
    metric: String,
    comparator: String,
    threshold: f64,
    duration_secs: i64,
    severity: String,
    enabled: bool,
    target_pattern: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RawRule {
    /// `None` (with a warning) when a stored enum no longer parses.
    pub(crate) fn into_rule(self) -> Option<AlertRule> {
        let comparator = match self.comparator.parse::<Comparator>() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(rule_id = %self.id, error = %e, "Skipping rule with malformed comparator");
                return None;
            }
        };
        let severity = match self.severity.parse::<Severity>() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(rule_id = %self.id, error = %e, "Skipping rule with malformed severity");
                return None;
            }
        };
        Some(AlertRule {
            id: self.id,
            name: self.name,
            description: self.description,
            metric: self.metric,
            comparator,
            threshold: self.threshold,
            duration_secs: self.duration_secs.max(0).unsigned_abs(),
            severity,
            enabled: self.enabled,
            target_pattern: self.target_pattern,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn read_rule_row(row: &Row<'_>) -> rusqlite::Result<RawRule> {
    Ok(RawRule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        metric: row.get(3)?,
        comparator: row.get(4)?,
        threshold: row.get(5)?,
        duration_secs: row.get(6)?,
        severity: row.get(7)?,
        enabled: row.get(8)?,
        target_pattern: row.get(9)?,
        created_at: from_millis(row.get(10)?)?,
        updated_at: from_millis(row.get(11)?)?,
    })
}

pub(crate) fn collect_rules(
    rows: impl Iterator<Item = rusqlite::Result<RawRule>>,
) -> DbResult<Vec<AlertRule>> {
    let mut rules = Vec::new();
    for row in rows {
        if let Some(rule) = row?.into_rule() {
            rules.push(rule);
        }
    }
    Ok(rules)
}

pub(crate) fn read_event_row(row: &Row<'_>) -> rusqlite::Result<(AlertEvent, String, String)> {
    let severity: String = row.get(5)?;
    let status: String = row.get(6)?;
    let event = AlertEvent {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        rule_name: row.get(2)?,
        target_id: row.get(3)?,
        metric: row.get(4)?,
        severity: Severity::Low,
        status: AlertStatus::Firing,
        started_at: from_millis(row.get(7)?)?,
        acknowledged_at: opt_millis(row.get(8)?)?,
        resolved_at: opt_millis(row.get(9)?)?,
        triggered_value: row.get(10)?,
        threshold: row.get(11)?,
        summary: row.get(12)?,
    };
    Ok((event, severity, status))
}

/// Fills in the enum columns; rows with unknown values are skipped.
fn finish_event((mut event, severity, status): (AlertEvent, String, String)) -> Option<AlertEvent> {
    match (severity.parse::<Severity>(), status.parse::<AlertStatus>()) {
        (Ok(severity), Ok(status)) => {
            event.severity = severity;
            event.status = status;
            Some(event)
        }
        _ => {
            tracing::warn!(event_id = %event.id, severity = %severity, status = %status, "Skipping malformed alert event row");
            None
        }
    }
}

pub(crate) fn collect_events(
    rows: impl Iterator<Item = rusqlite::Result<(AlertEvent, String, String)>>,
) -> DbResult<Vec<AlertEvent>> {
    let mut events = Vec::new();
    for row in rows {
        if let Some(event) = finish_event(row?) {
            events.push(event);
        }
    }
    Ok(events)
}

pub(crate) fn load_event(conn: &Connection, event_id: &str) -> DbResult<Option<AlertEvent>> {
    let row = conn
        .query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM alert_events WHERE id = ?1"),
            [event_id],
            read_event_row,
        )
        .optional()?;
    Ok(row.and_then(finish_event))
}

pub(crate) fn read_sample_row(row: &Row<'_>) -> rusqlite::Result<MetricSample> {
    let json: String = row.get(3)?;
    let values: BTreeMap<String, f64> = serde_json::from_str(&json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(MetricSample {
        id: row.get(0)?,
        target_id: row.get(1)?,
        collected_at: from_millis(row.get(2)?)?,
        values,
    })
}
