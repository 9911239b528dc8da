use crate::engine::{
    collect_events, collect_rules, load_event, read_event_row, read_rule_row, read_sample_row,
    DbResult, SqliteStore, EVENT_COLUMNS, RULE_COLUMNS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxwatch_alert::store::{
    target_matches, EventStore, MetricSource, RuleStore, StoreError, StoreResult, TargetDirectory,
};
use oxwatch_common::types::{AlertEvent, AlertRule, AlertStatus, MetricSample, NewAlertEvent};
use rusqlite::{Connection, OptionalExtension};

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_enabled_rules_for_target(&self, target_id: &str) -> StoreResult<Vec<AlertRule>> {
        let rules = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RULE_COLUMNS} FROM alert_rules WHERE enabled = 1 ORDER BY created_at, rowid"
                ))?;
                let rows = stmt.query_map([], read_rule_row)?;
                collect_rules(rows)
            })
            .await?;
        Ok(rules
            .into_iter()
            .filter(|rule| target_matches(&rule.target_pattern, target_id))
            .collect())
    }

    async fn get_rule(&self, rule_id: &str) -> StoreResult<Option<AlertRule>> {
        let rule_id = rule_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1"),
                    [rule_id],
                    read_rule_row,
                )
                .optional()?;
            Ok(row.and_then(|raw| raw.into_rule()))
        })
        .await
    }
}

#[async_trait]
impl MetricSource for SqliteStore {
    async fn latest_sample(&self, target_id: &str) -> StoreResult<Option<MetricSample>> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| {
            let sample = conn
                .query_row(
                    "SELECT id, target_id, collected_at, metric_values FROM metric_samples
                     WHERE target_id = ?1 ORDER BY collected_at DESC LIMIT 1",
                    [target_id],
                    read_sample_row,
                )
                .optional()?;
            Ok(sample)
        })
        .await
    }

    async fn samples_between(
        &self,
        target_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSample>> {
        let target_id = target_id.to_string();
        let (from, to) = (from.timestamp_millis(), to.timestamp_millis());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target_id, collected_at, metric_values FROM metric_samples
                 WHERE target_id = ?1 AND collected_at >= ?2 AND collected_at <= ?3
                 ORDER BY collected_at ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![target_id, from, to], read_sample_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn create_event(&self, event: NewAlertEvent) -> StoreResult<AlertEvent> {
        let event = event.into_event(oxwatch_common::id::next_id());
        let stored = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO alert_events ({EVENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, ?10, ?11)"
                ),
                rusqlite::params![
                    stored.id,
                    stored.rule_id,
                    stored.rule_name,
                    stored.target_id,
                    stored.metric,
                    stored.severity.to_string(),
                    stored.status.as_str(),
                    stored.started_at.timestamp_millis(),
                    stored.triggered_value,
                    stored.threshold,
                    stored.summary,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(event)
    }

    async fn find_open_events(&self, rule_id: &str, target_id: &str) -> StoreResult<Vec<AlertEvent>> {
        let (rule_id, target_id) = (rule_id.to_string(), target_id.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM alert_events
                 WHERE rule_id = ?1 AND target_id = ?2 AND status != 'resolved'
                 ORDER BY started_at DESC"
            ))?;
            let rows = stmt.query_map([rule_id, target_id], read_event_row)?;
            collect_events(rows)
        })
        .await
    }

    async fn acknowledge(&self, event_id: &str) -> StoreResult<AlertEvent> {
        let event = self.transition(event_id, AlertStatus::Acknowledged).await?;
        tracing::info!(event_id = %event.id, "Alert acknowledged");
        Ok(event)
    }

    async fn resolve(&self, event_id: &str) -> StoreResult<AlertEvent> {
        let event = self.transition(event_id, AlertStatus::Resolved).await?;
        tracing::info!(event_id = %event.id, target_id = %event.target_id, "Alert resolved");
        Ok(event)
    }
}

impl SqliteStore {
    /// Moves an event forward. Repeating the current status is a no-op;
    /// moving backwards is a conflict.
    async fn transition(&self, event_id: &str, next: AlertStatus) -> StoreResult<AlertEvent> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let event = apply_transition(&tx, &event_id, next, Utc::now())?;
            tx.commit()?;
            Ok(event)
        })
        .await
    }
}

fn apply_transition(
    conn: &Connection,
    event_id: &str,
    next: AlertStatus,
    now: DateTime<Utc>,
) -> DbResult<AlertEvent> {
    let current = load_event(conn, event_id)?.ok_or_else(|| StoreError::NotFound {
        entity: "alert event",
        id: event_id.to_string(),
    })?;

    if current.status == next {
        return Ok(current);
    }
    if !current.status.can_transition_to(next) {
        return Err(StoreError::Conflict(format!(
            "alert event {event_id} is {} and cannot become {next}",
            current.status
        ))
        .into());
    }

    let column = match next {
        AlertStatus::Acknowledged => "acknowledged_at",
        AlertStatus::Resolved => "resolved_at",
        AlertStatus::Firing => {
            return Err(StoreError::Conflict(format!("alert event {event_id} cannot return to firing")).into())
        }
    };
    conn.execute(
        &format!("UPDATE alert_events SET status = ?1, {column} = ?2 WHERE id = ?3"),
        rusqlite::params![next.as_str(), now.timestamp_millis(), event_id],
    )?;

    load_event(conn, event_id)?
        .ok_or_else(|| {
            StoreError::NotFound {
                entity: "alert event",
                id: event_id.to_string(),
            }
            .into()
        })
}

#[async_trait]
impl TargetDirectory for SqliteStore {
    async fn list_target_ids(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM targets ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
