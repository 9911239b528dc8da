use crate::dedup::{DedupDecision, Deduplicator};
use crate::error::EvaluationError;
use crate::matcher::{breach_value, sustained};
use crate::store::{
    target_matches, EventStore, MetricSource, RuleStore, StoreError, StoreResult, TargetDirectory,
};
use chrono::{DateTime, Utc};
use oxwatch_common::types::{AlertEvent, AlertRule, MetricSample, NewAlertEvent};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Samples older than this are evaluated but flagged.
    pub staleness: Duration,
    /// Budget for each individual store call.
    pub store_timeout: Duration,
    /// Budget for one whole target evaluation.
    pub target_timeout: Duration,
    /// Targets evaluated in parallel within one cycle.
    pub max_concurrent: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(300),
            store_timeout: Duration::from_secs(5),
            target_timeout: Duration::from_secs(15),
            max_concurrent: 8,
        }
    }
}

#[derive(Default)]
struct EvaluatorStats {
    cycles: AtomicU64,
    targets_evaluated: AtomicU64,
    target_failures: AtomicU64,
    rule_failures: AtomicU64,
    stale_samples: AtomicU64,
    suppressed: AtomicU64,
    events_created: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluatorStatsSnapshot {
    pub cycles: u64,
    pub targets_evaluated: u64,
    pub target_failures: u64,
    pub rule_failures: u64,
    pub stale_samples: u64,
    pub suppressed: u64,
    pub events_created: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub target_id: String,
    pub reason: String,
}

/// Result of one `evaluate_all` pass.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub targets_total: usize,
    pub targets_evaluated: usize,
    /// Events newly created in this pass.
    pub events: Vec<AlertEvent>,
    pub failures: Vec<TargetFailure>,
}

impl CycleReport {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            elapsed_ms: 0,
            targets_total: 0,
            targets_evaluated: 0,
            events: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Operator-supplied alert payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ManualTrigger {
    pub rule_id: String,
    pub target_id: String,
    pub triggered_value: f64,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Created(AlertEvent),
    /// An open event already exists for the pair.
    Suppressed { open_event_id: Option<String> },
}

enum Creation {
    Created(AlertEvent),
    Duplicate(Option<String>),
    DedupUnavailable,
}

/// The alert evaluation cycle: latest sample, applicable rules, matcher,
/// deduplicator, event store.
pub struct AlertEvaluator {
    rules: Arc<dyn RuleStore>,
    metrics: Arc<dyn MetricSource>,
    events: Arc<dyn EventStore>,
    targets: Arc<dyn TargetDirectory>,
    dedup: Deduplicator,
    config: EvaluatorConfig,
    stats: EvaluatorStats,
}

impl AlertEvaluator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        metrics: Arc<dyn MetricSource>,
        events: Arc<dyn EventStore>,
        targets: Arc<dyn TargetDirectory>,
        config: EvaluatorConfig,
    ) -> Self {
        let dedup = Deduplicator::new(events.clone(), config.store_timeout);
        Self {
            rules,
            metrics,
            events,
            targets,
            dedup,
            config,
            stats: EvaluatorStats::default(),
        }
    }

    /// Builds an evaluator whose four collaborators are the same store.
    pub fn from_store<S>(store: Arc<S>, config: EvaluatorConfig) -> Self
    where
        S: RuleStore + MetricSource + EventStore + TargetDirectory + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            config,
        )
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn stats(&self) -> EvaluatorStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EvaluatorStatsSnapshot {
            cycles: load(&self.stats.cycles),
            targets_evaluated: load(&self.stats.targets_evaluated),
            target_failures: load(&self.stats.target_failures),
            rule_failures: load(&self.stats.rule_failures),
            stale_samples: load(&self.stats.stale_samples),
            suppressed: load(&self.stats.suppressed),
            events_created: load(&self.stats.events_created),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { operation }),
        }
    }

    /// Evaluates one target and returns the events created.
    ///
    /// A target without samples yields an empty list. The whole evaluation
    /// is bounded by [`EvaluatorConfig::target_timeout`].
    pub async fn evaluate(&self, target_id: &str) -> Result<Vec<AlertEvent>, EvaluationError> {
        match tokio::time::timeout(self.config.target_timeout, self.evaluate_target(target_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(EvaluationError::TargetTimeout(target_id.to_string())),
        }
    }

    async fn evaluate_target(&self, target_id: &str) -> Result<Vec<AlertEvent>, EvaluationError> {
        let now = Utc::now();

        let latest = self
            .bounded("fetch latest sample", self.metrics.latest_sample(target_id))
            .await
            .map_err(|e| EvaluationError::dependency("fetch latest sample", target_id, e))?;
        let Some(sample) = latest else {
            tracing::debug!(target_id, "No metric samples yet, skipping target");
            return Ok(Vec::new());
        };

        let age = now.signed_duration_since(sample.collected_at);
        if age.to_std().is_ok_and(|age| age > self.config.staleness) {
            self.stats.stale_samples.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target_id,
                age_secs = age.num_seconds(),
                "Latest sample is stale, evaluating anyway"
            );
        }

        let rules = self
            .bounded("list rules", self.rules.list_enabled_rules_for_target(target_id))
            .await
            .map_err(|e| EvaluationError::dependency("list rules", target_id, e))?;

        tracing::debug!(target_id, rules = rules.len(), "Evaluating rules");

        let mut created = Vec::new();
        for rule in &rules {
            if !rule.enabled || !target_matches(&rule.target_pattern, target_id) {
                continue;
            }
            let Some(value) = breach_value(rule, &sample) else {
                continue;
            };

            match self.is_sustained(rule, &sample).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(rule_id = %rule.id, target_id, "Breach not yet sustained");
                    continue;
                }
                Err(e) => {
                    self.stats.rule_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(rule_id = %rule.id, target_id, error = %e, "Failed to read sample history");
                    continue;
                }
            }

            let event = NewAlertEvent::firing(rule, target_id, value, now);
            match self.create_if_new(event).await {
                Ok(Creation::Created(event)) => created.push(event),
                Ok(Creation::Duplicate(_) | Creation::DedupUnavailable) => {}
                Err(e) => {
                    self.stats.rule_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(rule_id = %rule.id, target_id, error = %e, "Failed to persist alert event");
                }
            }
        }

        self.stats.targets_evaluated.fetch_add(1, Ordering::Relaxed);
        if !created.is_empty() {
            tracing::info!(target_id, count = created.len(), "Alerts triggered");
        }
        Ok(created)
    }

    /// Every sample in `[latest - duration, latest]` must breach.
    async fn is_sustained(&self, rule: &AlertRule, latest: &MetricSample) -> StoreResult<bool> {
        if rule.duration_secs == 0 {
            return Ok(true);
        }
        let span = chrono::Duration::seconds(i64::try_from(rule.duration_secs).unwrap_or(i64::MAX));
        let from = latest
            .collected_at
            .checked_sub_signed(span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let window = self
            .bounded(
                "fetch sample history",
                self.metrics.samples_between(&latest.target_id, from, latest.collected_at),
            )
            .await?;
        Ok(sustained(rule, latest, &window))
    }

    async fn create_if_new(&self, event: NewAlertEvent) -> StoreResult<Creation> {
        let _guard = self.dedup.lock_pair(&event.rule_id, &event.target_id).await;

        match self.dedup.check(&event.rule_id, &event.target_id).await {
            DedupDecision::Create => {}
            DedupDecision::Continuation { open_event_id } => {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    rule_id = %event.rule_id,
                    target_id = %event.target_id,
                    open_event_id = %open_event_id,
                    "Alert already open, not duplicating"
                );
                return Ok(Creation::Duplicate(Some(open_event_id)));
            }
            DedupDecision::StoreFailed => {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                return Ok(Creation::DedupUnavailable);
            }
        }

        let rule_id = event.rule_id.clone();
        let target_id = event.target_id.clone();
        match self.bounded("create event", self.events.create_event(event)).await {
            Ok(created) => {
                self.stats.events_created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    event_id = %created.id,
                    rule_id = %created.rule_id,
                    target_id = %created.target_id,
                    severity = %created.severity,
                    value = created.triggered_value,
                    "Alert event created"
                );
                Ok(Creation::Created(created))
            }
            Err(StoreError::Conflict(reason)) => {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(rule_id = %rule_id, target_id = %target_id, reason = %reason, "Store rejected duplicate open event");
                Ok(Creation::Duplicate(None))
            }
            Err(StoreError::Timeout { operation }) => {
                self.recover_timed_out_create(&rule_id, &target_id, operation)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// A timed-out write may still commit after the caller stops waiting.
    /// The pair lock is still held, so an open event seen now is ours.
    async fn recover_timed_out_create(
        &self,
        rule_id: &str,
        target_id: &str,
        operation: &'static str,
    ) -> StoreResult<Creation> {
        let open = self
            .bounded("re-check open event", self.events.find_open_events(rule_id, target_id))
            .await;
        match open.map(|events| events.into_iter().next()) {
            Ok(Some(created)) => {
                self.stats.events_created.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_id = %created.id,
                    rule_id,
                    target_id,
                    "Alert event write outlived its timeout but committed"
                );
                Ok(Creation::Created(created))
            }
            Ok(None) => Err(StoreError::Timeout { operation }),
            Err(e) => {
                tracing::warn!(rule_id, target_id, error = %e, "Could not confirm timed-out alert write");
                Err(StoreError::Timeout { operation })
            }
        }
    }

    /// Evaluates every known target, isolating failures per target.
    pub async fn evaluate_all(self: &Arc<Self>) -> CycleReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        let mut report = CycleReport::empty(started_at);

        let targets = match self
            .bounded("list targets", self.targets.list_target_ids())
            .await
        {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list targets, skipping cycle");
                report.failures.push(TargetFailure {
                    target_id: "*".to_string(),
                    reason: e.to_string(),
                });
                report.elapsed_ms = elapsed_ms(clock);
                return report;
            }
        };
        report.targets_total = targets.len();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        for target_id in targets {
            let this = Arc::clone(self);
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = this.evaluate(&target_id).await;
                (target_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(events))) => {
                    report.targets_evaluated += 1;
                    report.events.extend(events);
                }
                Ok((target_id, Err(e))) => {
                    self.stats.target_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(target_id = %target_id, error = %e, "Target evaluation failed");
                    report.failures.push(TargetFailure {
                        target_id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    self.stats.target_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Target evaluation task panicked");
                    report.failures.push(TargetFailure {
                        target_id: "unknown".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.failures.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        report.elapsed_ms = elapsed_ms(clock);

        if report.events.is_empty() {
            tracing::info!(
                targets = report.targets_total,
                failed = report.failures.len(),
                elapsed_ms = report.elapsed_ms,
                "Alert evaluation completed, no alerts triggered"
            );
        } else {
            tracing::warn!(
                targets = report.targets_total,
                failed = report.failures.len(),
                triggered = report.events.len(),
                elapsed_ms = report.elapsed_ms,
                "Alert evaluation completed"
            );
        }
        report
    }

    /// Creates an alert from an explicit payload, through the same
    /// deduplication path as scheduled evaluation.
    pub async fn trigger(&self, trigger: ManualTrigger) -> Result<TriggerOutcome, EvaluationError> {
        let target_id = trigger.target_id.trim();
        if target_id.is_empty() {
            return Err(EvaluationError::InvalidTrigger("target_id is required".into()));
        }
        if !trigger.triggered_value.is_finite() {
            return Err(EvaluationError::InvalidTrigger(
                "triggered_value must be a finite number".into(),
            ));
        }

        let rule = self
            .bounded("get rule", self.rules.get_rule(&trigger.rule_id))
            .await
            .map_err(|e| EvaluationError::dependency("get rule", target_id, e))?
            .ok_or_else(|| EvaluationError::UnknownRule(trigger.rule_id.clone()))?;

        let mut event = NewAlertEvent::firing(&rule, target_id, trigger.triggered_value, Utc::now());
        if let Some(summary) = trigger.summary.filter(|s| !s.trim().is_empty()) {
            event.summary = summary;
        }

        match self
            .create_if_new(event)
            .await
            .map_err(|e| EvaluationError::dependency("create event", target_id, e))?
        {
            Creation::Created(event) => Ok(TriggerOutcome::Created(event)),
            Creation::Duplicate(open_event_id) => Ok(TriggerOutcome::Suppressed { open_event_id }),
            Creation::DedupUnavailable => Err(EvaluationError::DedupUnavailable {
                rule_id: rule.id,
                target_id: target_id.to_string(),
            }),
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}
