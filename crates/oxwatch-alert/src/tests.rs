use crate::evaluator::{AlertEvaluator, EvaluatorConfig, ManualTrigger, TriggerOutcome};
use crate::store::{
    target_matches, EventStore, MetricSource, RuleStore, StoreError, StoreResult, TargetDirectory,
};
use crate::EvaluationError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oxwatch_common::types::{
    AlertEvent, AlertRule, AlertStatus, Comparator, MetricSample, NewAlertEvent, Severity,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    rules: Vec<AlertRule>,
    samples: Vec<MetricSample>,
    events: Vec<AlertEvent>,
    targets: Vec<String>,
    failing_targets: HashSet<String>,
    hanging_targets: HashSet<String>,
    fail_open_lookup: bool,
    hide_open_events: bool,
    enforce_unique: bool,
    /// Commits the event, then stalls before returning.
    slow_create: Option<std::time::Duration>,
}

#[derive(Default)]
struct FakeStore {
    state: Mutex<State>,
    ids: AtomicU64,
}

impl FakeStore {
    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn add_rule(&self, id: &str, metric: &str, comparator: Comparator, threshold: f64) {
        self.add_rule_with(id, metric, comparator, threshold, |_| {});
    }

    fn add_rule_with(
        &self,
        id: &str,
        metric: &str,
        comparator: Comparator,
        threshold: f64,
        customize: impl FnOnce(&mut AlertRule),
    ) {
        let now = Utc::now();
        let mut rule = AlertRule {
            id: id.into(),
            name: format!("{metric} {comparator} {threshold}"),
            description: None,
            metric: metric.into(),
            comparator,
            threshold,
            duration_secs: 60,
            severity: Severity::High,
            enabled: true,
            target_pattern: "*".into(),
            created_at: now,
            updated_at: now,
        };
        customize(&mut rule);
        self.with(|s| s.rules.push(rule));
    }

    fn push_sample(&self, target: &str, values: &[(&str, f64)], secs_ago: i64) {
        let id = self.ids.fetch_add(1, Ordering::Relaxed).to_string();
        let sample = MetricSample {
            id,
            target_id: target.into(),
            collected_at: Utc::now() - Duration::seconds(secs_ago),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        };
        self.with(|s| {
            if !s.targets.iter().any(|t| t == target) {
                s.targets.push(target.to_string());
            }
            s.samples.push(sample);
        });
    }

    fn events(&self) -> Vec<AlertEvent> {
        self.with(|s| s.events.clone())
    }

    fn open_count(&self, rule_id: &str, target_id: &str) -> usize {
        self.with(|s| {
            s.events
                .iter()
                .filter(|e| e.rule_id == rule_id && e.target_id == target_id && e.status.is_open())
                .count()
        })
    }

    fn check_target(&self, target_id: &str) -> StoreResult<bool> {
        self.with(|s| {
            if s.failing_targets.contains(target_id) {
                return Err(StoreError::Backend(anyhow::anyhow!("connection reset")));
            }
            Ok(s.hanging_targets.contains(target_id))
        })
    }
}

#[async_trait]
impl RuleStore for FakeStore {
    async fn list_enabled_rules_for_target(&self, target_id: &str) -> StoreResult<Vec<AlertRule>> {
        Ok(self.with(|s| {
            s.rules
                .iter()
                .filter(|r| r.enabled && target_matches(&r.target_pattern, target_id))
                .cloned()
                .collect()
        }))
    }

    async fn get_rule(&self, rule_id: &str) -> StoreResult<Option<AlertRule>> {
        Ok(self.with(|s| s.rules.iter().find(|r| r.id == rule_id).cloned()))
    }
}

#[async_trait]
impl MetricSource for FakeStore {
    async fn latest_sample(&self, target_id: &str) -> StoreResult<Option<MetricSample>> {
        if self.check_target(target_id)? {
            std::future::pending::<()>().await;
        }
        Ok(self.with(|s| {
            s.samples
                .iter()
                .filter(|m| m.target_id == target_id)
                .max_by_key(|m| m.collected_at)
                .cloned()
        }))
    }

    async fn samples_between(
        &self,
        target_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSample>> {
        let mut window: Vec<MetricSample> = self.with(|s| {
            s.samples
                .iter()
                .filter(|m| m.target_id == target_id && m.collected_at >= from && m.collected_at <= to)
                .cloned()
                .collect()
        });
        window.sort_by_key(|m| m.collected_at);
        Ok(window)
    }
}

#[async_trait]
impl EventStore for FakeStore {
    async fn create_event(&self, event: NewAlertEvent) -> StoreResult<AlertEvent> {
        let id = format!("evt-{}", self.ids.fetch_add(1, Ordering::Relaxed));
        let (created, stall) = self.with(|s| {
            if s.enforce_unique
                && s.events.iter().any(|e| {
                    e.rule_id == event.rule_id && e.target_id == event.target_id && e.status.is_open()
                })
            {
                return Err(StoreError::Conflict("open event exists".into()));
            }
            let created = event.into_event(id);
            s.events.push(created.clone());
            Ok((created, s.slow_create))
        })?;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(created)
    }

    async fn find_open_events(&self, rule_id: &str, target_id: &str) -> StoreResult<Vec<AlertEvent>> {
        tokio::task::yield_now().await;
        self.with(|s| {
            if s.fail_open_lookup {
                return Err(StoreError::Backend(anyhow::anyhow!("lookup failed")));
            }
            if s.hide_open_events {
                return Ok(Vec::new());
            }
            Ok(s.events
                .iter()
                .filter(|e| e.rule_id == rule_id && e.target_id == target_id && e.status.is_open())
                .cloned()
                .collect())
        })
    }

    async fn acknowledge(&self, event_id: &str) -> StoreResult<AlertEvent> {
        self.transition(event_id, AlertStatus::Acknowledged)
    }

    async fn resolve(&self, event_id: &str) -> StoreResult<AlertEvent> {
        self.transition(event_id, AlertStatus::Resolved)
    }
}

impl FakeStore {
    fn transition(&self, event_id: &str, next: AlertStatus) -> StoreResult<AlertEvent> {
        self.with(|s| {
            let event = s
                .events
                .iter_mut()
                .find(|e| e.id == event_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "alert event",
                    id: event_id.to_string(),
                })?;
            event.status = next;
            match next {
                AlertStatus::Acknowledged => event.acknowledged_at = Some(Utc::now()),
                AlertStatus::Resolved => event.resolved_at = Some(Utc::now()),
                AlertStatus::Firing => {}
            }
            Ok(event.clone())
        })
    }
}

#[async_trait]
impl TargetDirectory for FakeStore {
    async fn list_target_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.with(|s| s.targets.clone()))
    }
}

fn evaluator(store: &Arc<FakeStore>) -> Arc<AlertEvaluator> {
    Arc::new(AlertEvaluator::from_store(
        store.clone(),
        EvaluatorConfig::default(),
    ))
}

#[tokio::test]
async fn breach_creates_one_firing_event() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);

    let events = evaluator(&store).evaluate("7").await.unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.status, AlertStatus::Firing);
    assert_eq!(event.rule_id, "cpu-high");
    assert_eq!(event.target_id, "7");
    assert_eq!(event.triggered_value, 85.0);
    assert_eq!(event.threshold, 80.0);
    assert_eq!(event.severity, Severity::High);
    assert!(event.resolved_at.is_none());
    assert_eq!(store.events().len(), 1);
}

#[tokio::test]
async fn repeated_cycles_do_not_duplicate_open_event() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    let engine = evaluator(&store);

    let first = engine.evaluate_all().await;
    assert_eq!(first.events.len(), 1);

    for _ in 0..5 {
        store.push_sample("7", &[("cpu_usage", 90.0)], 0);
        let report = engine.evaluate_all().await;
        assert!(report.events.is_empty());
        assert!(report.failures.is_empty());
    }

    assert_eq!(store.open_count("cpu-high", "7"), 1);
    assert_eq!(engine.stats().suppressed, 5);
}

#[tokio::test]
async fn acknowledged_event_still_suppresses() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    let engine = evaluator(&store);

    let created = engine.evaluate("7").await.unwrap();
    store.acknowledge(&created[0].id).await.unwrap();

    assert!(engine.evaluate("7").await.unwrap().is_empty());
    assert_eq!(store.events().len(), 1);
}

#[tokio::test]
async fn resolving_allows_a_new_episode() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    let engine = evaluator(&store);

    let first = engine.evaluate("7").await.unwrap();
    store.resolve(&first[0].id).await.unwrap();

    let second = engine.evaluate("7").await.unwrap();
    assert_eq!(second.len(), 1);
    assert_ne!(second[0].id, first[0].id);
    assert_eq!(store.events().len(), 2);
    assert_eq!(store.open_count("cpu-high", "7"), 1);
}

#[tokio::test]
async fn no_breach_no_event() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 79.9)], 0);

    assert!(evaluator(&store).evaluate("7").await.unwrap().is_empty());
    assert!(store.events().is_empty());
}

#[tokio::test]
async fn target_without_samples_is_a_noop() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);

    assert!(evaluator(&store).evaluate("ghost").await.unwrap().is_empty());
}

#[tokio::test]
async fn disabled_and_out_of_scope_rules_are_skipped() {
    let store = Arc::new(FakeStore::default());
    store.add_rule_with("off", "cpu_usage", Comparator::GreaterEqual, 80.0, |r| {
        r.enabled = false
    });
    store.add_rule_with("db-only", "cpu_usage", Comparator::GreaterEqual, 80.0, |r| {
        r.target_pattern = "db-*".into()
    });
    store.add_rule_with("web-only", "cpu_usage", Comparator::GreaterEqual, 80.0, |r| {
        r.target_pattern = "web-*".into()
    });
    store.push_sample("web-01", &[("cpu_usage", 99.0)], 0);

    let events = evaluator(&store).evaluate("web-01").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule_id, "web-only");
}

#[tokio::test]
async fn multiple_rules_fire_independently() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.add_rule_with("cpu-crit", "cpu_usage", Comparator::GreaterEqual, 95.0, |r| {
        r.severity = Severity::Critical
    });
    store.add_rule("mem-high", "memory_usage", Comparator::GreaterEqual, 85.0);
    store.push_sample("7", &[("cpu_usage", 97.0), ("memory_usage", 40.0)], 0);

    let mut ids: Vec<String> = evaluator(&store)
        .evaluate("7")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.rule_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["cpu-crit", "cpu-high"]);
}

#[tokio::test]
async fn breach_must_hold_for_the_whole_duration() {
    let store = Arc::new(FakeStore::default());
    store.add_rule_with("cpu-high", "cpu_usage", Comparator::GreaterThan, 90.0, |r| {
        r.duration_secs = 60
    });
    store.push_sample("7", &[("cpu_usage", 95.0)], 50);
    store.push_sample("7", &[("cpu_usage", 70.0)], 30);
    store.push_sample("7", &[("cpu_usage", 95.0)], 0);
    let engine = evaluator(&store);

    assert!(engine.evaluate("7").await.unwrap().is_empty());

    // A dip older than the window no longer counts.
    let store = Arc::new(FakeStore::default());
    store.add_rule_with("cpu-high", "cpu_usage", Comparator::GreaterThan, 90.0, |r| {
        r.duration_secs = 60
    });
    store.push_sample("7", &[("cpu_usage", 70.0)], 120);
    store.push_sample("7", &[("cpu_usage", 95.0)], 40);
    store.push_sample("7", &[("cpu_usage", 96.0)], 0);

    assert_eq!(evaluator(&store).evaluate("7").await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_samples_are_still_evaluated() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 3600);
    let engine = evaluator(&store);

    assert_eq!(engine.evaluate("7").await.unwrap().len(), 1);
    assert_eq!(engine.stats().stale_samples, 1);
}

#[tokio::test]
async fn one_failing_target_does_not_block_the_others() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    for target in ["A", "B", "C"] {
        store.push_sample(target, &[("cpu_usage", 90.0)], 0);
    }
    store.with(|s| s.failing_targets.insert("B".into()));

    let report = evaluator(&store).evaluate_all().await;

    assert_eq!(report.targets_total, 3);
    assert_eq!(report.targets_evaluated, 2);
    let mut fired: Vec<&str> = report.events.iter().map(|e| e.target_id.as_str()).collect();
    fired.sort();
    assert_eq!(fired, vec!["A", "C"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].target_id, "B");
}

#[tokio::test(start_paused = true)]
async fn hanging_target_times_out_without_stalling_the_cycle() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("A", &[("cpu_usage", 90.0)], 0);
    store.push_sample("B", &[("cpu_usage", 90.0)], 0);
    store.with(|s| s.hanging_targets.insert("B".into()));

    let engine = evaluator(&store);
    let report = engine.evaluate_all().await;

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].target_id, "A");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].target_id, "B");
    assert!(report.failures[0].reason.contains("timed out"));
    assert_eq!(engine.stats().target_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn write_committed_after_timeout_is_still_reported() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    store.with(|s| s.slow_create = Some(std::time::Duration::from_secs(30)));
    let engine = Arc::new(AlertEvaluator::from_store(
        store.clone(),
        EvaluatorConfig {
            store_timeout: std::time::Duration::from_secs(1),
            target_timeout: std::time::Duration::from_secs(60),
            ..EvaluatorConfig::default()
        },
    ));

    let events = engine.evaluate("7").await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, store.events()[0].id);
    assert_eq!(engine.stats().events_created, 1);
    assert_eq!(engine.stats().rule_failures, 0);

    // The next pass sees a continuation, not a second episode.
    store.with(|s| s.slow_create = None);
    assert!(engine.evaluate("7").await.unwrap().is_empty());
    assert_eq!(store.open_count("cpu-high", "7"), 1);
}

#[tokio::test]
async fn failed_open_event_lookup_suppresses_creation() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    store.with(|s| s.fail_open_lookup = true);

    let events = evaluator(&store).evaluate("7").await.unwrap();

    assert!(events.is_empty());
    assert!(store.events().is_empty());
}

#[tokio::test]
async fn store_conflict_is_treated_as_continuation() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    let engine = evaluator(&store);
    engine.evaluate("7").await.unwrap();

    store.with(|s| {
        s.hide_open_events = true;
        s.enforce_unique = true;
    });
    let events = engine.evaluate("7").await.unwrap();

    assert!(events.is_empty());
    assert_eq!(store.open_count("cpu-high", "7"), 1);
    assert_eq!(engine.stats().rule_failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_create_a_single_event() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.push_sample("7", &[("cpu_usage", 85.0)], 0);
    let engine = evaluator(&store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.evaluate("7").await }));
    }
    let mut created = 0;
    for handle in handles {
        created += handle.await.unwrap().unwrap().len();
    }

    assert_eq!(created, 1);
    assert_eq!(store.open_count("cpu-high", "7"), 1);
}

#[tokio::test]
async fn manual_trigger_goes_through_deduplication() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    let engine = evaluator(&store);

    let trigger = ManualTrigger {
        rule_id: "cpu-high".into(),
        target_id: "7".into(),
        triggered_value: 88.0,
        summary: Some("operator raised".into()),
    };
    let created = match engine.trigger(trigger.clone()).await.unwrap() {
        TriggerOutcome::Created(event) => event,
        other => panic!("expected a new event, got {other:?}"),
    };
    assert_eq!(created.summary, "operator raised");
    assert_eq!(created.triggered_value, 88.0);

    match engine.trigger(trigger).await.unwrap() {
        TriggerOutcome::Suppressed { open_event_id } => {
            assert_eq!(open_event_id.as_deref(), Some(created.id.as_str()))
        }
        other => panic!("expected suppression, got {other:?}"),
    }
}

#[tokio::test]
async fn manual_trigger_rejects_bad_input() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    let engine = evaluator(&store);

    let unknown = engine
        .trigger(ManualTrigger {
            rule_id: "nope".into(),
            target_id: "7".into(),
            triggered_value: 1.0,
            summary: None,
        })
        .await;
    assert!(matches!(unknown, Err(EvaluationError::UnknownRule(id)) if id == "nope"));

    let blank = engine
        .trigger(ManualTrigger {
            rule_id: "cpu-high".into(),
            target_id: "  ".into(),
            triggered_value: 1.0,
            summary: None,
        })
        .await;
    assert!(matches!(blank, Err(EvaluationError::InvalidTrigger(_))));

    let nan = engine
        .trigger(ManualTrigger {
            rule_id: "cpu-high".into(),
            target_id: "7".into(),
            triggered_value: f64::NAN,
            summary: None,
        })
        .await;
    assert!(matches!(nan, Err(EvaluationError::InvalidTrigger(_))));
}

#[tokio::test]
async fn manual_trigger_reports_unavailable_lookup() {
    let store = Arc::new(FakeStore::default());
    store.add_rule("cpu-high", "cpu_usage", Comparator::GreaterEqual, 80.0);
    store.with(|s| s.fail_open_lookup = true);

    let result = evaluator(&store)
        .trigger(ManualTrigger {
            rule_id: "cpu-high".into(),
            target_id: "7".into(),
            triggered_value: 90.0,
            summary: None,
        })
        .await;

    assert!(matches!(result, Err(EvaluationError::DedupUnavailable { .. })));
    assert!(store.events().is_empty());
}
