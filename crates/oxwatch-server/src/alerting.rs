use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use oxwatch_alert::{
    AlertEvaluator, CycleReport, EvaluationError, EvaluatorStatsSnapshot, ManualTrigger,
    TriggerOutcome,
};
use oxwatch_common::types::AlertEvent;
use oxwatch_notify::{NotificationManager, NotifierStats};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Evaluation followed by notification. Shared by the scheduler and the
/// manual HTTP entry points so both take the same path.
///
/// Events are persisted before any caller returns; their notification runs
/// on a background task and never holds up the next cycle.
pub struct AlertService {
    evaluator: Arc<AlertEvaluator>,
    notifier: Arc<NotificationManager>,
    deliveries: Mutex<JoinSet<()>>,
}

impl AlertService {
    pub fn new(evaluator: Arc<AlertEvaluator>, notifier: Arc<NotificationManager>) -> Self {
        Self {
            evaluator,
            notifier,
            deliveries: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let report = self.evaluator.evaluate_all().await;
        self.announce(report.events.clone()).await;
        report
    }

    pub async fn evaluate_target(&self, target_id: &str) -> Result<Vec<AlertEvent>, EvaluationError> {
        let events = self.evaluator.evaluate(target_id).await?;
        self.announce(events.clone()).await;
        Ok(events)
    }

    pub async fn trigger(&self, trigger: ManualTrigger) -> Result<TriggerOutcome, EvaluationError> {
        let outcome = self.evaluator.trigger(trigger).await?;
        if let TriggerOutcome::Created(event) = &outcome {
            self.announce(vec![event.clone()]).await;
        }
        Ok(outcome)
    }

    pub fn evaluator_stats(&self) -> EvaluatorStatsSnapshot {
        self.evaluator.stats()
    }

    pub async fn notifier_stats(&self) -> NotifierStats {
        self.notifier.stats().await
    }

    /// Waits for every notification handed off so far.
    pub async fn flush_notifications(&self) {
        let mut pending = std::mem::take(&mut *self.deliveries.lock().await);
        while let Some(joined) = pending.join_next().await {
            log_delivery_panic(joined);
        }
    }

    pub async fn pending_notifications(&self) -> usize {
        self.deliveries.lock().await.len()
    }

    async fn announce(&self, events: Vec<AlertEvent>) {
        if events.is_empty() {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        let mut deliveries = self.deliveries.lock().await;
        while let Some(joined) = deliveries.try_join_next() {
            log_delivery_panic(joined);
        }
        deliveries.spawn(async move {
            notifier.notify_batch(&events).await;
        });
    }
}

fn log_delivery_panic(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Notification delivery task failed");
    }
}

#[async_trait]
impl PeriodicTask for AlertService {
    fn name(&self) -> &'static str {
        "alert-evaluation"
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        self.run_cycle().await;
        Ok(())
    }
}
