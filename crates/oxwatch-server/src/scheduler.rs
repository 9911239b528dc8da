//! Fixed-interval driver for periodic work (alert evaluation, housekeeping).
//!
//! Each scheduler owns one timer. A tick starts a cycle only when the
//! previous cycle has finished; ticks that elapse while a cycle is running
//! are skipped. A failing or panicking cycle is logged and the next tick
//! proceeds on schedule. [`SchedulerHandle::stop`] lets an in-flight cycle
//! drain for up to the grace period, then abandons it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> anyhow::Result<()>;
}

pub struct SchedulerHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    cycles: Arc<AtomicU64>,
}

impl SchedulerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cycles that ran to completion (successfully or not).
    pub fn completed_cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Halts future ticks and waits for the in-flight cycle, if any.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(scheduler = self.name, error = %e, "Scheduler task ended abnormally");
        }
        tracing::info!(scheduler = self.name, "Scheduler stopped");
    }
}

/// Resolves once a stop has been requested or the handle was dropped.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

pub fn spawn(task: Arc<dyn PeriodicTask>, period: Duration, grace: Duration) -> SchedulerHandle {
    let name = task.name();
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let cycles = Arc::new(AtomicU64::new(0));
    let counter = cycles.clone();

    let join = tokio::spawn(async move {
        tracing::info!(
            scheduler = name,
            period_secs = period.as_secs(),
            "Scheduler started"
        );
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => break,
                _ = tick.tick() => {}
            }

            let runner = task.clone();
            let mut cycle = tokio::spawn(async move { runner.run_once().await });

            let outcome = tokio::select! {
                outcome = &mut cycle => Some(outcome),
                _ = stop_requested(&mut stop_rx) => {
                    tracing::info!(
                        scheduler = name,
                        grace_secs = grace.as_secs(),
                        "Stop requested, draining in-flight cycle"
                    );
                    match tokio::time::timeout(grace, &mut cycle).await {
                        Ok(outcome) => Some(outcome),
                        Err(_) => {
                            cycle.abort();
                            tracing::warn!(scheduler = name, "In-flight cycle abandoned after grace period");
                            None
                        }
                    }
                }
            };

            match outcome {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    tracing::error!(scheduler = name, error = %e, "Scheduled cycle failed");
                }
                Some(Err(e)) => {
                    tracing::error!(scheduler = name, error = %e, "Scheduled cycle panicked");
                }
                None => break,
            }
            counter.fetch_add(1, Ordering::Relaxed);

            if *stop_rx.borrow() {
                break;
            }
        }
    });

    SchedulerHandle {
        name,
        stop_tx,
        join,
        cycles,
    }
}
