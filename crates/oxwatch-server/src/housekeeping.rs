use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oxwatch_storage::SqliteStore;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub samples_removed: u64,
    pub events_removed: u64,
}

/// Deletes expired metric samples and old resolved alert events.
pub struct Housekeeping {
    store: Arc<SqliteStore>,
    sample_retention: Duration,
    resolved_retention: Duration,
}

impl Housekeeping {
    pub fn new(store: Arc<SqliteStore>, retention_days: u32, resolved_retention_days: u32) -> Self {
        Self {
            store,
            sample_retention: Duration::days(i64::from(retention_days)),
            resolved_retention: Duration::days(i64::from(resolved_retention_days)),
        }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> anyhow::Result<CleanupReport> {
        let samples_removed = self.store.cleanup_samples(now - self.sample_retention).await?;
        let events_removed = self
            .store
            .cleanup_resolved_events(now - self.resolved_retention)
            .await?;
        Ok(CleanupReport {
            samples_removed,
            events_removed,
        })
    }
}

#[async_trait]
impl PeriodicTask for Housekeeping {
    fn name(&self) -> &'static str {
        "housekeeping"
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let report = self.run_at(Utc::now()).await?;
        if report.samples_removed > 0 || report.events_removed > 0 {
            tracing::info!(
                samples = report.samples_removed,
                resolved_events = report.events_removed,
                "Expired data cleaned up"
            );
        }
        Ok(())
    }
}
