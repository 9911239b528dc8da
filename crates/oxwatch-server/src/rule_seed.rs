use crate::config::RulesSeedFile;
use oxwatch_alert::{validate_rule, StoreError};
use oxwatch_common::types::{metric, Comparator, NewAlertRule, Severity};
use oxwatch_storage::SqliteStore;
use std::collections::HashSet;

/// Default alert rule definitions for first-time startup.
struct RuleDef {
    name: &'static str,
    description: &'static str,
    metric: &'static str,
    threshold: f64,
    duration_secs: u64,
    severity: Severity,
}

const DEFAULT_RULES: &[RuleDef] = &[
    RuleDef {
        name: "High CPU usage",
        description: "Alert when CPU usage exceeds 80%",
        metric: metric::CPU_USAGE,
        threshold: 80.0,
        duration_secs: 60,
        severity: Severity::High,
    },
    RuleDef {
        name: "Critical CPU usage",
        description: "Alert when CPU usage exceeds 95%",
        metric: metric::CPU_USAGE,
        threshold: 95.0,
        duration_secs: 30,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "High memory usage",
        description: "Alert when memory usage exceeds 85%",
        metric: metric::MEMORY_USAGE,
        threshold: 85.0,
        duration_secs: 120,
        severity: Severity::High,
    },
    RuleDef {
        name: "High disk usage",
        description: "Alert when disk usage exceeds 90%",
        metric: metric::DISK_USAGE,
        threshold: 90.0,
        duration_secs: 300,
        severity: Severity::Critical,
    },
    RuleDef {
        name: "High temperature",
        description: "Alert when temperature exceeds 80°C",
        metric: metric::TEMPERATURE,
        threshold: 80.0,
        duration_secs: 180,
        severity: Severity::High,
    },
];

impl RuleDef {
    fn to_rule(&self) -> NewAlertRule {
        NewAlertRule {
            name: self.name.to_string(),
            description: Some(self.description.to_string()),
            metric: self.metric.to_string(),
            comparator: Comparator::GreaterEqual,
            threshold: self.threshold,
            duration_secs: self.duration_secs,
            severity: self.severity,
            enabled: true,
            target_pattern: "*".to_string(),
        }
    }
}

/// Installs [`DEFAULT_RULES`] into an empty rule table. Returns the number
/// of rules inserted.
pub async fn init_default_rules(store: &SqliteStore) -> anyhow::Result<usize> {
    let count = store.count_rules().await?;
    if count > 0 {
        tracing::debug!(
            existing = count,
            "Alert rules already exist, skipping seed initialization"
        );
        return Ok(0);
    }

    let mut inserted = 0usize;
    for def in DEFAULT_RULES {
        match store.insert_rule(def.to_rule()).await {
            Ok(_) => inserted += 1,
            Err(e) => {
                tracing::warn!(name = %def.name, error = %e, "Failed to seed alert rule");
            }
        }
    }

    tracing::info!(inserted, "Default alert rules initialized");
    Ok(inserted)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: u32,
    pub skipped: u32,
    pub invalid: u32,
}

/// Validates and inserts every rule of a seed file. Names that already
/// exist are skipped; drafts that fail validation are reported and skipped.
pub async fn init_from_seed(store: &SqliteStore, seed: &RulesSeedFile) -> anyhow::Result<SeedReport> {
    let mut existing: HashSet<String> = store
        .list_rules()
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();
    let mut report = SeedReport::default();

    for draft in &seed.rules {
        let rule = match validate_rule(draft) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!(
                    name = draft.name.as_deref().unwrap_or("<unnamed>"),
                    error = %e,
                    "Invalid alert rule in seed file, skipping"
                );
                report.invalid += 1;
                continue;
            }
        };
        if existing.contains(&rule.name) {
            tracing::warn!(name = %rule.name, "Alert rule already exists, skipping");
            report.skipped += 1;
            continue;
        }

        let name = rule.name.clone();
        match store.insert_rule(rule).await {
            Ok(_) => {
                existing.insert(name);
                report.created += 1;
            }
            Err(StoreError::Conflict(_)) => {
                tracing::warn!(name = %name, "Alert rule already exists, skipping");
                report.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        invalid = report.invalid,
        "init-rules completed"
    );
    Ok(report)
}
