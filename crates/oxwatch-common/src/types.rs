use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known metric names carried by a [`MetricSample`].
pub mod metric {
    pub const CPU_USAGE: &str = "cpu_usage";
    pub const MEMORY_USAGE: &str = "memory_usage";
    pub const DISK_USAGE: &str = "disk_usage";
    pub const NETWORK_IN: &str = "network_in";
    pub const NETWORK_OUT: &str = "network_out";
    pub const LOAD_AVG: &str = "load_avg";
    pub const TEMPERATURE: &str = "temperature";

    pub const ALL: &[&str] = &[
        CPU_USAGE,
        MEMORY_USAGE,
        DISK_USAGE,
        NETWORK_IN,
        NETWORK_OUT,
        LOAD_AVG,
        TEMPERATURE,
    ];
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use oxwatch_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Threshold comparison operator. Each variant maps to one pure numeric
/// predicate; `==` and `!=` use exact floating-point equality.
///
/// # Examples
///
/// ```
/// use oxwatch_common::types::Comparator;
///
/// let op: Comparator = ">=".parse().unwrap();
/// assert!(op.check(80.0, 80.0));
/// assert_eq!(op.to_string(), ">=");
/// assert!("=>".parse::<Comparator>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub enum Comparator {
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparator {
    pub const ALL: [Comparator; 6] = [
        Comparator::GreaterEqual,
        Comparator::GreaterThan,
        Comparator::LessEqual,
        Comparator::LessThan,
        Comparator::Equal,
        Comparator::NotEqual,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Self::GreaterEqual => ">=",
            Self::GreaterThan => ">",
            Self::LessEqual => "<=",
            Self::LessThan => "<",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }

    #[allow(clippy::float_cmp)]
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterEqual => value >= threshold,
            Self::GreaterThan => value > threshold,
            Self::LessEqual => value <= threshold,
            Self::LessThan => value < threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.symbol() == s.trim())
            .ok_or_else(|| format!("unknown comparator: {s}"))
    }
}

/// A monitored host.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A validated threshold rule as held by the rule store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Metric key looked up in [`MetricSample::values`] (e.g. `cpu_usage`).
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Minimum time the condition must hold before the rule fires.
    pub duration_secs: u64,
    pub severity: Severity,
    pub enabled: bool,
    /// Target scope: `*`, a glob such as `web-*`, or an exact target id.
    pub target_pattern: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Unvalidated rule input, as received from the API or a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RuleDraft {
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub metric: Option<String>,
    pub comparator: Option<String>,
    pub threshold: Option<f64>,
    pub duration_secs: Option<i64>,
    pub severity: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub target_pattern: Option<String>,
}

/// A rule that has passed validation and is ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub description: Option<String>,
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
    pub duration_secs: u64,
    pub severity: Severity,
    pub enabled: bool,
    pub target_pattern: String,
}

/// One snapshot of a target's metrics. Metrics absent from `values` are
/// unavailable for this sample.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MetricSample {
    pub id: String,
    pub target_id: String,
    pub collected_at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl MetricSample {
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Lifecycle of an alert event. Transitions only move forward:
/// `firing -> acknowledged -> resolved` (acknowledgement is optional).
///
/// # Examples
///
/// ```
/// use oxwatch_common::types::AlertStatus;
///
/// assert!(AlertStatus::Firing.can_transition_to(AlertStatus::Resolved));
/// assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Firing));
/// assert!(AlertStatus::Acknowledged.is_open());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Unresolved events count as open for deduplication.
    pub fn is_open(self) -> bool {
        self != Self::Resolved
    }

    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        next > self
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(Self::Firing),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// One firing episode of a rule against a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub target_id: String,
    pub metric: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub started_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Metric value that caused the rule to fire.
    pub triggered_value: f64,
    pub threshold: f64,
    pub summary: String,
}

/// An alert event before the event store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertEvent {
    pub rule_id: String,
    pub rule_name: String,
    pub target_id: String,
    pub metric: String,
    pub severity: Severity,
    pub started_at: DateTime<Utc>,
    pub triggered_value: f64,
    pub threshold: f64,
    pub summary: String,
}

impl NewAlertEvent {
    /// Builds a firing event for `rule` on `target_id`.
    pub fn firing(rule: &AlertRule, target_id: &str, value: f64, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            target_id: target_id.to_string(),
            metric: rule.metric.clone(),
            severity: rule.severity,
            started_at: now,
            triggered_value: value,
            threshold: rule.threshold,
            summary: format!("{} triggered on target {target_id}", rule.name),
        }
    }

    pub fn into_event(self, id: String) -> AlertEvent {
        AlertEvent {
            id,
            rule_id: self.rule_id,
            rule_name: self.rule_name,
            target_id: self.target_id,
            metric: self.metric,
            severity: self.severity,
            status: AlertStatus::Firing,
            started_at: self.started_at,
            acknowledged_at: None,
            resolved_at: None,
            triggered_value: self.triggered_value,
            threshold: self.threshold,
            summary: self.summary,
        }
    }
}
