use oxwatch_alert::EvaluatorConfig;
use oxwatch_common::types::RuleDraft;
use oxwatch_notify::ChannelConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Metric samples older than this are deleted by housekeeping.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Resolved alert events older than this are deleted by housekeeping.
    #[serde(default = "default_retention_days")]
    pub resolved_retention_days: u32,
    /// Install the default rule set when the rule table is empty.
    #[serde(default = "default_true")]
    pub seed_default_rules: bool,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_evaluation_tick_secs")]
    pub tick_secs: u64,
    /// A latest sample older than this is logged as stale.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_target_timeout_secs")]
    pub target_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long shutdown waits for an in-flight cycle before abandoning it.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_evaluation_tick_secs(),
            staleness_secs: default_staleness_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            target_timeout_secs: default_target_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl EvaluationConfig {
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            staleness: Duration::from_secs(self.staleness_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs.max(1)),
            target_timeout: Duration::from_secs(self.target_timeout_secs.max(1)),
            max_concurrent: self.max_concurrent.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_housekeeping_tick_secs")]
    pub tick_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_housekeeping_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Minimum interval between notifications for one (target, rule, severity).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Budget for one channel to deliver one event.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            channels: Vec::new(),
        }
    }
}

// ---- Rules seed file (used by the `init-rules` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<RuleDraft>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

fn default_evaluation_tick_secs() -> u64 {
    30
}

fn default_staleness_secs() -> u64 {
    300
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_target_timeout_secs() -> u64 {
    15
}

fn default_max_concurrent() -> usize {
    8
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_housekeeping_tick_secs() -> u64 {
    3600
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_send_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            resolved_retention_days: default_retention_days(),
            seed_default_rules: true,
            evaluation: EvaluationConfig::default(),
            housekeeping: HousekeepingConfig::default(),
            notification: NotificationConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{path}': {e}"))?;
        Self::parse(&content).map_err(|e| anyhow::anyhow!("Failed to parse config '{path}': {e}"))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
