use oxwatch_common::types::Severity;
use serde::{Deserialize, Serialize};

pub struct ChannelRoute {
    pub min_severity: Severity,
    pub channel_index: usize,
}

impl ChannelRoute {
    pub fn should_send(&self, event_severity: Severity) -> bool {
        event_severity >= self.min_severity
    }
}

/// One configured channel instance, as read from the server config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_type: String,
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
}

fn default_min_severity() -> Severity {
    Severity::Low
}

fn default_enabled() -> bool {
    true
}

fn default_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ChannelConfig {
    /// The always-present log channel.
    pub fn log() -> Self {
        Self {
            channel_type: "log".to_string(),
            min_severity: Severity::Low,
            enabled: true,
            config: default_config(),
        }
    }
}
