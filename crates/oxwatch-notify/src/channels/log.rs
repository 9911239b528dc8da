use crate::error::Result;
use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use async_trait::async_trait;
use oxwatch_common::types::AlertEvent;
use serde_json::Value;

/// Writes one structured warn line per alert.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, alert: &AlertEvent) -> anyhow::Result<()> {
        tracing::warn!(
            event_id = %alert.id,
            rule_id = %alert.rule_id,
            rule_name = %alert.rule_name,
            target_id = %alert.target_id,
            metric = %alert.metric,
            severity = %alert.severity,
            value = alert.triggered_value,
            threshold = alert.threshold,
            started_at = %alert.started_at.to_rfc3339(),
            "ALERT {}",
            alert.summary
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

pub struct LogPlugin;

impl ChannelPlugin for LogPlugin {
    fn name(&self) -> &str {
        "log"
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    fn create_channel(&self, _config: &Value) -> Result<Box<dyn NotificationChannel>> {
        Ok(Box::new(LogChannel))
    }
}
