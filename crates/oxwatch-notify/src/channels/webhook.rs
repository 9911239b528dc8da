use crate::channels::{backoff, MAX_ATTEMPTS};
use crate::error::{NotifyError, Result};
use crate::plugin::{parse_config, ChannelPlugin};
use crate::NotificationChannel;
use async_trait::async_trait;
use oxwatch_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::Value;

/// POSTs a JSON document per alert to a fixed URL.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    body_template: Option<String>,
}

impl WebhookChannel {
    pub fn new(url: &str, body_template: Option<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            body_template,
        })
    }

    pub(crate) fn render_body(&self, alert: &AlertEvent) -> String {
        match &self.body_template {
            Some(template) => template
                .replace("{{event_id}}", &alert.id)
                .replace("{{target_id}}", &alert.target_id)
                .replace("{{rule_name}}", &alert.rule_name)
                .replace("{{metric}}", &alert.metric)
                .replace("{{value}}", &format!("{:.2}", alert.triggered_value))
                .replace("{{threshold}}", &format!("{:.2}", alert.threshold))
                .replace("{{severity}}", &alert.severity.to_string())
                .replace("{{summary}}", &alert.summary)
                .replace("{{started_at}}", &alert.started_at.to_rfc3339()),
            None => serde_json::json!({
                "event_id": alert.id,
                "rule_id": alert.rule_id,
                "rule_name": alert.rule_name,
                "target_id": alert.target_id,
                "metric": alert.metric,
                "severity": alert.severity,
                "status": alert.status,
                "value": alert.triggered_value,
                "threshold": alert.threshold,
                "summary": alert.summary,
                "started_at": alert.started_at.to_rfc3339(),
            })
            .to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, alert: &AlertEvent) -> anyhow::Result<()> {
        let body = self.render_body(alert);
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            match self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(attempt = attempt + 1, status = %status, "Webhook returned non-success status");
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Webhook send failed");
                    last_err = Some(e.into());
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("webhook not attempted"))
            .context(format!("webhook {} failed after {MAX_ATTEMPTS} attempts", self.url)))
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    body_template: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: WebhookConfig = parse_config("webhook", config)?;
        if !(cfg.url.starts_with("http://") || cfg.url.starts_with("https://")) {
            return Err(NotifyError::InvalidConfig(format!(
                "webhook: url must be http(s), got '{}'",
                cfg.url
            )));
        }
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let cfg: WebhookConfig = parse_config("webhook", config)?;
        let channel = WebhookChannel::new(
            &cfg.url,
            cfg.body_template,
            std::time::Duration::from_secs(cfg.timeout_secs),
        )
        .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(Box::new(channel))
    }

    fn redact_config(&self, config: &Value) -> Value {
        // Webhook URLs frequently embed access tokens in the query string.
        let mut redacted = config.clone();
        if let Some(url) = redacted.get_mut("url") {
            if let Some((base, _)) = url.as_str().and_then(|u| u.split_once('?')) {
                *url = Value::String(format!("{base}?***"));
            }
        }
        redacted
    }
}
