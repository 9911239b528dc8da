use crate::channels::{backoff, MAX_ATTEMPTS};
use crate::error::{NotifyError, Result};
use crate::plugin::{parse_config, ChannelPlugin};
use crate::NotificationChannel;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use oxwatch_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::Value;

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        to: &[String],
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
            .port(smtp_port)
            .timeout(Some(timeout));
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let to = to
            .iter()
            .map(|addr| addr.parse::<Mailbox>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            transport: builder.build(),
            from: from.parse()?,
            to,
        })
    }

    fn subject(alert: &AlertEvent) -> String {
        format!(
            "[oxwatch][{}] {} - {}",
            alert.severity, alert.rule_name, alert.target_id
        )
    }

    fn format_body(alert: &AlertEvent) -> String {
        format!(
            "Alert: {severity}\nRule: {rule}\nTarget: {target}\nMetric: {metric}\nValue: {value:.2}\nThreshold: {threshold:.2}\nSummary: {summary}\nStarted: {started}",
            severity = alert.severity,
            rule = alert.rule_name,
            target = alert.target_id,
            metric = alert.metric,
            value = alert.triggered_value,
            threshold = alert.threshold,
            summary = alert.summary,
            started = alert.started_at.to_rfc3339(),
        )
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, alert: &AlertEvent) -> anyhow::Result<()> {
        let subject = Self::subject(alert);
        let body = Self::format_body(alert);
        let mut failed = Vec::new();

        for recipient in &self.to {
            let email = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())?;

            let mut last_err = None;
            for attempt in 0..MAX_ATTEMPTS {
                match self.transport.send(email.clone()).await {
                    Ok(_) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt = attempt + 1,
                            recipient = %recipient,
                            error = %e,
                            "Email send failed"
                        );
                        last_err = Some(e);
                        if attempt + 1 < MAX_ATTEMPTS {
                            tokio::time::sleep(backoff(attempt)).await;
                        }
                    }
                }
            }

            if let Some(e) = last_err {
                tracing::error!(recipient = %recipient, error = %e, "Email undeliverable");
                failed.push(recipient.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("email undeliverable to {}", failed.join(", ")))
        }
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
    to: Vec<String>,
    /// Per-command SMTP timeout.
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: EmailConfig = parse_config("email", config)?;
        if cfg.to.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "email: at least one recipient is required".to_string(),
            ));
        }
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let cfg: EmailConfig = parse_config("email", config)?;
        let channel = EmailChannel::new(
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
            &cfg.to,
            std::time::Duration::from_secs(cfg.timeout_secs.max(1)),
        )
        .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(Box::new(channel))
    }

    fn redact_config(&self, config: &Value) -> Value {
        let mut redacted = config.clone();
        if let Some(obj) = redacted.as_object_mut() {
            if obj.contains_key("smtp_password") {
                obj.insert("smtp_password".to_string(), Value::String("***".to_string()));
            }
        }
        redacted
    }
}
