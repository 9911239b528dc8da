use crate::error::Result;
use crate::plugin::ChannelRegistry;
use crate::routing::{ChannelConfig, ChannelRoute};
use crate::NotificationChannel;
use chrono::{DateTime, Duration, Utc};
use oxwatch_common::types::{AlertEvent, Severity};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Key: (target_id, rule_id, severity)
type CooldownKey = (String, String, Severity);

/// Expired cooldown entries are swept once the map grows past this size.
const PRUNE_THRESHOLD: usize = 256;

/// Budget for one channel to accept one event.
pub const DEFAULT_SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Channels were attempted; `failed` of them reported an error.
    Delivered { attempted: usize, failed: usize },
    /// A notification for the same key went out within the cooldown.
    CoolingDown,
    /// No channel accepts this severity.
    NoRoute,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifierStats {
    pub channels: usize,
    pub delivered: u64,
    pub suppressed: u64,
    pub failed_deliveries: u64,
    pub tracked_keys: usize,
}

pub struct NotificationManager {
    channels: Vec<Arc<dyn NotificationChannel>>,
    routes: Vec<ChannelRoute>,
    cooldown: Duration,
    send_timeout: std::time::Duration,
    last_sent: Mutex<HashMap<CooldownKey, DateTime<Utc>>>,
    delivered: AtomicU64,
    suppressed: AtomicU64,
    failed_deliveries: AtomicU64,
}

impl NotificationManager {
    pub fn new(
        channels: Vec<Box<dyn NotificationChannel>>,
        routes: Vec<ChannelRoute>,
        cooldown: Duration,
    ) -> Self {
        Self {
            channels: channels.into_iter().map(Arc::from).collect(),
            routes,
            cooldown,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            last_sent: Mutex::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            failed_deliveries: AtomicU64::new(0),
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: std::time::Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Instantiates the enabled channel configs through `registry`.
    ///
    /// A `log` channel accepting every severity is added when none is
    /// configured.
    pub fn from_configs(
        registry: &ChannelRegistry,
        configs: &[ChannelConfig],
        cooldown: Duration,
    ) -> Result<Self> {
        let mut configs: Vec<ChannelConfig> = configs.iter().filter(|c| c.enabled).cloned().collect();
        if !configs.iter().any(|c| c.channel_type == "log") {
            configs.insert(0, ChannelConfig::log());
        }

        let mut channels = Vec::with_capacity(configs.len());
        let mut routes = Vec::with_capacity(configs.len());
        for (index, cfg) in configs.iter().enumerate() {
            let channel = registry.create_channel(&cfg.channel_type, &cfg.config)?;
            let redacted = registry
                .get_plugin(&cfg.channel_type)?
                .redact_config(&cfg.config);
            tracing::info!(
                channel = %cfg.channel_type,
                min_severity = %cfg.min_severity,
                config = %redacted,
                "Notification channel configured"
            );
            channels.push(channel);
            routes.push(ChannelRoute {
                min_severity: cfg.min_severity,
                channel_index: index,
            });
        }

        Ok(Self::new(channels, routes, cooldown))
    }

    fn cooldown_key(event: &AlertEvent) -> CooldownKey {
        (event.target_id.clone(), event.rule_id.clone(), event.severity)
    }

    /// Announces `event` on every channel routed for its severity, unless
    /// the same (target, rule, severity) was announced within the cooldown.
    pub async fn notify(&self, event: &AlertEvent) -> NotifyOutcome {
        self.notify_at(event, Utc::now()).await
    }

    pub(crate) async fn notify_at(&self, event: &AlertEvent, now: DateTime<Utc>) -> NotifyOutcome {
        let targets: Vec<&Arc<dyn NotificationChannel>> = self
            .routes
            .iter()
            .filter(|route| route.should_send(event.severity))
            .filter_map(|route| self.channels.get(route.channel_index))
            .collect();
        if targets.is_empty() {
            return NotifyOutcome::NoRoute;
        }

        if !self.reserve(event, now).await {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target_id = %event.target_id,
                rule_id = %event.rule_id,
                severity = %event.severity,
                "Notification suppressed (cooldown active)"
            );
            return NotifyOutcome::CoolingDown;
        }

        let failed = self.deliver(&targets, event).await;
        self.delivered.fetch_add(1, Ordering::Relaxed);

        NotifyOutcome::Delivered {
            attempted: targets.len(),
            failed,
        }
    }

    /// Sends `event` to every channel at once. Each send runs in its own task
    /// under [`Self::with_send_timeout`], so a hung or panicking channel
    /// only costs its own delivery. Returns the number of failed sends.
    async fn deliver(&self, channels: &[&Arc<dyn NotificationChannel>], event: &AlertEvent) -> usize {
        let budget = self.send_timeout;
        let mut sends = JoinSet::new();
        for channel in channels {
            let channel = Arc::clone(channel);
            let event = event.clone();
            sends.spawn(async move {
                let result = match tokio::time::timeout(budget, channel.send(&event)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {}ms", budget.as_millis())),
                };
                (channel.channel_name().to_string(), result)
            });
        }

        let mut failed = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => continue,
                Ok((channel, Err(e))) => {
                    tracing::error!(
                        channel = %channel,
                        event_id = %event.id,
                        error = %e,
                        "Failed to send notification"
                    );
                }
                Err(e) => {
                    tracing::error!(event_id = %event.id, error = %e, "Notification channel panicked");
                }
            }
            failed += 1;
            self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
        }
        failed
    }

    /// Claims the cooldown slot for the event's key. Returns false when the
    /// slot is still held.
    async fn reserve(&self, event: &AlertEvent, now: DateTime<Utc>) -> bool {
        let mut last_sent = self.last_sent.lock().await;
        if last_sent.len() > PRUNE_THRESHOLD {
            let cooldown = self.cooldown;
            last_sent.retain(|_, sent| now - *sent < cooldown);
        }

        let key = Self::cooldown_key(event);
        match last_sent.get(&key) {
            Some(sent) if now - *sent < self.cooldown => false,
            _ => {
                last_sent.insert(key, now);
                true
            }
        }
    }

    /// Notifies each event independently; one failure never affects the rest.
    /// Bounded by one send timeout per event.
    pub async fn notify_batch(&self, events: &[AlertEvent]) -> Vec<NotifyOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.notify(event).await);
        }
        outcomes
    }

    /// Forgets every cooldown entry.
    pub async fn clear_history(&self) {
        self.last_sent.lock().await.clear();
    }

    pub async fn stats(&self) -> NotifierStats {
        NotifierStats {
            channels: self.channels.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            failed_deliveries: self.failed_deliveries.load(Ordering::Relaxed),
            tracked_keys: self.last_sent.lock().await.len(),
        }
    }

    pub fn channels(&self) -> &[Arc<dyn NotificationChannel>] {
        &self.channels
    }
}
