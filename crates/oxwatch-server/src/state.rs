use crate::alerting::AlertService;
use crate::config::ServerConfig;
use crate::rule_seed;
use chrono::{DateTime, Utc};
use oxwatch_alert::AlertEvaluator;
use oxwatch_notify::plugin::ChannelRegistry;
use oxwatch_notify::NotificationManager;
use oxwatch_storage::SqliteStore;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub alerts: Arc<AlertService>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Opens the store under `config.data_dir`, seeds default rules when
    /// enabled, and wires the evaluator to the configured channels.
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::open(Path::new(&config.data_dir))?);
        if config.seed_default_rules {
            rule_seed::init_default_rules(&store).await?;
        }

        let registry = ChannelRegistry::default();
        let cooldown = chrono::Duration::from_std(std::time::Duration::from_secs(
            config.notification.cooldown_secs,
        ))
        .map_err(|e| anyhow::anyhow!("notification.cooldown_secs out of range: {e}"))?;
        let notifier = NotificationManager::from_configs(
            &registry,
            &config.notification.channels,
            cooldown,
        )
        .map_err(|e| anyhow::anyhow!("Invalid notification config: {e}"))?
        .with_send_timeout(std::time::Duration::from_secs(
            config.notification.send_timeout_secs.max(1),
        ));

        let evaluator = AlertEvaluator::from_store(
            store.clone(),
            config.evaluation.evaluator_config(),
        );
        let alerts = AlertService::new(Arc::new(evaluator), Arc::new(notifier));

        Ok(Self {
            store,
            alerts: Arc::new(alerts),
            start_time: Utc::now(),
            config: Arc::new(config),
        })
    }
}
