use crate::error::{NotifyError, Result};
use crate::NotificationChannel;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// Factory for [`NotificationChannel`] instances built from JSON
/// configuration.
pub trait ChannelPlugin: Send + Sync {
    /// Plugin type name (e.g. `"email"`, `"webhook"`).
    fn name(&self) -> &str;

    fn validate_config(&self, config: &Value) -> Result<()>;

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>>;

    /// Returns `config` with secrets replaced by `"***"`, for logs.
    fn redact_config(&self, config: &Value) -> Value {
        config.clone()
    }
}

/// Parses a plugin config blob, tagging errors with the plugin name.
pub(crate) fn parse_config<T: DeserializeOwned>(plugin: &str, config: &Value) -> Result<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("{plugin}: {e}")))
}

/// Registry of available [`ChannelPlugin`]s.
///
/// # Examples
///
/// ```
/// use oxwatch_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin("log"));
/// assert!(registry.has_plugin("email"));
/// assert!(registry.has_plugin("webhook"));
/// assert!(!registry.has_plugin("pager"));
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<String, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn create_channel(&self, type_name: &str, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let plugin = self.get_plugin(type_name)?;
        plugin.validate_config(config)?;
        plugin.create_channel(config)
    }

    pub fn get_plugin(&self, type_name: &str) -> Result<&dyn ChannelPlugin> {
        self.plugins
            .get(type_name)
            .map(|p| p.as_ref())
            .ok_or_else(|| NotifyError::UnknownChannelType(type_name.to_string()))
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::log::LogPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry
    }
}
