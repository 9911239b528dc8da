//! Notification delivery for newly created alert events.
//!
//! Events are routed to [`NotificationChannel`]s by severity and rate
//! limited per (target, rule, severity) key by the
//! [`manager::NotificationManager`]. Delivery is best-effort: channel
//! failures are logged and never reach the caller.

pub mod channels;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod routing;


pub use manager::{NotificationManager, NotifierStats, NotifyOutcome};
pub use routing::{ChannelConfig, ChannelRoute};

use anyhow::Result;
use async_trait::async_trait;
use oxwatch_common::types::AlertEvent;

/// A delivery channel that announces an alert event to some external sink.
///
/// Implementations are created by the matching [`plugin::ChannelPlugin`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the alert event.
    ///
    /// # Errors
    ///
    /// Returns an error when delivery failed after any retries.
    async fn send(&self, alert: &AlertEvent) -> Result<()>;

    /// Channel type name (e.g. `"log"`, `"webhook"`).
    fn channel_name(&self) -> &str;
}
