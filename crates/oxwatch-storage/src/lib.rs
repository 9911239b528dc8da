//! SQLite persistence for targets, alert rules, metric samples and alert
//! events.
//!
//! [`engine::SqliteStore`] implements every collaborator trait the alert
//! engine consumes ([`RuleStore`](oxwatch_alert::RuleStore),
//! [`MetricSource`](oxwatch_alert::MetricSource),
//! [`EventStore`](oxwatch_alert::EventStore),
//! [`TargetDirectory`](oxwatch_alert::TargetDirectory)). Blocking SQLite
//! calls run on tokio's blocking pool.

pub mod alert_store;
pub mod engine;


pub use engine::{SqliteStore, StoreStats};
