//! Domain types shared by the oxwatch crates: rules, metric samples, alert
//! events, and the snowflake id generator used to key them.

pub mod id;
pub mod types;
