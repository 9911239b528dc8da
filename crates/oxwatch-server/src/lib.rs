//! HTTP server, schedulers and startup wiring for the oxwatch alerting
//! service.

pub mod alerting;
pub mod api;
pub mod app;
pub mod config;
pub mod housekeeping;
pub mod logging;
pub mod rule_seed;
pub mod scheduler;
pub mod state;
