//! Built-in notification channels.

pub mod email;
pub mod log;
pub mod webhook;

/// Attempts per delivery before giving up.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff between attempts: 100ms, 200ms, ...
pub(crate) fn backoff(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis(100 * 2u64.pow(attempt))
}
