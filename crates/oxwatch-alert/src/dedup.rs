use crate::store::EventStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Key: (rule_id, target_id)
type PairKey = (String, String);

/// Pair locks are dropped once unused and the map grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Outcome of an open-event check for one (rule, target) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// No open event exists; a new one may be written.
    Create,
    /// An open event already covers this breach.
    Continuation { open_event_id: String },
    /// The store could not answer. Creation is suppressed.
    StoreFailed,
}

impl DedupDecision {
    pub fn should_create(&self) -> bool {
        matches!(self, Self::Create)
    }
}

/// Decides whether a breach is a new alert or the continuation of an open
/// one.
///
/// Open status is always re-read from the [`EventStore`]; nothing about
/// events is cached here. The only in-process state is a per-pair async
/// lock that serializes check-then-create within this process. Concurrent
/// processes rely on the store's own uniqueness guarantee.
pub struct Deduplicator {
    events: Arc<dyn EventStore>,
    timeout: Duration,
    pair_locks: StdMutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl Deduplicator {
    pub fn new(events: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self {
            events,
            timeout,
            pair_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Acquires the critical section for a pair. Hold the guard across the
    /// check and the subsequent write.
    pub async fn lock_pair(&self, rule_id: &str, target_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .pair_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks
                .entry((rule_id.to_string(), target_id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn check(&self, rule_id: &str, target_id: &str) -> DedupDecision {
        let query = self.events.find_open_events(rule_id, target_id);
        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(open)) => match open.into_iter().next() {
                Some(event) => DedupDecision::Continuation {
                    open_event_id: event.id,
                },
                None => DedupDecision::Create,
            },
            Ok(Err(e)) => {
                tracing::warn!(
                    rule_id,
                    target_id,
                    error = %e,
                    "Open-event lookup failed, suppressing alert creation"
                );
                DedupDecision::StoreFailed
            }
            Err(_) => {
                tracing::warn!(
                    rule_id,
                    target_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Open-event lookup timed out, suppressing alert creation"
                );
                DedupDecision::StoreFailed
            }
        }
    }

    /// Fails closed: any store error reads as "already open".
    pub async fn should_create(&self, rule_id: &str, target_id: &str) -> bool {
        self.check(rule_id, target_id).await.should_create()
    }
}
