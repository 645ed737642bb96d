//! Advisory locks keyed by string.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use deck_types::ElementId;
use tracing::debug;

#[derive(Clone, Debug)]
struct LockEntry {
    owner: ElementId,
    acquired_at: DateTime<Utc>,
}

/// Exclusive, expiring ownership of string keys.
///
/// A lock is stale once `acquired_at <= reference - stale_after`, where the
/// reference is the caller's `reference_time` or the current time. Stale
/// locks are taken over by any owner. An active lock cannot be acquired
/// again, not even by its own owner.
#[derive(Debug)]
pub struct LockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
    stale_after: Duration,
}

impl LockTable {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    /// Try to acquire `key`. Returns the key on success, `None` when it is
    /// held by an active lock.
    pub fn lock(
        &self,
        owner: &ElementId,
        key: &str,
        reference_time: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let now = Utc::now();
        let cutoff = reference_time.unwrap_or(now) - self.stale_after;
        let mut entries = self.entries.lock().expect("lock table poisoned");
        if let Some(current) = entries.get(key) {
            if current.acquired_at > cutoff {
                debug!(key, owner = %owner, holder = %current.owner, "lock contended");
                return None;
            }
            debug!(key, owner = %owner, previous = %current.owner, "taking over stale lock");
        }
        entries.insert(
            key.to_string(),
            LockEntry {
                owner: *owner,
                acquired_at: now,
            },
        );
        Some(key.to_string())
    }

    /// Release `key`. Only the current owner can release it.
    pub fn unlock(&self, owner: &ElementId, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        match entries.get(key) {
            Some(current) if current.owner == *owner => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Current holder of `key`, stale or not.
    #[cfg(test)]
    fn holder(&self, key: &str) -> Option<ElementId> {
        self.entries
            .lock()
            .expect("lock table poisoned")
            .get(key)
            .map(|entry| entry.owner)
    }
}
