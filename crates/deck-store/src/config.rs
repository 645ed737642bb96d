use serde::{Deserialize, Serialize};

/// Configuration for a storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Longest accepted slug.
    pub max_slug_length: usize,
    /// Seconds after which an advisory lock may be taken over.
    pub lock_stale_after_secs: u64,
    /// Capacity of the shared change broadcast channel.
    pub change_channel_capacity: usize,
    /// Most entries the element cache holds before it evicts.
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_slug_length: deck_types::DEFAULT_MAX_SLUG_LENGTH,
            lock_stale_after_secs: 300,
            change_channel_capacity: 4096,
            cache_capacity: deck_cache::DEFAULT_CAPACITY,
        }
    }
}
