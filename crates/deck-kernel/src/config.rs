use deck_store::StoreConfig;
use deck_stream::StreamConfig;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Kernel configuration, loadable from TOML.
///
/// ```toml
/// patch_lock_retries = 20
///
/// [store]
/// max_slug_length = 128
///
/// [stream]
/// subscriber_capacity = 256
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub store: StoreConfig,
    pub stream: StreamConfig,
    /// Attempts at taking a card's lock before a patch gives up.
    pub patch_lock_retries: u32,
    /// Delay between lock attempts, doubled after each failure.
    pub patch_lock_backoff_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            stream: StreamConfig::default(),
            patch_lock_retries: 10,
            patch_lock_backoff_ms: 5,
        }
    }
}

impl KernelConfig {
    pub fn from_toml_str(source: &str) -> KernelResult<Self> {
        toml::from_str(source).map_err(|e| KernelError::Config(e.to_string()))
    }
}
