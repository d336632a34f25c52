//! Configuration recognized at broker construction.
//!
//! Everything else — file discovery, env var layering, a CLI — lives in the
//! surrounding service and is out of scope here, but the type itself is
//! plain `serde`-deserializable fields with `#[serde(with = "humantime_serde")]`
//! for durations, mirroring `RemoteStorageConfig` in `remote_storage`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cap on each tenant's FIFO, enforced by [`crate::tree_queue::TreeQueue::enqueue_back`].
pub const DEFAULT_MAX_TENANT_QUEUE_SIZE: usize = 1000;

/// Grace window during which a worker with zero connections still counts for
/// shuffle-sharding decisions. Zero disables the delay.
pub const DEFAULT_FORGET_DELAY: Duration = Duration::from_secs(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_max_tenant_queue_size")]
    pub max_tenant_queue_size: usize,

    #[serde(with = "humantime_serde", default = "default_forget_delay")]
    pub forget_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_tenant_queue_size: DEFAULT_MAX_TENANT_QUEUE_SIZE,
            forget_delay: DEFAULT_FORGET_DELAY,
        }
    }
}

fn default_max_tenant_queue_size() -> usize {
    DEFAULT_MAX_TENANT_QUEUE_SIZE
}

fn default_forget_delay() -> Duration {
    DEFAULT_FORGET_DELAY
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("invalid broker config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BrokerConfig {
    /// Parse a TOML fragment such as:
    ///
    /// ```toml
    /// max_tenant_queue_size = 2000
    /// forget_delay = "30s"
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigParseError> {
        Ok(toml::from_str(s)?)
    }
}
