//! Sync configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainsync_core::config::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .ignore_known_blocks(true)
//!     .index_concurrency(8)
//!     .build();
//! assert_eq!(config.index_concurrency, 8);
//! ```

use serde::{Deserialize, Serialize};

/// Satoshis per coin.
pub const COIN: u64 = 100_000_000;

/// Configuration for a [`ChainSync`](crate::sync::ChainSync) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Reject (as a warning) blocks whose hash is already stored.
    #[serde(default)]
    pub ignore_known_blocks: bool,
    /// Recompute address aggregates after each stored block.
    #[serde(default = "default_true")]
    pub index_addresses: bool,
    /// Bypass cached confirmation counts during balance recomputation.
    #[serde(default)]
    pub ignore_cache: bool,
    /// Maximum number of addresses recomputed concurrently per block.
    #[serde(default = "default_concurrency")]
    pub index_concurrency: usize,
    /// Satoshis per display unit.
    #[serde(default = "default_coin")]
    pub coin: u64,
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_coin() -> u64 {
    COIN
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ignore_known_blocks: false,
            index_addresses: true,
            ignore_cache: false,
            index_concurrency: default_concurrency(),
            coin: COIN,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }
}

/// Fluent builder for [`SyncConfig`].
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl From<SyncConfig> for SyncConfigBuilder {
    /// Start from an existing configuration, e.g. one loaded from a file.
    fn from(config: SyncConfig) -> Self {
        Self { config }
    }
}

impl SyncConfigBuilder {
    pub fn ignore_known_blocks(mut self, yes: bool) -> Self {
        self.config.ignore_known_blocks = yes;
        self
    }

    /// Enable or disable address recomputation after each block.
    pub fn index_addresses(mut self, yes: bool) -> Self {
        self.config.index_addresses = yes;
        self
    }

    pub fn ignore_cache(mut self, yes: bool) -> Self {
        self.config.ignore_cache = yes;
        self
    }

    /// Set the per-block address recomputation fan-out (minimum 1).
    pub fn index_concurrency(mut self, n: usize) -> Self {
        self.config.index_concurrency = n.max(1);
        self
    }

    pub fn coin(mut self, sat_per_coin: u64) -> Self {
        self.config.coin = sat_per_coin;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SyncConfig::default();
        assert!(cfg.index_addresses);
        assert!(!cfg.ignore_known_blocks);
        assert_eq!(cfg.coin, 100_000_000);
    }

    #[test]
    fn builder_custom() {
        let cfg = SyncConfig::builder()
            .index_addresses(false)
            .index_concurrency(0)
            .coin(1_000)
            .build();
        assert!(!cfg.index_addresses);
        assert_eq!(cfg.index_concurrency, 1);
        assert_eq!(cfg.coin, 1_000);
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"ignore_cache":true}"#).unwrap();
        assert!(cfg.ignore_cache);
        assert!(cfg.index_addresses);
        assert_eq!(cfg.index_concurrency, 4);
    }
}
