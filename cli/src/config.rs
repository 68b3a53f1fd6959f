//! JSON config file for `chainsync follow`.
//!
//! ```json
//! {
//!   "rpc":      { "url": "http://127.0.0.1:8332", "user": "u", "password": "p" },
//!   "sync":     { "index_concurrency": 8 },
//!   "follower": { "poll_interval_ms": 2000, "max_backfill": 5000 },
//!   "log":      { "level": "info", "targets": { "chainsync_core": "debug" } }
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use chainsync_core::SyncConfig;
use chainsync_node::{FollowerConfig, RpcConfig};

use crate::logging::LogConfig;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8332";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub rpc: Option<RpcConfig>,
    pub sync: SyncConfig,
    pub follower: FollowerConfig,
    pub log: LogConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = FileConfig::parse(
            r#"{"rpc": {"url": "http://node:8332"}, "follower": {"max_backfill": 10}}"#,
        )
        .unwrap();
        let rpc = cfg.rpc.unwrap();
        assert_eq!(rpc.url, "http://node:8332");
        assert!(rpc.user.is_none());
        assert_eq!(rpc.retry.max_retries, 3);
        assert_eq!(cfg.follower.max_backfill, 10);
        assert_eq!(cfg.follower.poll_interval_ms, 5_000);
        assert!(cfg.sync.index_addresses);
    }

    #[test]
    fn empty_object_is_default() {
        let cfg = FileConfig::parse("{}").unwrap();
        assert!(cfg.rpc.is_none());
        assert_eq!(cfg.sync.index_concurrency, 4);
        assert_eq!(cfg.log.directives(), "info");
    }

    #[test]
    fn log_section_sets_levels_and_format() {
        let cfg = FileConfig::parse(
            r#"{"log": {"level": "debug", "targets": {"reqwest": "warn"}, "json": true}}"#,
        )
        .unwrap();
        assert!(cfg.log.json);
        assert_eq!(cfg.log.directives(), "debug,reqwest=warn");
    }
}
