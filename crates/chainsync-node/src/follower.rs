//! Tip follower: polls the node for its best block and feeds it to
//! [`ChainSync`], backfilling unknown ancestry on `NEED_SYNC`.
//!
//! # Live
//! Every `poll_interval_ms`:
//!   - ask the node for its best block hash
//!   - fetch the block and its transactions, store the transactions
//!   - store the block as the new tip (reorgs allowed)
//!
//! # Backfill
//! When the tip's predecessor is unknown, or is stored but could not be
//! connected, walk `prev` links on the node until a main-chain block (or
//! genesis) is reached, replay the missing blocks oldest first, then retry
//! the tip once. A replay that starts at the current tip (or on an empty
//! index) places blocks directly. A replay that forks below the tip appends
//! them unplaced and the tip store resolves their canonical position.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chainsync_core::types::is_genesis_marker;
use chainsync_core::{
    Block, BlockStore, ChainSync, NodeFeed, StoreOutcome, SyncError, TransactionStore, TxInfo,
};

/// Polling settings for [`TipFollower`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowerConfig {
    pub poll_interval_ms: u64,
    /// Upper bound on blocks fetched in one backfill walk.
    pub max_backfill: usize,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_backfill: 1_000,
        }
    }
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEvent {
    /// The node's tip has not moved.
    Idle,
    TipStored {
        hash: String,
        height: Option<u64>,
        reorg: bool,
    },
    Ignored { hash: String, reason: String },
    /// Missing ancestry was replayed before storing the tip.
    Backfilled {
        hash: String,
        replayed: usize,
        height: Option<u64>,
    },
}

/// Progress counters, for status output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FollowerStatus {
    pub last_hash: Option<String>,
    pub last_height: Option<u64>,
    pub blocks_stored: u64,
    pub last_block_time: Option<DateTime<Utc>>,
    pub last_stored_at: Option<DateTime<Utc>>,
}

pub struct TipFollower {
    feed: Arc<dyn NodeFeed>,
    sync: Arc<ChainSync>,
    blocks: Arc<dyn BlockStore>,
    txs: Arc<dyn TransactionStore>,
    config: FollowerConfig,
    status: FollowerStatus,
}

impl TipFollower {
    pub fn new(
        feed: Arc<dyn NodeFeed>,
        sync: Arc<ChainSync>,
        blocks: Arc<dyn BlockStore>,
        txs: Arc<dyn TransactionStore>,
        config: FollowerConfig,
    ) -> Self {
        Self {
            feed,
            sync,
            blocks,
            txs,
            config,
            status: FollowerStatus::default(),
        }
    }

    pub fn status(&self) -> &FollowerStatus {
        &self.status
    }

    /// Poll forever. Errors are logged and the next poll proceeds.
    pub async fn run(&mut self) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        tracing::info!(
            sync = self.sync.id(),
            poll_ms = self.config.poll_interval_ms,
            max_backfill = self.config.max_backfill,
            "Following node tip"
        );

        loop {
            match self.poll_once().await {
                Ok(FollowEvent::Idle) => {}
                Ok(event) => tracing::debug!(?event, "Poll complete"),
                Err(e) if e.is_fatal_resolution() => {
                    tracing::error!(error = %e, "Reorg resolution failed")
                }
                Err(e) => tracing::warn!(error = %e, "Poll failed"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Run a single poll.
    pub async fn poll_once(&mut self) -> Result<FollowEvent, SyncError> {
        let best = self.feed.best_block_hash().await?;
        if self.status.last_hash.as_deref() == Some(best.as_str()) {
            return Ok(FollowEvent::Idle);
        }

        let block = self.fetch_block(&best).await?;
        match self.ingest(&block, true).await {
            Ok(outcome) => Ok(self.record(&block, outcome)),
            Err(e @ (SyncError::NeedSync { .. } | SyncError::ConfluenceNotFound(_))) => {
                tracing::info!(
                    hash = %block.hash,
                    previous = %block.previous_hash,
                    reason = %e,
                    "Unplaced ancestry, backfilling"
                );
                let replayed = self.backfill(&block.previous_hash).await?;
                let outcome = self.ingest(&block, true).await?;
                match self.record(&block, outcome) {
                    FollowEvent::TipStored { hash, height, .. } => Ok(FollowEvent::Backfilled {
                        hash,
                        replayed,
                        height,
                    }),
                    other => Ok(other),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn backfill(&mut self, previous: &str) -> Result<usize, SyncError> {
        let mut missing: Vec<Block> = Vec::new();
        let mut cursor = previous.to_string();
        while !is_genesis_marker(&cursor) && self.blocks.height(&cursor).await?.is_none() {
            if missing.len() >= self.config.max_backfill {
                return Err(SyncError::Other(format!(
                    "backfill exceeded {} blocks before reaching a main-chain block (at {cursor})",
                    self.config.max_backfill
                )));
            }
            let block = self.fetch_block(&cursor).await?;
            cursor = block.previous_hash.clone();
            missing.push(block);
        }

        // Blocks extending the current tip (or an empty index) are placed as
        // they arrive; a branch forking lower down waits for the tip store.
        let tip = self.blocks.tip().await?;
        let place = match (&tip, missing.last()) {
            (None, _) => true,
            (Some(tip), Some(oldest)) => oldest.previous_hash == tip.hash,
            (Some(_), None) => false,
        };
        let replayed = missing.len();
        for block in missing.iter().rev() {
            let outcome = self.ingest(block, place).await?;
            if matches!(outcome, StoreOutcome::Stored { .. }) {
                self.status.blocks_stored += 1;
            }
        }
        tracing::info!(replayed, placed = place, "Backfill complete");
        Ok(replayed)
    }

    /// Store a block's transactions, then the block itself.
    async fn ingest(&self, block: &Block, allow_reorgs: bool) -> Result<StoreOutcome, SyncError> {
        for txid in &block.tx {
            match self.feed.transaction(txid).await? {
                Some(mut tx) => {
                    tx.blockhash = Some(block.hash.clone());
                    self.resolve_inputs(&mut tx).await?;
                    self.sync.store_tx(&tx).await?;
                }
                None => tracing::warn!(%txid, block = %block.hash, "Transaction not found on node"),
            }
        }
        self.sync.store_tip_block(block, allow_reorgs).await
    }

    /// Fill in source address and value of inputs whose funding output is
    /// already stored.
    async fn resolve_inputs(&self, tx: &mut TxInfo) -> Result<(), SyncError> {
        for input in tx.vin.iter_mut().filter(|i| i.addr.is_none()) {
            let (Some(txid), Some(vout)) = (input.txid.as_deref(), input.vout) else {
                continue;
            };
            let Some(funding) = self.txs.from_id_with_info(txid).await? else {
                continue;
            };
            if let Some(out) = funding.vout.iter().find(|o| o.n == vout) {
                input.addr = out.addresses.first().cloned();
                input.value_sat.get_or_insert(out.value_sat);
            }
        }
        Ok(())
    }

    async fn fetch_block(&self, hash: &str) -> Result<Block, SyncError> {
        self.feed
            .block(hash)
            .await?
            .ok_or_else(|| SyncError::BlockNotFound(hash.to_string()))
    }

    fn record(&mut self, block: &Block, outcome: StoreOutcome) -> FollowEvent {
        self.status.last_hash = Some(block.hash.clone());
        match outcome {
            StoreOutcome::Stored { height, reorg, .. } => {
                self.status.last_height = height;
                self.status.blocks_stored += 1;
                self.status.last_block_time = DateTime::from_timestamp(block.time, 0);
                self.status.last_stored_at = Some(Utc::now());
                FollowEvent::TipStored {
                    hash: block.hash.clone(),
                    height,
                    reorg: reorg.is_some(),
                }
            }
            StoreOutcome::Ignored { reason } => FollowEvent::Ignored {
                hash: block.hash.clone(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chainsync_core::types::{TxInput, TxOutput, GENESIS_PREV};
    use chainsync_core::SyncConfig;
    use chainsync_storage::{MemoryBlockStore, MemoryTransactionStore};

    /// A node whose chain and tip are set by the test.
    #[derive(Default)]
    struct ScriptedFeed {
        blocks: Mutex<HashMap<String, Block>>,
        txs: Mutex<HashMap<String, TxInfo>>,
        best: Mutex<String>,
    }

    impl ScriptedFeed {
        fn push(&self, hash: &str, prev: &str) {
            self.push_block(Block::new(hash, prev));
        }

        fn push_block(&self, block: Block) {
            *self.best.lock().unwrap() = block.hash.clone();
            self.blocks.lock().unwrap().insert(block.hash.clone(), block);
        }

        fn push_tx(&self, tx: TxInfo) {
            self.txs.lock().unwrap().insert(tx.txid.clone(), tx);
        }
    }

    #[async_trait]
    impl NodeFeed for ScriptedFeed {
        async fn best_block_hash(&self) -> Result<String, SyncError> {
            Ok(self.best.lock().unwrap().clone())
        }

        async fn block(&self, hash: &str) -> Result<Option<Block>, SyncError> {
            Ok(self.blocks.lock().unwrap().get(hash).cloned())
        }

        async fn transaction(&self, txid: &str) -> Result<Option<TxInfo>, SyncError> {
            Ok(self.txs.lock().unwrap().get(txid).cloned())
        }

        async fn send_raw_transaction(&self, _raw_hex: &str) -> Result<String, SyncError> {
            Err(SyncError::Feed("read-only".into()))
        }
    }

    struct Harness {
        feed: Arc<ScriptedFeed>,
        blocks: Arc<MemoryBlockStore>,
        txs: Arc<MemoryTransactionStore>,
        sync: Arc<ChainSync>,
        follower: TipFollower,
    }

    fn harness(max_backfill: usize) -> Harness {
        let feed = Arc::new(ScriptedFeed::default());
        let blocks = Arc::new(MemoryBlockStore::new());
        let txs = Arc::new(MemoryTransactionStore::new());
        let config = SyncConfig::builder().index_addresses(false).build();
        let sync = Arc::new(ChainSync::new(blocks.clone(), txs.clone(), config));
        let follower = TipFollower::new(
            feed.clone(),
            sync.clone(),
            blocks.clone(),
            txs.clone(),
            FollowerConfig {
                poll_interval_ms: 10,
                max_backfill,
            },
        );
        Harness {
            feed,
            blocks,
            txs,
            sync,
            follower,
        }
    }

    #[tokio::test]
    async fn empty_index_backfills_from_genesis() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);
        h.feed.push("g1", "g0");
        h.feed.push("g2", "g1");
        h.feed.push("g3", "g2");

        let event = h.follower.poll_once().await.unwrap();
        assert_eq!(
            event,
            FollowEvent::Backfilled {
                hash: "g3".into(),
                replayed: 3,
                height: Some(3),
            }
        );
        for (i, hash) in ["g0", "g1", "g2", "g3"].iter().enumerate() {
            assert_eq!(h.blocks.height(hash).await.unwrap(), Some(i as u64));
        }
        assert_eq!(h.follower.status().blocks_stored, 4);
    }

    #[tokio::test]
    async fn unchanged_tip_is_idle() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);

        let first = h.follower.poll_once().await.unwrap();
        assert!(matches!(first, FollowEvent::TipStored { height: Some(0), .. }));
        assert_eq!(h.follower.poll_once().await.unwrap(), FollowEvent::Idle);

        h.feed.push("g1", "g0");
        let next = h.follower.poll_once().await.unwrap();
        assert_eq!(
            next,
            FollowEvent::TipStored {
                hash: "g1".into(),
                height: Some(1),
                reorg: false,
            }
        );
        assert_eq!(h.follower.status().last_height, Some(1));
    }

    #[tokio::test]
    async fn fork_with_unknown_ancestry_is_backfilled_and_reorged() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);
        h.feed.push("g1", "g0");
        h.feed.push("g2", "g1");
        h.feed.push("g3", "g2");
        h.follower.poll_once().await.unwrap();

        // competing branch forking after g1
        h.feed.push("h2", "g1");
        h.feed.push("h3", "h2");
        let event = h.follower.poll_once().await.unwrap();
        assert_eq!(
            event,
            FollowEvent::Backfilled {
                hash: "h3".into(),
                replayed: 1,
                height: Some(3),
            }
        );

        assert_eq!(h.blocks.height("h2").await.unwrap(), Some(2));
        assert_eq!(h.blocks.height("g2").await.unwrap(), None);
        assert_eq!(h.blocks.height("g3").await.unwrap(), None);
        assert_eq!(h.blocks.next("g1").await.unwrap().as_deref(), Some("h2"));
        assert_eq!(h.blocks.tip().await.unwrap().unwrap().hash, "h3");
    }

    #[tokio::test]
    async fn gap_above_genesis_tip_is_placed() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);
        h.follower.poll_once().await.unwrap();

        // node moved two blocks while we were not polling
        h.feed.push("g1", "g0");
        h.feed.push("g2", "g1");
        let event = h.follower.poll_once().await.unwrap();
        assert_eq!(
            event,
            FollowEvent::Backfilled {
                hash: "g2".into(),
                replayed: 1,
                height: Some(2),
            }
        );
        assert_eq!(h.blocks.height("g1").await.unwrap(), Some(1));
        assert_eq!(h.blocks.next("g0").await.unwrap().as_deref(), Some("g1"));
        assert_eq!(h.blocks.tip().await.unwrap().unwrap().hash, "g2");
    }

    #[tokio::test]
    async fn gap_above_deeper_tip_is_placed() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);
        h.feed.push("g1", "g0");
        h.follower.poll_once().await.unwrap();

        for (hash, prev) in [("g2", "g1"), ("g3", "g2"), ("g4", "g3")] {
            h.feed.push(hash, prev);
        }
        let event = h.follower.poll_once().await.unwrap();
        assert_eq!(
            event,
            FollowEvent::Backfilled {
                hash: "g4".into(),
                replayed: 2,
                height: Some(4),
            }
        );
        assert_eq!(h.blocks.height("g3").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn unplaced_ancestor_left_by_earlier_replay_is_recovered() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);
        h.follower.poll_once().await.unwrap();

        // g1 is known but unplaced, so g2 cannot find a confluence above genesis
        h.sync
            .store_tip_block(&Block::new("g1", "g0"), false)
            .await
            .unwrap();
        h.feed.push("g1", "g0");
        h.feed.push("g2", "g1");

        let event = h.follower.poll_once().await.unwrap();
        assert_eq!(
            event,
            FollowEvent::Backfilled {
                hash: "g2".into(),
                replayed: 1,
                height: Some(2),
            }
        );
        assert_eq!(h.blocks.height("g1").await.unwrap(), Some(1));
        assert_eq!(h.blocks.tip().await.unwrap().unwrap().hash, "g2");
    }

    #[tokio::test]
    async fn backfill_limit_is_enforced() {
        let mut h = harness(2);
        h.feed.push("g0", GENESIS_PREV);
        h.feed.push("g1", "g0");
        h.feed.push("g2", "g1");
        h.feed.push("g3", "g2");

        let err = h.follower.poll_once().await.unwrap_err();
        assert!(err.to_string().contains("backfill exceeded 2 blocks"));
        assert!(h.blocks.tip().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_block_on_node_is_reported() {
        let mut h = harness(100);
        h.feed.push("g0", GENESIS_PREV);
        h.follower.poll_once().await.unwrap();

        // announced tip whose parent the node cannot serve
        h.feed.push("x2", "x1");
        let err = h.follower.poll_once().await.unwrap_err();
        assert!(matches!(err, SyncError::BlockNotFound(ref hash) if hash == "x1"));
    }

    #[tokio::test]
    async fn inputs_are_resolved_from_stored_funding_outputs() {
        let mut h = harness(100);
        h.feed.push_tx(TxInfo {
            txid: "fund".into(),
            vin: vec![TxInput::default()],
            vout: vec![TxOutput {
                n: 0,
                value_sat: 5_000,
                addresses: vec!["alice".into()],
            }],
            ..Default::default()
        });
        h.feed.push_tx(TxInfo {
            txid: "spend".into(),
            vin: vec![TxInput {
                txid: Some("fund".into()),
                vout: Some(0),
                ..Default::default()
            }],
            vout: vec![TxOutput {
                n: 0,
                value_sat: 4_000,
                addresses: vec!["bob".into()],
            }],
            ..Default::default()
        });
        h.feed.push_block(Block::new("g0", GENESIS_PREV).with_txs(["fund"]));
        h.follower.poll_once().await.unwrap();
        h.feed.push_block(Block::new("g1", "g0").with_txs(["spend"]));
        h.follower.poll_once().await.unwrap();

        let spend = h.txs.from_id_with_info("spend").await.unwrap().unwrap();
        assert_eq!(spend.blockhash.as_deref(), Some("g1"));
        assert_eq!(spend.vin[0].addr.as_deref(), Some("alice"));
        assert_eq!(spend.vin[0].value_sat, Some(5_000));
    }
}
