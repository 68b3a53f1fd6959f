//! ChainSync: stores newly announced tip blocks and keeps the main chain,
//! heights and tip pointer consistent with the node's view.
//!
//! Each call runs through the same ordered steps:
//!
//! ```text
//! ValidatingPredecessor → DetectingFork → ResolvingReorg → Persisting → Indexing
//! ```
//!
//! Only one call mutates the chain at a time. Contending callers wait for the
//! guard in arrival order; address indexing runs afterwards on a spawned task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::address::{AddressIndexer, IndexReport};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::reorg::{ReorgInput, ReorgResolver, ReorgSummary};
use crate::store::{BlockStore, TransactionStore};
use crate::types::{is_genesis_marker, Block, ChainTip, TxInfo};

static NEXT_SYNC_ID: AtomicU64 = AtomicU64::new(0);

/// State guarded by the single-flight lock.
#[derive(Debug, Default)]
struct SyncState {
    /// Hash of the last block this instance stored.
    cached_last_hash: Option<String>,
}

/// Result of [`ChainSync::store_tip_block`].
#[derive(Debug)]
pub enum StoreOutcome {
    /// The block was stored.
    Stored {
        /// Height assigned to the block; `None` when stored unplaced.
        height: Option<u64>,
        /// Set when a reorg was resolved to place the block.
        reorg: Option<ReorgSummary>,
        /// Address indexing task for this block, if enabled.
        indexing: Option<JoinHandle<IndexReport>>,
    },
    /// A benign condition stopped the store; nothing changed.
    Ignored { reason: String },
}

impl StoreOutcome {
    /// Height of the stored block, if it was placed.
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::Stored { height, .. } => *height,
            Self::Ignored { .. } => None,
        }
    }

    /// Wait for the spawned address indexing to finish, if any.
    pub async fn indexed(self) -> Option<IndexReport> {
        match self {
            Self::Stored {
                indexing: Some(handle),
                ..
            } => match handle.await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, "Address indexing task failed");
                    None
                }
            },
            _ => None,
        }
    }
}

/// Synchronizes the block index with the tips announced by the node.
pub struct ChainSync {
    id: u64,
    blocks: Arc<dyn BlockStore>,
    txs: Arc<dyn TransactionStore>,
    resolver: ReorgResolver,
    indexer: Arc<AddressIndexer>,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl ChainSync {
    pub fn new(
        blocks: Arc<dyn BlockStore>,
        txs: Arc<dyn TransactionStore>,
        config: SyncConfig,
    ) -> Self {
        let indexer = Arc::new(AddressIndexer::new(
            Arc::clone(&blocks),
            Arc::clone(&txs),
            config.clone(),
        ));
        Self {
            id: NEXT_SYNC_ID.fetch_add(1, Ordering::Relaxed),
            resolver: ReorgResolver::new(Arc::clone(&blocks)),
            blocks,
            txs,
            indexer,
            config,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Process-wide instance id, used in log fields.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn indexer(&self) -> &Arc<AddressIndexer> {
        &self.indexer
    }

    /// Store `block` as the new tip.
    ///
    /// With `allow_reorgs` the predecessor is validated, forks are resolved
    /// and the tip pointer is moved. Without it the block is appended and
    /// linked unplaced, for backfill replays whose canonical status is decided
    /// by a later reorg-aware store. A backfilled block only becomes its
    /// predecessor's `next` when the predecessor is unplaced or has no
    /// successor yet.
    ///
    /// After a reorg, the spawned indexing also covers every block that was
    /// connected or orphaned, so aggregates of their addresses are refreshed.
    ///
    /// Warning-class errors are reported as [`StoreOutcome::Ignored`].
    pub async fn store_tip_block(
        &self,
        block: &Block,
        allow_reorgs: bool,
    ) -> Result<StoreOutcome, SyncError> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(sync = self.id, hash = %block.hash, "Storing a block already, waiting");
                self.state.lock().await
            }
        };

        let stored = self.store_locked(&mut state, block, allow_reorgs).await;
        drop(state);

        match stored {
            Ok((height, reorg)) => {
                let indexing = self.config.index_addresses.then(|| {
                    let relabeled = reorg
                        .as_ref()
                        .map(|r| r.connected.iter().chain(&r.orphaned).cloned().collect())
                        .unwrap_or_default();
                    self.spawn_indexing(&block.hash, relabeled)
                });
                Ok(StoreOutcome::Stored {
                    height,
                    reorg,
                    indexing,
                })
            }
            Err(e) if e.is_warning() => {
                tracing::debug!(sync = self.id, hash = %block.hash, reason = %e, "Block ignored");
                Ok(StoreOutcome::Ignored {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn store_locked(
        &self,
        state: &mut SyncState,
        block: &Block,
        allow_reorgs: bool,
    ) -> Result<(Option<u64>, Option<ReorgSummary>), SyncError> {
        let new_prev = block.previous_hash.as_str();

        if self.config.ignore_known_blocks && self.blocks.has(&block.hash).await? {
            return Err(SyncError::Warn(format!(
                "Ignoring already existing block: {}",
                block.hash
            )));
        }

        if !allow_reorgs {
            return self.append_unplaced(state, block).await;
        }

        // ValidatingPredecessor
        let cached = state.cached_last_hash.as_deref() == Some(new_prev);
        if !cached && !is_genesis_marker(new_prev) && !self.blocks.has(new_prev).await? {
            return Err(SyncError::NeedSync {
                hash: block.hash.clone(),
                previous: new_prev.to_string(),
            });
        }

        // DetectingFork
        let old_tip = self.blocks.tip().await?;
        let (height, reorg) = match old_tip {
            Some(tip) if tip.hash != new_prev => {
                tracing::info!(
                    sync = self.id,
                    new_tip = %block.hash,
                    old_tip = %tip.hash,
                    old_height = tip.height,
                    "New tip needs reorg"
                );
                // ResolvingReorg
                let input = ReorgInput {
                    old_next: self.blocks.next(new_prev).await?,
                    old_tip: tip.hash,
                    new_prev: new_prev.to_string(),
                    old_height: tip.height,
                };
                let summary = self.resolver.process_reorg(&input).await?;
                (summary.new_height, Some(summary))
            }
            Some(tip) => (tip.height + 1, None),
            None => (0, None),
        };

        // Persisting
        state.cached_last_hash = Some(block.hash.clone());
        self.blocks.add(block, Some(height)).await?;
        self.blocks.set_tip(&ChainTip::new(&block.hash, height)).await?;
        self.blocks.set_next(new_prev, &block.hash).await?;

        tracing::info!(sync = self.id, hash = %block.hash, height, "Tip stored");
        Ok((Some(height), reorg))
    }

    async fn append_unplaced(
        &self,
        state: &mut SyncState,
        block: &Block,
    ) -> Result<(Option<u64>, Option<ReorgSummary>), SyncError> {
        let new_prev = block.previous_hash.as_str();
        state.cached_last_hash = Some(block.hash.clone());
        self.blocks.add(block, None).await?;

        // A canonical successor pointer is only ever moved by reorg resolution.
        let prev_is_placed = self.blocks.height(new_prev).await?.is_some();
        let prev_has_next = self.blocks.next(new_prev).await?.is_some();
        if !prev_is_placed || !prev_has_next {
            self.blocks.set_next(new_prev, &block.hash).await?;
        }

        tracing::debug!(sync = self.id, hash = %block.hash, "Block appended unplaced");
        Ok((None, None))
    }

    /// Index the stored block and every block a reorg connected or orphaned.
    fn spawn_indexing(&self, hash: &str, relabeled: Vec<String>) -> JoinHandle<IndexReport> {
        let indexer = Arc::clone(&self.indexer);
        let hash = hash.to_string();
        tokio::spawn(async move { indexer.index_blocks(&hash, &relabeled).await })
    }

    /// Store an unconfirmed transaction.
    pub async fn store_tx(&self, tx: &TxInfo) -> Result<(), SyncError> {
        match self.txs.add(tx).await {
            Err(e) if e.is_warning() => {
                tracing::debug!(txid = %tx.txid, "Transaction already stored");
                Ok(())
            }
            other => other,
        }
    }

    /// Drop every block and transaction from both stores.
    pub async fn destroy(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        self.blocks.drop_all().await?;
        self.txs.drop_all().await?;
        state.cached_last_hash = None;
        Ok(())
    }
}
