//! Storage contracts the sync engine is written against.
//!
//! Implementations include `MemoryBlockStore` and `MemoryTransactionStore`
//! in `chainsync-storage`.

use async_trait::async_trait;

use crate::balance::AddressAggregate;
use crate::error::SyncError;
use crate::types::{AddrQuery, Block, BlockRecord, ChainTip, RankingEntry, TxInfo, TxItem};

/// Block records, the main-chain linked list, and the tip pointer.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Returns `true` if a block with this hash has been stored.
    async fn has(&self, hash: &str) -> Result<bool, SyncError>;

    /// The current canonical head, if any block has been placed yet.
    async fn tip(&self) -> Result<Option<ChainTip>, SyncError>;

    async fn set_tip(&self, tip: &ChainTip) -> Result<(), SyncError>;

    /// Successor pointer of `hash`.
    async fn next(&self, hash: &str) -> Result<Option<String>, SyncError>;

    async fn set_next(&self, hash: &str, next: &str) -> Result<(), SyncError>;

    /// Predecessor of `hash` as recorded when the block was added.
    async fn prev(&self, hash: &str) -> Result<Option<String>, SyncError>;

    /// Main-chain height of `hash`; `None` if unknown or not placed.
    async fn height(&self, hash: &str) -> Result<Option<u64>, SyncError>;

    /// Mark `hash` canonical at `height`.
    async fn set_block_main(&self, hash: &str, height: u64) -> Result<(), SyncError>;

    /// Mark `hash` as an orphan. The block and its transactions are kept.
    async fn set_block_not_main(&self, hash: &str) -> Result<(), SyncError>;

    /// Store `block`, placed at `height` or unplaced when `None`.
    async fn add(&self, block: &Block, height: Option<u64>) -> Result<(), SyncError>;

    async fn from_hash_with_info(&self, hash: &str) -> Result<Option<BlockRecord>, SyncError>;

    /// Resolve `is_confirmed`, `spent_is_confirmed` and `confirmations` of
    /// each item from the main-chain status of the blocks it references.
    async fn fill_confirmations(&self, items: &mut [TxItem]) -> Result<(), SyncError>;

    /// Remove every block, link and the tip.
    async fn drop_all(&self) -> Result<(), SyncError>;
}

/// Transaction records, address lookup, and the balance ranking table.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn from_id_with_info(&self, txid: &str) -> Result<Option<TxInfo>, SyncError>;

    /// Every value-transfer item touching `address`.
    async fn from_addr(&self, address: &str, opts: &AddrQuery) -> Result<Vec<TxItem>, SyncError>;

    /// Remember confirmation counts resolved by the block store.
    async fn cache_confirmations(&self, items: &[TxItem]) -> Result<(), SyncError>;

    /// Merge one recomputed aggregate into the ranking table.
    async fn update_ranking(&self, aggregate: &AddressAggregate) -> Result<(), SyncError>;

    async fn update_ranking_ex(&self, aggregates: &[AddressAggregate]) -> Result<(), SyncError> {
        for aggregate in aggregates {
            self.update_ranking(aggregate).await?;
        }
        Ok(())
    }

    /// The ranking table, richest address first.
    async fn ranking(&self) -> Result<Vec<RankingEntry>, SyncError>;

    /// Store a transaction. Returns [`SyncError::AlreadyExists`] for a known
    /// txid that is already bound to the same block.
    async fn add(&self, tx: &TxInfo) -> Result<(), SyncError>;

    async fn drop_all(&self) -> Result<(), SyncError>;
}
