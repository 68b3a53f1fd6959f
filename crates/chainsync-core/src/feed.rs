//! The upstream node contract.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{Block, TxInfo};

/// Source of raw blocks and transactions, and sink for signed transactions.
///
/// The object is safe to share as `Arc<dyn NodeFeed>`.
#[async_trait]
pub trait NodeFeed: Send + Sync {
    /// Hash of the block the node currently considers its tip.
    async fn best_block_hash(&self) -> Result<String, SyncError>;

    async fn block(&self, hash: &str) -> Result<Option<Block>, SyncError>;

    async fn transaction(&self, txid: &str) -> Result<Option<TxInfo>, SyncError>;

    /// Broadcast a signed transaction, returning its txid.
    async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, SyncError>;
}
