//! Address indexer: recomputes the aggregate of every address touched by a
//! newly stored block and merges it into the ranking table.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::balance::{AddressAggregate, BalanceAccumulator};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::store::{BlockStore, TransactionStore};
use crate::types::AddrQuery;

/// Counters for one `index_block` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub block_hash: String,
    /// Blocks scanned: the stored block plus any relabeled by a reorg.
    pub blocks: usize,
    /// Transactions resolved from the store.
    pub txs: usize,
    /// Transaction ids that could not be resolved.
    pub missing_txs: usize,
    /// Distinct addresses referenced by the block.
    pub addresses: usize,
    /// Aggregates written to the ranking table.
    pub updated: usize,
    /// Addresses whose recomputation failed.
    pub failed: usize,
}

/// Recomputes address aggregates from the stores.
pub struct AddressIndexer {
    blocks: Arc<dyn BlockStore>,
    txs: Arc<dyn TransactionStore>,
    config: SyncConfig,
}

impl AddressIndexer {
    pub fn new(
        blocks: Arc<dyn BlockStore>,
        txs: Arc<dyn TransactionStore>,
        config: SyncConfig,
    ) -> Self {
        Self { blocks, txs, config }
    }

    /// Index every address referenced by the transactions of `block_hash`.
    ///
    /// Failures are logged and counted, never propagated: each address is
    /// recomputed and written independently.
    pub async fn index_block(&self, block_hash: &str) -> IndexReport {
        self.index_blocks(block_hash, &[]).await
    }

    /// Index `block_hash` together with blocks whose main-chain status just
    /// changed. Each distinct address is recomputed once.
    pub async fn index_blocks(&self, block_hash: &str, relabeled: &[String]) -> IndexReport {
        let mut report = IndexReport {
            block_hash: block_hash.to_string(),
            ..Default::default()
        };

        let mut visited = BTreeSet::new();
        let mut addresses = BTreeSet::new();
        let hashes = std::iter::once(block_hash).chain(relabeled.iter().map(String::as_str));
        for hash in hashes {
            if visited.insert(hash) {
                self.collect_addresses(hash, &mut addresses, &mut report).await;
            }
        }
        report.addresses = addresses.len();

        let results: Vec<_> = stream::iter(addresses)
            .map(|addr| async move {
                let outcome = self.reindex_address(&addr).await;
                (addr, outcome)
            })
            .buffer_unordered(self.config.index_concurrency.max(1))
            .collect()
            .await;

        for (addr, outcome) in results {
            match outcome {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(address = %addr, error = %e, "Address recomputation failed");
                }
            }
        }

        tracing::debug!(
            hash = %block_hash,
            blocks = report.blocks,
            txs = report.txs,
            addresses = report.addresses,
            updated = report.updated,
            failed = report.failed,
            "Block addresses indexed"
        );
        report
    }

    async fn collect_addresses(
        &self,
        block_hash: &str,
        addresses: &mut BTreeSet<String>,
        report: &mut IndexReport,
    ) {
        let block = match self.blocks.from_hash_with_info(block_hash).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                tracing::warn!(hash = %block_hash, "Block vanished before indexing");
                return;
            }
            Err(e) => {
                tracing::error!(hash = %block_hash, error = %e, "Failed to load block for indexing");
                return;
            }
        };
        report.blocks += 1;

        for txid in &block.tx {
            match self.txs.from_id_with_info(txid).await {
                Ok(Some(tx)) => {
                    report.txs += 1;
                    addresses.extend(tx.addresses());
                }
                Ok(None) => {
                    report.missing_txs += 1;
                    tracing::warn!(txid = %txid, block = %block_hash, "Transaction not found, skipping");
                }
                Err(e) => {
                    report.missing_txs += 1;
                    tracing::warn!(txid = %txid, error = %e, "Transaction lookup failed, skipping");
                }
            }
        }
    }

    /// Recompute `address` from its full history and write it to the
    /// ranking table. Nothing is written unless the computation succeeds.
    pub async fn reindex_address(&self, address: &str) -> Result<(), SyncError> {
        let aggregate = self.address_balance(address).await?;
        tracing::trace!(
            address,
            balance = aggregate.balance(self.config.coin),
            appearances = aggregate.tx_appearances,
            "Address recomputed"
        );
        self.txs.update_ranking(&aggregate).await
    }

    /// Compute the aggregate for `address` from scratch.
    pub async fn address_balance(&self, address: &str) -> Result<AddressAggregate, SyncError> {
        let query = AddrQuery {
            ignore_cache: self.config.ignore_cache,
        };
        let mut items = self.txs.from_addr(address, &query).await?;
        self.blocks.fill_confirmations(&mut items).await?;
        self.txs.cache_confirmations(&items).await?;

        let mut acc = BalanceAccumulator::new(address);
        acc.extend(&items);
        Ok(acc.finish())
    }
}
