//! In-memory storage backend.
//!
//! Holds block records, chain links, transactions and the ranking table in
//! RAM. Useful for testing and short-lived indexers that don't need
//! persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chainsync_core::balance::AddressAggregate;
use chainsync_core::error::SyncError;
use chainsync_core::store::{BlockStore, TransactionStore};
use chainsync_core::types::{
    AddrQuery, Block, BlockRecord, ChainTip, RankingEntry, TxInfo, TxItem,
};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, SyncError> {
    m.lock()
        .map_err(|e| SyncError::Storage(format!("lock poisoned: {e}")))
}

fn unknown_block(hash: &str) -> SyncError {
    SyncError::Storage(format!("unknown block {hash}"))
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BlockState {
    records: HashMap<String, BlockRecord>,
    /// Successor pointers; may name a predecessor that was never stored
    /// (e.g. the genesis marker).
    next: HashMap<String, String>,
    tip: Option<ChainTip>,
}

impl BlockState {
    fn confirmations(&self, block_hash: Option<&String>) -> Option<u64> {
        let record = self.records.get(block_hash?)?;
        let height = record.height.filter(|_| record.is_main)?;
        let tip = self.tip.as_ref()?;
        Some(tip.height.saturating_sub(height) + 1)
    }
}

/// In-memory block store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryBlockStore {
    state: Mutex<BlockState>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks, placed or not.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashes of the main chain from `from` following `next` links.
    pub fn main_chain_from(&self, from: &str) -> Result<Vec<String>, SyncError> {
        let state = lock(&self.state)?;
        let mut chain = Vec::new();
        let mut cursor = Some(from.to_string());
        while let Some(hash) = cursor {
            if chain.contains(&hash) {
                break;
            }
            cursor = state.next.get(&hash).cloned();
            chain.push(hash);
        }
        Ok(chain)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn has(&self, hash: &str) -> Result<bool, SyncError> {
        Ok(lock(&self.state)?.records.contains_key(hash))
    }

    async fn tip(&self) -> Result<Option<ChainTip>, SyncError> {
        Ok(lock(&self.state)?.tip.clone())
    }

    async fn set_tip(&self, tip: &ChainTip) -> Result<(), SyncError> {
        lock(&self.state)?.tip = Some(tip.clone());
        Ok(())
    }

    async fn next(&self, hash: &str) -> Result<Option<String>, SyncError> {
        Ok(lock(&self.state)?.next.get(hash).cloned())
    }

    async fn set_next(&self, hash: &str, next: &str) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        state.next.insert(hash.to_string(), next.to_string());
        if let Some(record) = state.records.get_mut(hash) {
            record.next_hash = Some(next.to_string());
        }
        Ok(())
    }

    async fn prev(&self, hash: &str) -> Result<Option<String>, SyncError> {
        let state = lock(&self.state)?;
        Ok(state
            .records
            .get(hash)
            .map(|r| r.previous_hash.clone())
            .filter(|p| !p.is_empty()))
    }

    async fn height(&self, hash: &str) -> Result<Option<u64>, SyncError> {
        Ok(lock(&self.state)?.records.get(hash).and_then(|r| r.height))
    }

    async fn set_block_main(&self, hash: &str, height: u64) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        let record = state.records.get_mut(hash).ok_or_else(|| unknown_block(hash))?;
        record.height = Some(height);
        record.is_main = true;
        Ok(())
    }

    async fn set_block_not_main(&self, hash: &str) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        let record = state.records.get_mut(hash).ok_or_else(|| unknown_block(hash))?;
        record.height = None;
        record.is_main = false;
        Ok(())
    }

    async fn add(&self, block: &Block, height: Option<u64>) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        let mut record = BlockRecord::from_block(block, height);
        record.next_hash = state.next.get(&block.hash).cloned();
        state.records.insert(block.hash.clone(), record);
        Ok(())
    }

    async fn from_hash_with_info(&self, hash: &str) -> Result<Option<BlockRecord>, SyncError> {
        Ok(lock(&self.state)?.records.get(hash).cloned())
    }

    async fn fill_confirmations(&self, items: &mut [TxItem]) -> Result<(), SyncError> {
        let state = lock(&self.state)?;
        for item in items.iter_mut() {
            item.confirmations = state.confirmations(item.block_hash.as_ref());
            item.is_confirmed = item.confirmations.is_some();
            item.spent_is_confirmed = item.spent_tx_id.is_some()
                && state.confirmations(item.spent_block_hash.as_ref()).is_some();
        }
        Ok(())
    }

    async fn drop_all(&self) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        *state = BlockState::default();
        tracing::info!("Block store dropped");
        Ok(())
    }
}

// ─── Transactions ────────────────────────────────────────────────────────────

#[derive(Default)]
struct TxState {
    txs: HashMap<String, TxInfo>,
    /// Insertion order of `txs`.
    order: Vec<String>,
    /// `(funding txid, output index)` → spending txid.
    spends: HashMap<(String, u32), String>,
    confirmations: HashMap<String, u64>,
    ranking: HashMap<String, AddressAggregate>,
}

/// In-memory transaction store with address lookup and ranking table.
#[derive(Default)]
pub struct MemoryTransactionStore {
    state: Mutex<TxState>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregate last written to the ranking table for `address`.
    pub fn aggregate(&self, address: &str) -> Option<AddressAggregate> {
        self.state.lock().ok()?.ranking.get(address).cloned()
    }

    /// Total number of stored transactions.
    pub fn tx_count(&self) -> usize {
        self.state.lock().map(|s| s.txs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn from_id_with_info(&self, txid: &str) -> Result<Option<TxInfo>, SyncError> {
        let state = lock(&self.state)?;
        Ok(state.txs.get(txid).map(|tx| {
            let mut tx = tx.clone();
            if let Some(c) = state.confirmations.get(txid) {
                tx.confirmations = Some(*c);
            }
            tx
        }))
    }

    async fn from_addr(&self, address: &str, opts: &AddrQuery) -> Result<Vec<TxItem>, SyncError> {
        let state = lock(&self.state)?;
        let mut items = Vec::new();
        for txid in &state.order {
            let Some(tx) = state.txs.get(txid) else {
                continue;
            };
            for out in tx.vout.iter().filter(|o| o.addresses.iter().any(|a| a == address)) {
                let spent_tx_id = state.spends.get(&(tx.txid.clone(), out.n)).cloned();
                let spent_block_hash = spent_tx_id
                    .as_ref()
                    .and_then(|s| state.txs.get(s))
                    .and_then(|s| s.blockhash.clone());
                let confirmations = if opts.ignore_cache {
                    None
                } else {
                    state.confirmations.get(&tx.txid).copied()
                };
                items.push(TxItem {
                    txid: tx.txid.clone(),
                    index: out.n,
                    value_sat: out.value_sat,
                    is_confirmed: false,
                    spent_tx_id,
                    spent_is_confirmed: false,
                    block_hash: tx.blockhash.clone(),
                    spent_block_hash,
                    confirmations,
                });
            }
        }
        Ok(items)
    }

    async fn cache_confirmations(&self, items: &[TxItem]) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        for item in items {
            match item.confirmations {
                Some(c) => state.confirmations.insert(item.txid.clone(), c),
                None => state.confirmations.remove(&item.txid),
            };
        }
        Ok(())
    }

    async fn update_ranking(&self, aggregate: &AddressAggregate) -> Result<(), SyncError> {
        lock(&self.state)?
            .ranking
            .insert(aggregate.address.clone(), aggregate.clone());
        Ok(())
    }

    async fn ranking(&self) -> Result<Vec<RankingEntry>, SyncError> {
        let state = lock(&self.state)?;
        let mut rows: Vec<_> = state
            .ranking
            .values()
            .filter(|a| a.balance_sat > 0)
            .collect();
        rows.sort_by(|a, b| {
            b.balance_sat
                .cmp(&a.balance_sat)
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(index, a)| RankingEntry {
                index,
                address: a.address.clone(),
                balance_sat: a.balance_sat,
            })
            .collect())
    }

    async fn add(&self, tx: &TxInfo) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        if let Some(existing) = state.txs.get(&tx.txid) {
            if existing.blockhash == tx.blockhash {
                return Err(SyncError::AlreadyExists(tx.txid.clone()));
            }
        } else {
            state.order.push(tx.txid.clone());
        }
        for input in &tx.vin {
            if let (Some(funding), Some(vout)) = (&input.txid, input.vout) {
                state.spends.insert((funding.clone(), vout), tx.txid.clone());
            }
        }
        state.txs.insert(tx.txid.clone(), tx.clone());
        Ok(())
    }

    async fn drop_all(&self) -> Result<(), SyncError> {
        let mut state = lock(&self.state)?;
        *state = TxState::default();
        tracing::info!("Transaction store dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsync_core::types::{TxInput, TxOutput};

    fn pay(txid: &str, block: Option<&str>, to: &str, value: u64) -> TxInfo {
        TxInfo {
            txid: txid.into(),
            vout: vec![TxOutput {
                n: 0,
                value_sat: value,
                addresses: vec![to.into()],
            }],
            blockhash: block.map(Into::into),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn block_links_and_heights() {
        let store = MemoryBlockStore::new();
        store.add(&Block::new("a", "000"), Some(0)).await.unwrap();
        store.add(&Block::new("b", "a"), None).await.unwrap();
        store.set_next("a", "b").await.unwrap();

        assert_eq!(store.prev("b").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.next("a").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.height("a").await.unwrap(), Some(0));
        assert_eq!(store.height("b").await.unwrap(), None);

        store.set_block_main("b", 1).await.unwrap();
        assert!(store.from_hash_with_info("b").await.unwrap().unwrap().is_main);

        store.set_block_not_main("b").await.unwrap();
        let b = store.from_hash_with_info("b").await.unwrap().unwrap();
        assert!(!b.is_main);
        assert_eq!(b.height, None);
        assert_eq!(store.main_chain_from("a").unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn confirmations_follow_main_chain() {
        let store = MemoryBlockStore::new();
        store.add(&Block::new("a", "000"), Some(0)).await.unwrap();
        store.add(&Block::new("b", "a"), Some(1)).await.unwrap();
        store.add(&Block::new("x", "a"), None).await.unwrap();
        store.set_tip(&ChainTip::new("b", 1)).await.unwrap();

        let mut items = vec![
            TxItem {
                txid: "t1".into(),
                block_hash: Some("a".into()),
                spent_tx_id: Some("t2".into()),
                spent_block_hash: Some("x".into()),
                ..Default::default()
            },
            TxItem {
                txid: "t3".into(),
                block_hash: None,
                ..Default::default()
            },
        ];
        store.fill_confirmations(&mut items).await.unwrap();

        assert!(items[0].is_confirmed);
        assert_eq!(items[0].confirmations, Some(2));
        assert!(!items[0].spent_is_confirmed);
        assert!(!items[1].is_confirmed);
    }

    #[tokio::test]
    async fn duplicate_tx_is_a_warning() {
        let store = MemoryTransactionStore::new();
        let tx = pay("t1", Some("a"), "alice", 5);
        store.add(&tx).await.unwrap();
        let err = store.add(&tx).await.unwrap_err();
        assert!(err.is_warning());

        // Re-included in another block: the binding moves.
        store.add(&pay("t1", Some("b"), "alice", 5)).await.unwrap();
        let stored = store.from_id_with_info("t1").await.unwrap().unwrap();
        assert_eq!(stored.blockhash.as_deref(), Some("b"));
        assert_eq!(store.tx_count(), 1);
    }

    #[tokio::test]
    async fn from_addr_links_spends() {
        let store = MemoryTransactionStore::new();
        store.add(&pay("t1", Some("a"), "alice", 50)).await.unwrap();
        let spend = TxInfo {
            txid: "t2".into(),
            vin: vec![TxInput {
                txid: Some("t1".into()),
                vout: Some(0),
                addr: Some("alice".into()),
                value_sat: Some(50),
            }],
            vout: vec![TxOutput {
                n: 0,
                value_sat: 50,
                addresses: vec!["bob".into()],
            }],
            blockhash: Some("b".into()),
            ..Default::default()
        };
        store.add(&spend).await.unwrap();

        let items = store.from_addr("alice", &AddrQuery::default()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].spent_tx_id.as_deref(), Some("t2"));
        assert_eq!(items[0].spent_block_hash.as_deref(), Some("b"));

        let bob = store.from_addr("bob", &AddrQuery::default()).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert!(bob[0].spent_tx_id.is_none());
    }

    #[tokio::test]
    async fn ranking_sorted_by_balance() {
        let store = MemoryTransactionStore::new();
        let mut rich = AddressAggregate::new("rich");
        rich.balance_sat = 900;
        let mut poor = AddressAggregate::new("poor");
        poor.balance_sat = 10;
        let empty = AddressAggregate::new("empty");
        store.update_ranking_ex(&[poor, empty, rich]).await.unwrap();

        let ranking = store.ranking().await.unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].address, "rich");
        assert_eq!(ranking[0].index, 0);
        assert_eq!(ranking[1].address, "poor");
    }
}
