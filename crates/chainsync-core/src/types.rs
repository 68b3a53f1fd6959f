//! Shared types for the sync pipeline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Returns `true` if `hash` is the all-zero predecessor of a genesis block.
pub fn is_genesis_marker(hash: &str) -> bool {
    !hash.is_empty() && hash.bytes().all(|b| b == b'0')
}

/// The predecessor hash reported for a genesis block.
pub const GENESIS_PREV: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block as announced by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    #[serde(rename = "previousblockhash", default)]
    pub previous_hash: String,
    /// Transaction ids, in block order.
    #[serde(default)]
    pub tx: Vec<String>,
    /// Unix timestamp of the block (seconds since epoch).
    #[serde(default)]
    pub time: i64,
}

impl Block {
    pub fn new(hash: impl Into<String>, previous_hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            previous_hash: previous_hash.into(),
            tx: vec![],
            time: 0,
        }
    }

    /// Attach transaction ids.
    pub fn with_txs<I, S>(mut self, txids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tx = txids.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if this block's predecessor is the genesis marker.
    pub fn is_genesis(&self) -> bool {
        is_genesis_marker(&self.previous_hash)
    }
}

/// A block as held by the block store, with its chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: String,
    pub previous_hash: String,
    /// Successor on the chain this block was last linked into.
    pub next_hash: Option<String>,
    /// Height on the main chain; `None` while the block is not placed.
    pub height: Option<u64>,
    /// Whether the block is currently part of the canonical chain.
    pub is_main: bool,
    pub tx: Vec<String>,
    pub time: i64,
}

impl BlockRecord {
    pub fn from_block(block: &Block, height: Option<u64>) -> Self {
        Self {
            hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
            next_hash: None,
            height,
            is_main: height.is_some(),
            tx: block.tx.clone(),
            time: block.time,
        }
    }
}

/// The canonical head of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub hash: String,
    pub height: u64,
}

impl ChainTip {
    pub fn new(hash: impl Into<String>, height: u64) -> Self {
        Self {
            hash: hash.into(),
            height,
        }
    }
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// A transaction input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Funding transaction (absent for coinbase inputs).
    pub txid: Option<String>,
    /// Output index within the funding transaction.
    pub vout: Option<u32>,
    /// Resolved source address, when known.
    pub addr: Option<String>,
    /// Value of the spent output, when known.
    pub value_sat: Option<u64>,
}

/// A transaction output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub n: u32,
    pub value_sat: u64,
    /// Destination addresses (empty for non-standard scripts).
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// A transaction with its inputs, outputs and owning block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    /// Owning block; `None` while in the mempool.
    pub blockhash: Option<String>,
    /// Cached confirmation count.
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub time: i64,
}

impl TxInfo {
    /// Every distinct address referenced by an input's resolved source or an
    /// output's destination list.
    pub fn addresses(&self) -> BTreeSet<String> {
        let inputs = self.vin.iter().filter_map(|i| i.addr.clone());
        let outputs = self.vout.iter().flat_map(|o| o.addresses.iter().cloned());
        inputs.chain(outputs).collect()
    }
}

/// One value-transfer item touching an address: an output paying it, plus
/// the transaction that spent that output (if any).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxItem {
    /// Founding transaction.
    pub txid: String,
    /// Output index within the founding transaction.
    pub index: u32,
    pub value_sat: u64,
    pub is_confirmed: bool,
    pub spent_tx_id: Option<String>,
    pub spent_is_confirmed: bool,
    /// Block that included the founding transaction.
    pub block_hash: Option<String>,
    /// Block that included the spending transaction.
    pub spent_block_hash: Option<String>,
    pub confirmations: Option<u64>,
}

/// Options for address-scoped item lookup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AddrQuery {
    /// Recompute confirmations instead of trusting cached values.
    pub ignore_cache: bool,
}

/// A row of the balance ranking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// Zero-based position, richest first.
    pub index: usize,
    pub address: String,
    pub balance_sat: u64,
}

impl RankingEntry {
    /// Balance in display units. `coin` is satoshis per unit.
    pub fn balance(&self, coin: u64) -> f64 {
        self.balance_sat as f64 / coin.max(1) as f64
    }
}
