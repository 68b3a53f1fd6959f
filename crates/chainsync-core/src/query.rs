//! Paginated transaction reads over the stores.
//!
//! Listings never fail because one entry is missing: an unresolved txid is
//! returned as a stub carrying only the id.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::{BlockStore, TransactionStore};
use crate::types::{AddrQuery, TxInfo};

/// Transactions per page.
pub const PAGE_LENGTH: usize = 10;

/// One entry of a transaction listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxView {
    Resolved(TxInfo),
    Stub { txid: String },
}

impl TxView {
    pub fn txid(&self) -> &str {
        match self {
            Self::Resolved(tx) => &tx.txid,
            Self::Stub { txid } => txid,
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, Self::Stub { .. })
    }
}

/// A page of transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxPage {
    pub pages_total: usize,
    pub txs: Vec<TxView>,
}

/// Read helpers used by the query layer.
pub struct TxLookup {
    blocks: Arc<dyn BlockStore>,
    txs: Arc<dyn TransactionStore>,
}

impl TxLookup {
    pub fn new(blocks: Arc<dyn BlockStore>, txs: Arc<dyn TransactionStore>) -> Self {
        Self { blocks, txs }
    }

    /// A single transaction by id.
    pub async fn transaction(&self, txid: &str) -> Result<Option<TxInfo>, SyncError> {
        self.txs.from_id_with_info(txid).await
    }

    /// Transactions of a block. `page` is zero-based, so `Some(0)` is the
    /// first [`PAGE_LENGTH`] entries; `None` returns all of them on a single
    /// page. Returns `Ok(None)` for an unknown block.
    pub async fn by_block(
        &self,
        block_hash: &str,
        page: Option<usize>,
    ) -> Result<Option<TxPage>, SyncError> {
        let Some(block) = self.blocks.from_hash_with_info(block_hash).await? else {
            return Ok(None);
        };
        Ok(Some(self.page_of(&block.tx, page).await))
    }

    /// Transactions touching an address, in first-seen order. Paged like
    /// [`by_block`](Self::by_block): `Some(0)` is the first page, `None`
    /// disables paging.
    pub async fn by_address(&self, address: &str, page: Option<usize>) -> Result<TxPage, SyncError> {
        let items = self.txs.from_addr(address, &AddrQuery::default()).await?;

        let mut seen = BTreeSet::new();
        let mut txids = Vec::new();
        for item in &items {
            let ids = std::iter::once(&item.txid).chain(item.spent_tx_id.as_ref());
            for id in ids {
                if seen.insert(id.clone()) {
                    txids.push(id.clone());
                }
            }
        }
        Ok(self.page_of(&txids, page).await)
    }

    async fn page_of(&self, txids: &[String], page: Option<usize>) -> TxPage {
        let (slice, pages_total) = match page {
            Some(p) => {
                let start = p.saturating_mul(PAGE_LENGTH).min(txids.len());
                let end = (start + PAGE_LENGTH).min(txids.len());
                (&txids[start..end], txids.len().div_ceil(PAGE_LENGTH))
            }
            None => (txids, 1),
        };

        let mut txs = Vec::with_capacity(slice.len());
        for txid in slice {
            txs.push(self.resolve(txid).await);
        }
        TxPage { pages_total, txs }
    }

    async fn resolve(&self, txid: &str) -> TxView {
        match self.txs.from_id_with_info(txid).await {
            Ok(Some(tx)) => TxView::Resolved(tx),
            Ok(None) => {
                tracing::warn!(txid = %txid, "Transaction not found, returning stub");
                TxView::Stub {
                    txid: txid.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(txid = %txid, error = %e, "Transaction lookup failed, returning stub");
                TxView::Stub {
                    txid: txid.to_string(),
                }
            }
        }
    }
}
