//! chainsync-core: chain synchronization and address indexing for a
//! block-explorer index fed by an external node.
//!
//! # Architecture
//!
//! ```text
//! NodeFeed → ChainSync::store_tip_block
//!                ├── predecessor check   (NEED_SYNC on unknown ancestry)
//!                ├── fork detection      (tip mismatch)
//!                ├── ReorgResolver       (shallow / deep fork relabeling)
//!                ├── BlockStore          (records, next/prev links, tip)
//!                └── AddressIndexer      (spawned: per-address aggregates
//!                                         → TransactionStore ranking)
//! ```

pub mod address;
pub mod balance;
pub mod config;
pub mod error;
pub mod feed;
pub mod query;
pub mod reorg;
pub mod store;
pub mod sync;
pub mod types;

pub use address::{AddressIndexer, IndexReport};
pub use balance::{AddressAggregate, BalanceAccumulator};
pub use config::{SyncConfig, COIN};
pub use error::SyncError;
pub use feed::NodeFeed;
pub use query::{TxLookup, TxPage, TxView};
pub use reorg::{ReorgKind, ReorgResolver, ReorgSummary};
pub use store::{BlockStore, TransactionStore};
pub use sync::{ChainSync, StoreOutcome};
pub use types::{Block, BlockRecord, ChainTip, RankingEntry, TxInfo, TxItem};
