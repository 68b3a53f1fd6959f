//! chainsync-node: connects ChainSync to a bitcoind-style node over
//! JSON-RPC.
//!
//! ```text
//! TipFollower ── poll ──► HttpNodeFeed ──► RpcClient (reqwest, retry)
//!      │
//!      └── store txs, store tip ──► ChainSync
//! ```

pub mod client;
pub mod convert;
pub mod error;
pub mod feed;
pub mod follower;
pub mod request;
pub mod retry;

pub use client::{RpcClient, RpcConfig};
pub use error::{BroadcastError, RpcError};
pub use feed::HttpNodeFeed;
pub use follower::{FollowEvent, FollowerConfig, FollowerStatus, TipFollower};
pub use retry::{RetryConfig, RetryPolicy};
