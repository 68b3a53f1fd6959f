//! chainsync-storage: storage backends for ChainSync.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryBlockStore, MemoryTransactionStore};
