//! Reorg resolution over the stored main-chain linked list.
//!
//! A new tip whose predecessor is not the current tip falls in one of two
//! cases:
//!
//! ```text
//! Shallow:  A-B-C-D-E(TIP)          Deep:  A-B-C-D-E(TIP)
//!               \                              \
//!                NEW                            F-G-NEW
//! ```
//!
//! 1. **Shallow**: the predecessor is already placed on the main chain. The
//!    new block goes right above it and everything that followed it (D-E)
//!    is orphaned.
//! 2. **Deep**: the predecessor was never placed. Walk `prev` links back to
//!    the confluence block (B), place F-G above it, repoint B at F, and
//!    orphan the old successors of B.
//!
//! The walk stops only at a block of height `> 0`; genesis is never taken
//! as a confluence point.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::SyncError;
use crate::store::BlockStore;

/// Input to [`ReorgResolver::process_reorg`].
#[derive(Debug, Clone)]
pub struct ReorgInput {
    /// Tip before the new block arrived.
    pub old_tip: String,
    /// Successor of `new_prev` before the new block arrived.
    pub old_next: Option<String>,
    /// Declared predecessor of the new block.
    pub new_prev: String,
    pub old_height: u64,
}

/// Classification of the resolved fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgKind {
    /// Predecessor already on the main chain.
    Shallow,
    /// Predecessor reached only by walking back to a confluence block.
    Deep,
}

impl std::fmt::Display for ReorgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shallow => write!(f, "shallow"),
            Self::Deep => write!(f, "deep"),
        }
    }
}

/// Result of resolving one reorg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgSummary {
    pub kind: ReorgKind,
    /// Height assigned to the incoming block.
    pub new_height: u64,
    /// Confluence block (deep reorgs only).
    pub confluence: Option<String>,
    /// Blocks newly placed on the main chain, oldest first.
    pub connected: Vec<String>,
    /// Blocks marked as orphans, in chain order.
    pub orphaned: Vec<String>,
}

/// Walks and relabels the stored chain to follow a fork.
pub struct ReorgResolver {
    blocks: Arc<dyn BlockStore>,
}

impl ReorgResolver {
    pub fn new(blocks: Arc<dyn BlockStore>) -> Self {
        Self { blocks }
    }

    /// Resolve a fork and return the height for the incoming block.
    pub async fn process_reorg(&self, input: &ReorgInput) -> Result<ReorgSummary, SyncError> {
        if !self.blocks.has(&input.new_prev).await? {
            return Err(SyncError::BlockNotFound(input.new_prev.clone()));
        }

        let mut summary = match self.blocks.height(&input.new_prev).await? {
            Some(height) => {
                tracing::info!(
                    old_next = ?input.old_next,
                    new_height = height + 1,
                    "Reorg case 1 (shallow)"
                );
                ReorgSummary {
                    kind: ReorgKind::Shallow,
                    new_height: height + 1,
                    confluence: None,
                    connected: vec![],
                    orphaned: vec![],
                }
            }
            None => {
                tracing::info!(from = %input.new_prev, "Reorg case 2 (deep)");
                self.connect_branch_backwards(&input.new_prev).await?
            }
        };

        let orphan_from = match summary.kind {
            ReorgKind::Shallow => input.old_next.clone(),
            ReorgKind::Deep => summary.orphaned.pop(),
        };
        if let Some(from) = orphan_from {
            let stop: HashSet<&str> = summary.connected.iter().map(String::as_str).collect();
            summary.orphaned = self.set_branch_orphan(&from, &stop).await?;
        }

        tracing::info!(
            kind = %summary.kind,
            old_tip = %input.old_tip,
            old_height = input.old_height,
            new_height = summary.new_height,
            connected = summary.connected.len(),
            orphaned = summary.orphaned.len(),
            "Reorg resolved"
        );
        Ok(summary)
    }

    /// Walk back from `from` to the confluence block, place the collected
    /// branch above it, and repoint the confluence block at the branch.
    ///
    /// The confluence block's previous successor is returned as the single
    /// entry of `orphaned` for the caller to walk.
    async fn connect_branch_backwards(&self, from: &str) -> Result<ReorgSummary, SyncError> {
        let mut branch = vec![from.to_string()];
        let mut cursor = from.to_string();

        let (y_hash, y_height) = loop {
            let prev = match self.blocks.prev(&cursor).await? {
                Some(p) => p,
                None => return Err(SyncError::ConfluenceNotFound(from.to_string())),
            };
            if !self.blocks.has(&prev).await? {
                return Err(SyncError::ConfluenceNotFound(from.to_string()));
            }
            match self.blocks.height(&prev).await? {
                Some(h) if h > 0 => break (prev, h),
                _ => {
                    branch.push(prev.clone());
                    cursor = prev;
                }
            }
        };
        branch.reverse();

        tracing::info!(y = %y_hash, height = y_height, branch = branch.len(), "Found confluence block");

        let mut height = y_height;
        for hash in &branch {
            height += 1;
            self.blocks.set_block_main(hash, height).await?;
            tracing::debug!(hash = %hash, height, "Block connected");
        }

        let y_old_next = self.blocks.next(&y_hash).await?;
        let first = &branch[0];
        self.blocks.set_next(&y_hash, first).await?;

        let orphan_from = y_old_next.filter(|n| n != first);

        Ok(ReorgSummary {
            kind: ReorgKind::Deep,
            new_height: height + 1,
            confluence: Some(y_hash),
            connected: branch,
            orphaned: orphan_from.into_iter().collect(),
        })
    }

    /// Mark `from` and every block reachable through `next` as orphans.
    /// Stops at the end of the chain or on reaching a block in `stop`.
    async fn set_branch_orphan(
        &self,
        from: &str,
        stop: &HashSet<&str>,
    ) -> Result<Vec<String>, SyncError> {
        let mut orphaned = Vec::new();
        let mut cursor = Some(from.to_string());
        while let Some(hash) = cursor {
            if stop.contains(hash.as_str()) || orphaned.contains(&hash) {
                break;
            }
            self.blocks.set_block_not_main(&hash).await?;
            tracing::debug!(hash = %hash, "Block orphaned");
            cursor = self.blocks.next(&hash).await?;
            orphaned.push(hash);
        }
        Ok(orphaned)
    }
}
