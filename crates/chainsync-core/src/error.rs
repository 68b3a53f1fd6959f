//! Error types for the chain synchronization pipeline.

use thiserror::Error;

/// Errors that can occur while syncing blocks or indexing addresses.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record that is being inserted is already present.
    #[error("WARN: already exists: {0}")]
    AlreadyExists(String),

    /// Expected, benign race (e.g. a redundant block announcement).
    #[error("WARN: {0}")]
    Warn(String),

    /// The predecessor of `hash` is unknown and is not the genesis marker.
    /// The caller should backfill the missing ancestry and retry.
    #[error("NEED_SYNC ignoring block {hash} with non existing prev {previous}")]
    NeedSync { hash: String, previous: String },

    /// The fork predecessor is not in the store at all.
    #[error("Could not find block: {0}")]
    BlockNotFound(String),

    /// Walking back from the new branch never reached a placed block.
    #[error("No confluence point found walking back from {0}")]
    ConfluenceNotFound(String),

    #[error("Node feed error: {0}")]
    Feed(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Returns `true` for expected conditions that are swallowed at the top
    /// level and reported as "no change".
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::Warn(_))
    }

    /// Returns `true` if the caller should backfill and retry.
    pub fn is_need_sync(&self) -> bool {
        matches!(self, Self::NeedSync { .. })
    }

    /// Returns `true` if reorg resolution could not locate the fork.
    pub fn is_fatal_resolution(&self) -> bool {
        matches!(self, Self::BlockNotFound(_) | Self::ConfluenceNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_classified() {
        assert!(SyncError::AlreadyExists("0xa".into()).is_warning());
        assert!(SyncError::Warn("redundant".into()).is_warning());
        assert!(!SyncError::Storage("disk".into()).is_warning());
    }

    #[test]
    fn warning_messages_carry_the_marker() {
        let err = SyncError::AlreadyExists("tx1".into());
        assert!(err.to_string().starts_with("WARN"));
    }

    #[test]
    fn need_sync_is_not_fatal() {
        let err = SyncError::NeedSync {
            hash: "b".into(),
            previous: "a".into(),
        };
        assert!(err.is_need_sync());
        assert!(!err.is_fatal_resolution());
        assert!(!err.is_warning());
        assert!(SyncError::BlockNotFound("a".into()).is_fatal_resolution());
    }
}
