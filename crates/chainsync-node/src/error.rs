//! Node-facing error types.

use thiserror::Error;

use chainsync_core::SyncError;

use crate::request::JsonRpcError;

/// Node error code for an unknown block or transaction.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// Node error code for a generic transaction verification failure.
pub const RPC_VERIFY_ERROR: i64 = -25;
/// Node error code for a transaction rejected by network rules.
pub const RPC_VERIFY_REJECTED: i64 = -26;

/// Errors that can occur while talking to the node.
#[derive(Debug, Error)]
pub enum RpcError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Returns `true` if this error is transient and the request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the node reported the requested object as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rpc(e) if e.code == RPC_INVALID_ADDRESS_OR_KEY)
    }
}

impl From<RpcError> for SyncError {
    fn from(e: RpcError) -> Self {
        SyncError::Feed(e.to_string())
    }
}

/// Failure to broadcast a raw transaction, formatted for end users.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Generic error {message} (code {code})")]
    Generic { code: i64, message: String },

    #[error("Transaction rejected by network (code {code}). Reason: {message}")]
    Rejected { code: i64, message: String },

    #[error("{message} (code {code})")]
    Node { code: i64, message: String },

    #[error(transparent)]
    Transport(RpcError),
}

impl From<RpcError> for BroadcastError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Rpc(JsonRpcError { code, message }) => match code {
                RPC_VERIFY_ERROR => Self::Generic { code, message },
                RPC_VERIFY_REJECTED => Self::Rejected { code, message },
                _ => Self::Node { code, message },
            },
            other => Self::Transport(other),
        }
    }
}
