//! [`NodeFeed`] over a node's JSON-RPC interface.

use async_trait::async_trait;
use serde_json::{json, Value};

use chainsync_core::{Block, NodeFeed, SyncError, TxInfo};

use crate::client::{RpcClient, RpcConfig};
use crate::convert::{block_from_json, tx_from_json};
use crate::error::{BroadcastError, RpcError};

/// Reads blocks and transactions from a node and relays signed transactions.
pub struct HttpNodeFeed {
    client: RpcClient,
}

impl HttpNodeFeed {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::new(config)?,
        })
    }

    pub fn from_client(client: RpcClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Broadcast a signed transaction, with node rejections formatted for
    /// display.
    pub async fn broadcast(&self, raw_hex: &str) -> Result<String, BroadcastError> {
        let result = self
            .client
            .call("sendrawtransaction", vec![json!(raw_hex)])
            .await?;
        let txid = result
            .as_str()
            .ok_or_else(|| RpcError::Other(format!("unexpected sendrawtransaction result: {result}")))?;
        tracing::info!(txid, "Transaction broadcast");
        Ok(txid.to_string())
    }

    /// Call `method`, mapping the node's not-found error to `None`.
    async fn call_optional(&self, method: &str, params: Vec<Value>) -> Result<Option<Value>, RpcError> {
        match self.client.call(method, params).await {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl NodeFeed for HttpNodeFeed {
    async fn best_block_hash(&self) -> Result<String, SyncError> {
        let result = self.client.call("getbestblockhash", vec![]).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SyncError::Feed(format!("unexpected getbestblockhash result: {result}")))
    }

    async fn block(&self, hash: &str) -> Result<Option<Block>, SyncError> {
        let Some(value) = self.call_optional("getblock", vec![json!(hash), json!(1)]).await? else {
            return Ok(None);
        };
        Ok(Some(block_from_json(&value)?))
    }

    async fn transaction(&self, txid: &str) -> Result<Option<TxInfo>, SyncError> {
        let Some(value) = self
            .call_optional("getrawtransaction", vec![json!(txid), json!(1)])
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(tx_from_json(&value)?))
    }

    async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, SyncError> {
        self.broadcast(raw_hex)
            .await
            .map_err(|e| SyncError::Feed(e.to_string()))
    }
}
