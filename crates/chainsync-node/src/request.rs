//! JSON-RPC wire types, as spoken by bitcoind-style nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "1.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC response. bitcoind always sends both `result` and `error`,
/// one of them `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "getblock", vec![Value::String("00ab".into())]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"getblock\""));
        assert!(json.contains("\"params\":[\"00ab\"]"));
    }

    #[test]
    fn response_with_null_error_is_ok() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"result":"00ff","error":null,"id":1}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::String("00ff".into()));
    }

    #[test]
    fn response_error_is_surfaced() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"result":null,"error":{"code":-5,"message":"Block not found"},"id":1}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -5);
    }
}
