//! JSON-RPC 2.0 wire types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainrelay_core::{RelayError, RpcFault};

/// JSON-RPC request id: number, string or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request, borrowing its method and params.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'a str,
    pub method: &'a str,
    pub params: &'a [Value],
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFault>,
}

impl JsonRpcResponse {
    /// The result value, or the RPC error the node returned.
    pub fn into_result(self) -> Result<Value, RelayError> {
        match self.error {
            Some(fault) => Err(RelayError::Rpc(fault)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Match batch responses to request ids.
///
/// Nodes may answer a batch in any order; the output follows `ids`. A
/// request with no matching response gets a transport error.
pub fn order_batch(ids: &[u64], responses: Vec<JsonRpcResponse>) -> Vec<Result<Value, RelayError>> {
    let mut by_id: HashMap<u64, JsonRpcResponse> = responses
        .into_iter()
        .filter_map(|resp| match resp.id {
            RpcId::Number(n) => Some((n, resp)),
            _ => None,
        })
        .collect();

    ids.iter()
        .map(|id| match by_id.remove(id) {
            Some(resp) => resp.into_result(),
            None => Err(RelayError::Transport(format!("batch response missing id {id}"))),
        })
        .collect()
}
