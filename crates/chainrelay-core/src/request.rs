//! Request type and block/quantity helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// A method call with ordered parameters.
///
/// A request has no identity beyond its cache key: two structurally
/// identical requests are indistinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// A request without parameters.
    pub fn method(method: impl Into<String>) -> Self {
        Self::new(method, Vec::new())
    }

    /// Stable cache key: `"{method}:{json(params)}"`.
    ///
    /// Object keys serialize in sorted order, so structurally equal params
    /// always produce the same key.
    pub fn cache_key(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_else(|_| "[]".into());
        format!("{}:{}", self.method, params)
    }
}

/// Block selector for state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
    Earliest,
    Safe,
    Finalized,
    Number(u64),
}

impl BlockTag {
    pub fn to_value(self) -> Value {
        match self {
            Self::Latest => Value::from("latest"),
            Self::Pending => Value::from("pending"),
            Self::Earliest => Value::from("earliest"),
            Self::Safe => Value::from("safe"),
            Self::Finalized => Value::from("finalized"),
            Self::Number(n) => Value::from(to_hex_quantity(n)),
        }
    }
}

/// Block identifier for `eth_getBlockBy*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockId {
    Hash(String),
    Tag(BlockTag),
}

impl From<u64> for BlockId {
    fn from(n: u64) -> Self {
        Self::Tag(BlockTag::Number(n))
    }
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        Self::Tag(tag)
    }
}

/// Encode a quantity as `0x`-prefixed hex.
pub fn to_hex_quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Parse a `0x`-prefixed hex quantity (or a plain JSON number).
pub fn parse_quantity(value: &Value) -> Result<u64, RelayError> {
    match value {
        Value::String(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            if digits.is_empty() {
                return Ok(0);
            }
            u64::from_str_radix(digits, 16)
                .map_err(|e| RelayError::Other(format!("invalid hex quantity {s:?}: {e}")))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| RelayError::Other(format!("invalid quantity {n}"))),
        other => Err(RelayError::Other(format!(
            "expected hex quantity, got {other}"
        ))),
    }
}
