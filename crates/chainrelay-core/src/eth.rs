//! Ethereum convenience calls built on a single call primitive.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RelayError;
use crate::provider::Provider;
use crate::request::{parse_quantity, BlockId, BlockTag};

/// Typed wrappers over `eth_*` methods.
///
/// Implemented for every [`Provider`] and for the
/// [`ProviderManager`](crate::manager::ProviderManager); only
/// [`rpc`](EthApi::rpc) needs to be supplied.
#[async_trait]
pub trait EthApi: Send + Sync {
    async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, RelayError>;

    /// Call a method and deserialize its result.
    async fn rpc_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RelayError> {
        let value = self.rpc(method, params).await?;
        serde_json::from_value(value).map_err(RelayError::Deserialization)
    }

    /// Balance at the latest block, as a hex quantity.
    async fn get_balance(&self, address: &str) -> Result<String, RelayError> {
        self.get_balance_at(address, BlockTag::Latest).await
    }

    async fn get_balance_at(&self, address: &str, block: BlockTag) -> Result<String, RelayError> {
        self.rpc_as("eth_getBalance", vec![Value::from(address), block.to_value()])
            .await
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, RelayError> {
        let value = self
            .rpc(
                "eth_getTransactionCount",
                vec![Value::from(address), BlockTag::Latest.to_value()],
            )
            .await?;
        parse_quantity(&value)
    }

    async fn get_gas_price(&self) -> Result<String, RelayError> {
        self.rpc_as("eth_gasPrice", Vec::new()).await
    }

    async fn estimate_gas(&self, transaction: Value) -> Result<String, RelayError> {
        self.rpc_as("eth_estimateGas", vec![transaction]).await
    }

    /// Returns the transaction hash.
    async fn send_transaction(&self, transaction: Value) -> Result<String, RelayError> {
        self.rpc_as("eth_sendTransaction", vec![transaction]).await
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<String, RelayError> {
        self.rpc_as("eth_sendRawTransaction", vec![Value::from(raw)])
            .await
    }

    /// `None` if the node does not know the hash.
    async fn get_transaction(&self, hash: &str) -> Result<Option<Value>, RelayError> {
        let value = self
            .rpc("eth_getTransactionByHash", vec![Value::from(hash)])
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<Value>, RelayError> {
        let value = self
            .rpc("eth_getTransactionReceipt", vec![Value::from(hash)])
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    /// Block header with transaction hashes only.
    async fn get_block(&self, block: BlockId) -> Result<Option<Value>, RelayError> {
        let value = match block {
            BlockId::Hash(hash) => {
                self.rpc("eth_getBlockByHash", vec![Value::from(hash), Value::Bool(false)])
                    .await?
            }
            BlockId::Tag(tag) => {
                self.rpc("eth_getBlockByNumber", vec![tag.to_value(), Value::Bool(false)])
                    .await?
            }
        };
        Ok((!value.is_null()).then_some(value))
    }

    async fn get_block_number(&self) -> Result<u64, RelayError> {
        let value = self.rpc("eth_blockNumber", Vec::new()).await?;
        parse_quantity(&value)
    }

    async fn get_chain_id(&self) -> Result<u64, RelayError> {
        let value = self.rpc("eth_chainId", Vec::new()).await?;
        parse_quantity(&value)
    }

    async fn get_code(&self, address: &str, block: BlockTag) -> Result<String, RelayError> {
        self.rpc_as("eth_getCode", vec![Value::from(address), block.to_value()])
            .await
    }
}

#[async_trait]
impl<P: Provider + ?Sized> EthApi for P {
    async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, RelayError> {
        self.call(method, params).await
    }
}
