//! chainrelay-http — JSON-RPC 2.0 over HTTP for ChainRelay.
//!
//! [`HttpProvider`] implements [`chainrelay_core::Provider`] with true
//! grouped batching; [`wire`] holds the JSON-RPC request/response types.

pub mod client;
pub mod wire;

pub use client::HttpProvider;
pub use wire::{JsonRpcRequest, JsonRpcResponse, RpcId};
