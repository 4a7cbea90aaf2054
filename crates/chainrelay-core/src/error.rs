//! Error types shared by providers, policies and the manager.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// An RPC-level error object returned by a backend (well-formed response
/// carrying an error instead of a result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcFault {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

/// Errors that can occur anywhere in the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network/HTTP-level failure inside a provider call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Well-formed RPC error response from the backend.
    #[error("{0}")]
    Rpc(RpcFault),

    /// A single provider attempt exceeded its configured timeout.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A rate-limiter token was not obtained within the allowed wait.
    #[error("Rate limit wait exceeded for provider {provider} after {waited_ms}ms")]
    RateLimitTimeout { provider: String, waited_ms: u64 },

    /// The rate limiter was reset or dropped while the caller was queued.
    #[error("Rate limiter closed for provider {provider}")]
    RateLimiterClosed { provider: String },

    /// No healthy provider exists at selection time.
    #[error("All providers unavailable")]
    AllProvidersUnavailable,

    /// Every attempt allowed by the fallback policy failed.
    #[error("Request failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RelayError>,
    },

    /// The provider has not been connected (or was disconnected).
    #[error("Provider not connected: {0}")]
    NotConnected(String),

    /// The operation or provider kind is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A provider with the same id is already registered.
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    /// No provider with the given id is registered.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The manager was destroyed.
    #[error("Provider manager has been destroyed")]
    Destroyed,

    /// A result could not be deserialized into the requested type.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Returns `true` for failures that come from a single provider attempt
    /// and should be counted against that provider.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Rpc(_)
                | Self::Timeout { .. }
                | Self::NotConnected(_)
                | Self::Deserialization(_)
                | Self::Other(_)
        )
    }

    /// Returns `true` if this is a node-side execution error.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if this error came from rate limiting rather than the
    /// provider itself.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            Self::RateLimitTimeout { .. } | Self::RateLimiterClosed { .. }
        )
    }

    /// Number of attempts carried by a final error, `0` otherwise.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Innermost error, unwrapping `RetriesExhausted`.
    pub fn root(&self) -> &RelayError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_reports_attempts_and_last_error() {
        let err = RelayError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RelayError::Transport("connection refused".into())),
        };
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err.root(), RelayError::Transport(_)));
        assert_eq!(
            err.to_string(),
            "Request failed after 3 attempt(s): Transport error: connection refused"
        );
    }

    #[test]
    fn rate_limit_is_not_a_provider_failure() {
        let err = RelayError::RateLimitTimeout {
            provider: "infura_main".into(),
            waited_ms: 5000,
        };
        assert!(err.is_rate_limit());
        assert!(!err.is_provider_failure());
        assert!(RelayError::Timeout { ms: 10 }.is_provider_failure());
    }

    #[test]
    fn rpc_fault_display() {
        let err = RelayError::Rpc(RpcFault::new(-32000, "execution reverted"));
        assert!(err.is_execution_error());
        assert_eq!(err.to_string(), "RPC error -32000: execution reverted");
    }
}
