//! Public / community RPC endpoints.
//!
//! Free, no-API-key endpoints suitable for development and testing. Limits
//! are lower and reliability varies, so the default rate limit is
//! conservative.

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderCapabilities, ProviderKind, RateLimit, RelayError};

use crate::config::ProviderSpec;

/// Conservative: 5 req/s.
pub const DEFAULT_RATE_LIMIT: RateLimit = RateLimit {
    requests: 5,
    window_ms: 1_000,
};

pub fn ankr_url(chain_id: u64) -> Option<&'static str> {
    Some(match chain_id {
        1 => "https://rpc.ankr.com/eth",
        137 => "https://rpc.ankr.com/polygon",
        42161 => "https://rpc.ankr.com/arbitrum",
        10 => "https://rpc.ankr.com/optimism",
        8453 => "https://rpc.ankr.com/base",
        56 => "https://rpc.ankr.com/bsc",
        _ => return None,
    })
}

pub fn llama_url(chain_id: u64) -> Option<&'static str> {
    Some(match chain_id {
        1 => "https://eth.llamarpc.com",
        137 => "https://polygon.llamarpc.com",
        _ => return None,
    })
}

/// Cloudflare Ethereum gateway (mainnet only).
pub const CLOUDFLARE_MAINNET: &str = "https://cloudflare-eth.com";

/// First known public endpoint for a chain.
pub fn default_url(chain_id: u64) -> Option<&'static str> {
    ankr_url(chain_id)
        .or_else(|| llama_url(chain_id))
        .or_else(|| (chain_id == 1).then_some(CLOUDFLARE_MAINNET))
}

pub fn build(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, RelayError> {
    let url = match spec.url() {
        Some(url) => url.to_string(),
        None => default_url(spec.chain_id())
            .ok_or_else(|| {
                RelayError::Unsupported(format!(
                    "no public endpoint known for chain {}; set url",
                    spec.chain_id()
                ))
            })?
            .to_string(),
    };
    crate::http_provider(
        ProviderKind::Public,
        spec,
        url,
        Some(DEFAULT_RATE_LIMIT),
        None,
        ProviderCapabilities {
            batch: true,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ankr_url_ethereum() {
        assert_eq!(ankr_url(1), Some("https://rpc.ankr.com/eth"));
    }

    #[test]
    fn default_url_falls_back_across_services() {
        assert_eq!(default_url(56), Some("https://rpc.ankr.com/bsc"));
        assert_eq!(default_url(424242), None);
    }

    #[test]
    fn unknown_chain_without_url_is_unsupported() {
        let mut spec = ProviderSpec::new(ProviderKind::Public, "p");
        spec.config.chain_id = Some(424242);
        assert!(matches!(build(&spec), Err(RelayError::Unsupported(_))));
    }
}
