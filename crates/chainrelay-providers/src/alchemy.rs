//! Alchemy provider profile.
//!
//! Free tier allows 300 compute units per second; at an average of roughly
//! 12 CU per call that is about 25 requests per second.
//! <https://docs.alchemy.com/reference/throughput>

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderCapabilities, ProviderKind, RateLimit, RelayError};

use crate::config::ProviderSpec;

pub const DEFAULT_RATE_LIMIT: RateLimit = RateLimit {
    requests: 25,
    window_ms: 1_000,
};

/// Alchemy network slug for a chain id.
pub fn network(chain_id: u64) -> Option<&'static str> {
    Some(match chain_id {
        1 => "eth-mainnet",
        11155111 => "eth-sepolia",
        17000 => "eth-holesky",
        137 => "polygon-mainnet",
        80002 => "polygon-amoy",
        42161 => "arb-mainnet",
        421614 => "arb-sepolia",
        10 => "opt-mainnet",
        11155420 => "opt-sepolia",
        8453 => "base-mainnet",
        84532 => "base-sepolia",
        _ => return None,
    })
}

/// URL template for the HTTP JSON-RPC endpoint.
pub fn http_url(api_key: &str, chain_id: u64) -> Result<String, RelayError> {
    let network = network(chain_id)
        .ok_or_else(|| RelayError::Unsupported(format!("Alchemy has no endpoint for chain {chain_id}")))?;
    Ok(format!("https://{network}.g.alchemy.com/v2/{api_key}"))
}

pub fn build(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, RelayError> {
    let url = match spec.url() {
        Some(url) => url.to_string(),
        None => http_url(&spec.require_api_key()?, spec.chain_id())?,
    };
    crate::http_provider(
        ProviderKind::Alchemy,
        spec,
        url,
        Some(DEFAULT_RATE_LIMIT),
        network(spec.chain_id()),
        ProviderCapabilities {
            batch: true,
            archive: true,
            trace: true,
            logs: true,
            pending: true,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainrelay_core::ProviderConfig;

    #[test]
    fn http_url_mainnet() {
        let url = http_url("test_key", 1).unwrap();
        assert_eq!(url, "https://eth-mainnet.g.alchemy.com/v2/test_key");
    }

    #[test]
    fn http_url_arbitrum() {
        assert!(http_url("key", 42161).unwrap().contains("arb-mainnet"));
    }

    #[test]
    fn unknown_chain_is_unsupported() {
        assert!(matches!(http_url("key", 999_999), Err(RelayError::Unsupported(_))));
    }

    #[test]
    fn applies_profile_defaults() {
        let spec = ProviderSpec::new(ProviderKind::Alchemy, "a").with_config(ProviderConfig {
            api_key: Some("k".into()),
            chain_id: Some(8453),
            ..Default::default()
        });
        let provider = build(&spec).unwrap();
        assert_eq!(provider.config().rate_limit, Some(DEFAULT_RATE_LIMIT));
        assert_eq!(provider.config().network.as_deref(), Some("base-mainnet"));
        assert!(provider.capabilities().archive);
    }

    #[test]
    fn explicit_rate_limit_wins() {
        let custom = RateLimit {
            requests: 100,
            window_ms: 1_000,
        };
        let spec = ProviderSpec::new(ProviderKind::Alchemy, "a").with_config(ProviderConfig {
            api_key: Some("k".into()),
            rate_limit: Some(custom),
            ..Default::default()
        });
        assert_eq!(build(&spec).unwrap().config().rate_limit, Some(custom));
    }
}
