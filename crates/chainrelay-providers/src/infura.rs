//! Infura provider profile.

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderCapabilities, ProviderKind, RateLimit, RelayError};

use crate::config::ProviderSpec;

/// 10 req/s on the free tier.
pub const DEFAULT_RATE_LIMIT: RateLimit = RateLimit {
    requests: 10,
    window_ms: 1_000,
};

pub fn network(chain_id: u64) -> Option<&'static str> {
    Some(match chain_id {
        1 => "mainnet",
        11155111 => "sepolia",
        17000 => "holesky",
        137 => "polygon-mainnet",
        80002 => "polygon-amoy",
        42161 => "arbitrum-mainnet",
        10 => "optimism-mainnet",
        8453 => "base-mainnet",
        _ => return None,
    })
}

pub fn http_url(project_id: &str, chain_id: u64) -> Result<String, RelayError> {
    let network = network(chain_id)
        .ok_or_else(|| RelayError::Unsupported(format!("Infura has no endpoint for chain {chain_id}")))?;
    Ok(format!("https://{network}.infura.io/v3/{project_id}"))
}

pub fn build(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, RelayError> {
    let url = match spec.url() {
        Some(url) => url.to_string(),
        None => http_url(&spec.require_api_key()?, spec.chain_id())?,
    };
    crate::http_provider(
        ProviderKind::Infura,
        spec,
        url,
        Some(DEFAULT_RATE_LIMIT),
        network(spec.chain_id()),
        ProviderCapabilities {
            batch: true,
            archive: true,
            logs: true,
            pending: true,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infura_mainnet_url() {
        assert_eq!(
            http_url("proj123", 1).unwrap(),
            "https://mainnet.infura.io/v3/proj123"
        );
    }

    #[test]
    fn infura_polygon_url() {
        assert_eq!(
            http_url("p", 137).unwrap(),
            "https://polygon-mainnet.infura.io/v3/p"
        );
    }
}
