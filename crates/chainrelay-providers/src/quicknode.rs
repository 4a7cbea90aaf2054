//! QuickNode provider profile.
//!
//! QuickNode issues a personal subdomain URL per endpoint rather than a
//! shared template, so `url` is required.

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderCapabilities, ProviderKind, RateLimit, RelayError};

use crate::config::ProviderSpec;

/// 15 req/s on the free tier.
pub const DEFAULT_RATE_LIMIT: RateLimit = RateLimit {
    requests: 15,
    window_ms: 1_000,
};

pub fn build(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, RelayError> {
    let url = spec.require_url()?.to_string();
    crate::http_provider(
        ProviderKind::QuickNode,
        spec,
        url,
        Some(DEFAULT_RATE_LIMIT),
        None,
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
