//! Any JSON-RPC over HTTP endpoint, e.g. a self-hosted node.
//!
//! No default rate limit; set `rate_limit` on the `ProviderSpec` if the node needs one.

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderCapabilities, ProviderKind, RelayError};

use crate::config::ProviderSpec;

pub fn build(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, RelayError> {
    let url = spec.require_url()?.to_string();
    crate::http_provider(
        ProviderKind::Custom,
        spec,
        url,
        None,
        None,
        ProviderCapabilities {
            batch: true,
            logs: true,
            ..Default::default()
        },
    )
}
