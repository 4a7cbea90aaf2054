//! chainrelay-providers — provider profiles and the static registry.
//!
//! Each profile module knows the URL template, default rate limit and
//! declared capabilities for one RPC service. [`registry`] maps every
//! supported [`ProviderKind`] to its profile's factory, and [`config`] loads
//! a whole relay setup from JSON.
//!
//! # Quick start
//! ```rust,no_run
//! use chainrelay_providers::RelayConfig;
//!
//! let manager = RelayConfig::load("relay.json")?.build_manager()?;
//! # Ok::<(), chainrelay_core::RelayError>(())
//! ```

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderCapabilities, ProviderKind, RateLimit, RelayError};
use chainrelay_http::HttpProvider;

pub mod alchemy;
pub mod config;
pub mod custom;
pub mod infura;
pub mod public;
pub mod quicknode;
pub mod registry;

pub use config::{ProviderSpec, RelayConfig};
pub use registry::{Factory, Registration};

/// Finish a profile: apply defaults the `ProviderSpec` left unset and wrap it in an
/// [`HttpProvider`].
pub(crate) fn http_provider(
    kind: ProviderKind,
    spec: &ProviderSpec,
    url: String,
    default_rate_limit: Option<RateLimit>,
    network: Option<&str>,
    capabilities: ProviderCapabilities,
) -> Result<Arc<dyn Provider>, RelayError> {
    let mut config = spec.config.clone();
    if config.rate_limit.is_none() {
        config.rate_limit = default_rate_limit;
    }
    if config.network.is_none() {
        config.network = network.map(str::to_string);
    }
    let provider = HttpProvider::new(kind, spec.name.clone(), url, config)?.with_capabilities(capabilities);
    Ok(Arc::new(provider))
}
