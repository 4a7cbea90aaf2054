//! Static provider registry: each [`ProviderKind`] tag maps to one factory.
//!
//! Adding a backend means adding a row to [`REGISTRY`]. Kinds without a row
//! fail with [`RelayError::Unsupported`].

use std::sync::Arc;

use chainrelay_core::{Provider, ProviderKind, RelayError};

use crate::config::ProviderSpec;
use crate::{alchemy, custom, infura, public, quicknode};

/// Builds a provider from its spec.
pub type Factory = fn(&ProviderSpec) -> Result<Arc<dyn Provider>, RelayError>;

/// One registry row.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub kind: ProviderKind,
    pub factory: Factory,
    pub summary: &'static str,
}

pub static REGISTRY: &[Registration] = &[
    Registration {
        kind: ProviderKind::Alchemy,
        factory: alchemy::build,
        summary: "Alchemy hosted nodes; api key, URL from chain_id",
    },
    Registration {
        kind: ProviderKind::Infura,
        factory: infura::build,
        summary: "Infura hosted nodes; project id as api key, URL from chain_id",
    },
    Registration {
        kind: ProviderKind::QuickNode,
        factory: quicknode::build,
        summary: "QuickNode personal endpoint; url required",
    },
    Registration {
        kind: ProviderKind::Public,
        factory: public::build,
        summary: "Keyless community endpoints; URL from chain_id unless given",
    },
    Registration {
        kind: ProviderKind::Custom,
        factory: custom::build,
        summary: "Any JSON-RPC over HTTP endpoint; url required",
    },
];

pub fn registrations() -> &'static [Registration] {
    REGISTRY
}

pub fn lookup(kind: ProviderKind) -> Option<&'static Registration> {
    REGISTRY.iter().find(|r| r.kind == kind)
}

pub fn is_registered(kind: ProviderKind) -> bool {
    lookup(kind).is_some()
}

/// Build a provider through its kind's factory.
pub fn build(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, RelayError> {
    let registration = lookup(spec.kind).ok_or_else(|| {
        RelayError::Unsupported(format!("no provider registered for kind {}", spec.kind))
    })?;
    let provider = (registration.factory)(spec)?;
    tracing::debug!(provider = %provider.id(), chain_id = spec.chain_id(), "provider built");
    Ok(provider)
}
