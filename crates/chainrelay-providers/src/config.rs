//! File configuration: manager settings plus the provider list.
//!
//! ```json
//! {
//!   "strategy": "priority",
//!   "fallback": { "max_retries": 2 },
//!   "providers": [
//!     { "kind": "alchemy", "name": "primary", "api_key_env": "ALCHEMY_KEY", "priority": 1 },
//!     { "kind": "public", "name": "ankr", "chain_id": 1, "priority": 2 }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chainrelay_core::{Provider, ProviderConfig, ProviderKind, ProviderManager, ProviderManagerConfig, RelayError};

use crate::registry;

/// Chain used when a `ProviderSpec` names none.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// One provider entry: kind, name and its [`ProviderConfig`] fields inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub name: String,
    /// Environment variable holding the API key, read when `api_key` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(flatten)]
    pub config: ProviderConfig,
}

impl ProviderSpec {
    pub fn new(kind: ProviderKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            api_key_env: None,
            config: ProviderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id.unwrap_or(DEFAULT_CHAIN_ID)
    }

    /// Inline `api_key`, else the value of `api_key_env`.
    pub fn api_key(&self) -> Result<Option<String>, RelayError> {
        if let Some(key) = &self.config.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                RelayError::Config(format!(
                    "provider {}: environment variable {var} is not set",
                    self.name
                ))
            }),
            None => Ok(None),
        }
    }

    /// Like [`api_key`](Self::api_key) but a missing key is an error.
    pub fn require_api_key(&self) -> Result<String, RelayError> {
        self.api_key()?.ok_or_else(|| {
            RelayError::Config(format!(
                "provider {} ({}) needs api_key or api_key_env",
                self.name, self.kind
            ))
        })
    }

    /// An explicit `url`, if set.
    pub fn url(&self) -> Option<&str> {
        self.config.url.as_deref()
    }

    /// The explicit `url`, required for kinds without a URL template.
    pub fn require_url(&self) -> Result<&str, RelayError> {
        self.url().ok_or_else(|| {
            RelayError::Config(format!("provider {} ({}) needs a url", self.name, self.kind))
        })
    }
}

/// Everything needed to stand up a [`ProviderManager`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(flatten)]
    pub manager: ProviderManagerConfig,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

impl RelayConfig {
    pub fn from_json_str(s: &str) -> Result<Self, RelayError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        self.manager.validate()?;
        if self.providers.is_empty() {
            return Err(RelayError::Config("no providers configured".into()));
        }
        for spec in &self.providers {
            if spec.name.trim().is_empty() {
                return Err(RelayError::Config(format!("{} provider with empty name", spec.kind)));
            }
            spec.config.validate()?;
        }
        Ok(())
    }

    /// Build every provider through the registry, in file order.
    pub fn build_providers(&self) -> Result<Vec<Arc<dyn Provider>>, RelayError> {
        self.providers.iter().map(registry::build).collect()
    }

    pub fn build_manager(&self) -> Result<ProviderManager, RelayError> {
        ProviderManager::new(self.build_providers()?, self.manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainrelay_core::Strategy;

    const SAMPLE: &str = r#"{
        "strategy": "priority",
        "cache": {"max_size": 50},
        "providers": [
            {"kind": "alchemy", "name": "primary", "api_key": "k1", "priority": 1, "chain_id": 137},
            {"kind": "custom", "name": "node", "url": "http://127.0.0.1:8545", "timeout_ms": 5000},
            {"kind": "public", "name": "ankr"}
        ]
    }"#;

    #[test]
    fn parses_manager_settings_and_providers() {
        let cfg = RelayConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.manager.strategy, Strategy::Priority);
        assert_eq!(cfg.manager.cache.max_size, 50);
        assert_eq!(cfg.manager.fallback.max_retries, 2);
        assert_eq!(cfg.providers.len(), 3);

        let primary = &cfg.providers[0];
        assert_eq!(primary.kind, ProviderKind::Alchemy);
        assert_eq!(primary.config.priority, 1);
        assert_eq!(primary.chain_id(), 137);
        assert_eq!(primary.require_api_key().unwrap(), "k1");

        let node = &cfg.providers[1];
        assert_eq!(node.config.timeout_ms, 5000);
        assert_eq!(node.config.retries, 3);
        assert_eq!(node.url(), Some("http://127.0.0.1:8545"));
        assert_eq!(cfg.providers[2].chain_id(), DEFAULT_CHAIN_ID);
    }

    #[test]
    fn builds_manager_in_file_order() {
        let manager = RelayConfig::from_json_str(SAMPLE).unwrap().build_manager().unwrap();
        let ids: Vec<String> = manager.provider_ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["alchemy_primary", "custom_node", "public_ankr"]);
    }

    #[test]
    fn api_key_from_environment() {
        let mut spec = ProviderSpec::new(ProviderKind::Infura, "env");
        spec.api_key_env = Some("CHAINRELAY_TEST_INFURA_KEY".into());
        assert!(spec.require_api_key().is_err());

        std::env::set_var("CHAINRELAY_TEST_INFURA_KEY", "from-env");
        assert_eq!(spec.require_api_key().unwrap(), "from-env");

        spec.config.api_key = Some("inline".into());
        assert_eq!(spec.require_api_key().unwrap(), "inline");
    }

    #[test]
    fn rejects_empty_or_invalid_files() {
        assert!(RelayConfig::from_json_str("{}").is_err());
        assert!(RelayConfig::from_json_str(
            r#"{"providers": [{"kind": "custom", "name": "x", "url": "http://a", "timeout_ms": 0}]}"#
        )
        .is_err());
        assert!(RelayConfig::from_json_str(r#"{"providers": [{"kind": "nope", "name": "x"}]}"#).is_err());
        assert!(RelayConfig::load("/definitely/not/here.json").is_err());
    }
}
