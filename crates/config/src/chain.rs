use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    ChainCacheConfig, ConfigError, GroupConfig, RoutingConfig, UpstreamConfig, DEFAULT_METRICS_PORT,
    DEFAULT_PORT,
};

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Port the JSON-RPC listener binds to.
    ///
    /// Default: 8080
    #[serde(default = "default_port")]
    pub port: u16,
    /// Port the Prometheus exporter binds to.
    ///
    /// Default: 9090
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// The chains this gateway fronts.
    pub chains: Vec<ChainConfig>,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

impl GatewayConfig {
    /// Reads and validates a config from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml(&raw)
    }

    /// Parses and validates a config from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Looks up a chain by name.
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|chain| chain.chain_name == name)
    }
}

/// Configuration of a single chain the gateway fronts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainConfig {
    /// Name the chain is addressed by, e.g. `mainnet`.
    pub chain_name: String,
    /// The upstream nodes serving this chain.
    pub upstreams: Vec<UpstreamConfig>,
    /// Priority groups. Upstreams without a group route at priority 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupConfig>,
    /// Optional response cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<ChainCacheConfig>,
    /// Routing policy.
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl ChainConfig {
    /// The priority configured for `group`, if any.
    pub fn group_priority(&self, group: &str) -> Option<u32> {
        self.groups.iter().find(|g| g.id == group).map(|g| g.priority)
    }
}
