//! Structural validation applied after parsing.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use url::Url;

use crate::{ChainConfig, ConfigError, GatewayConfig};

impl GatewayConfig {
    /// Validates invariants the type system cannot express.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for chain in &self.chains {
            if !names.insert(chain.chain_name.as_str()) {
                return Err(ConfigError::DuplicateChainName(chain.chain_name.clone()));
            }
            chain.validate()?;
        }
        Ok(())
    }
}

impl ChainConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let chain = &self.chain_name;

        if self.upstreams.is_empty() {
            return Err(ConfigError::NoUpstreams { chain: chain.clone() });
        }

        let mut priorities: HashMap<u32, &str> = HashMap::new();
        for group in &self.groups {
            if let Some(first) = priorities.insert(group.priority, &group.id) {
                return Err(ConfigError::DuplicateGroupPriority {
                    chain: chain.clone(),
                    first: first.to_string(),
                    second: group.id.clone(),
                    priority: group.priority,
                });
            }
        }

        let mut ids = HashSet::new();
        for upstream in &self.upstreams {
            if !ids.insert(upstream.id.as_str()) {
                return Err(ConfigError::DuplicateUpstreamId {
                    chain: chain.clone(),
                    id: upstream.id.clone(),
                });
            }

            if let Some(group) = &upstream.group {
                if self.group_priority(group).is_none() {
                    return Err(ConfigError::UnknownGroup {
                        chain: chain.clone(),
                        upstream: upstream.id.clone(),
                        group: group.clone(),
                    });
                }
            }

            if upstream.use_ws_for_block_height
                && upstream.ws_url.as_deref().map_or(true, str::is_empty)
            {
                return Err(ConfigError::MissingWsUrl {
                    chain: chain.clone(),
                    upstream: upstream.id.clone(),
                });
            }

            for url in
                std::iter::once(upstream.http_url.as_str()).chain(upstream.ws_url.as_deref())
            {
                Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
                    chain: chain.clone(),
                    upstream: upstream.id.clone(),
                    url: url.to_string(),
                    source,
                })?;
            }
        }

        if let Some(cache) = &self.cache {
            // A sub-second TTL would expire under the coalescer's feet.
            for ttl in cache.configured_ttls() {
                if !ttl.is_zero() && ttl < Duration::from_secs(1) {
                    let method = cache
                        .method_ttls
                        .iter()
                        .find(|(_, t)| **t == ttl)
                        .map_or("default".to_string(), |(m, _)| m.clone());
                    return Err(ConfigError::TtlTooShort { chain: chain.clone(), method });
                }
            }
        }

        if let Some(errors) = &self.routing.errors {
            if !(0.0..=1.0).contains(&errors.rate) {
                return Err(ConfigError::InvalidErrorRate {
                    chain: chain.clone(),
                    rate: errors.rate,
                });
            }
        }

        Ok(())
    }
}
