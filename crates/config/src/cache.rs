use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Response-cache configuration for a chain.
///
/// Caching is keyed per method: a method is cacheable when either its
/// method-specific TTL or the chain default TTL is positive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChainCacheConfig {
    /// Redis endpoint used for both reads and writes unless overridden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<String>,
    /// Redis endpoint reads go to. Falls back to `redis`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_read: Option<String>,
    /// Redis endpoint writes go to. Falls back to `redis`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_write: Option<String>,
    /// How concurrent lookups for the same key behave.
    #[serde(default)]
    pub mode: CacheMode,
    /// TTL applied to methods without an entry in `method_ttls`. Zero disables
    /// caching for them.
    #[serde(default, with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Per-method TTL overrides.
    #[serde(
        default,
        with = "crate::serde_util::humantime_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub method_ttls: HashMap<String, Duration>,
}

impl ChainCacheConfig {
    /// Endpoint reads are served from.
    pub fn read_url(&self) -> Option<&str> {
        self.redis_read.as_deref().or(self.redis.as_deref())
    }

    /// Endpoint writes are issued to.
    pub fn write_url(&self) -> Option<&str> {
        self.redis_write.as_deref().or(self.redis.as_deref())
    }

    /// Returns `true` when responses for `method` may be cached.
    pub fn is_cacheable(&self, method: &str) -> bool {
        self.method_ttls.get(method).is_some_and(|ttl| !ttl.is_zero())
            || !self.default_ttl.is_zero()
    }

    /// The TTL to store responses for `method` under.
    pub fn ttl_for(&self, method: &str) -> Duration {
        match self.method_ttls.get(method) {
            Some(ttl) if !ttl.is_zero() => *ttl,
            _ => self.default_ttl,
        }
    }

    /// The smallest configured non-zero TTL.
    ///
    /// Used as a safeguard horizon by passive health checks.
    pub fn min_ttl(&self) -> Option<Duration> {
        self.method_ttls
            .values()
            .copied()
            .chain(Some(self.default_ttl))
            .filter(|ttl| !ttl.is_zero())
            .min()
    }

    /// All TTLs that are configured, zero or not.
    pub(crate) fn configured_ttls(&self) -> impl Iterator<Item = Duration> + '_ {
        self.method_ttls.values().copied().chain(Some(self.default_ttl))
    }
}

/// Concurrency behavior of the response cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// At most one in-flight origin call per key; concurrent callers share
    /// the result.
    #[default]
    Coalesced,
    /// Every miss goes to origin; writes happen in the background.
    Parallel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(default_ttl: u64, methods: &[(&str, u64)]) -> ChainCacheConfig {
        ChainCacheConfig {
            default_ttl: Duration::from_secs(default_ttl),
            method_ttls: methods
                .iter()
                .map(|(m, secs)| (m.to_string(), Duration::from_secs(*secs)))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn cacheable_via_method_ttl() {
        let cache = config(0, &[("eth_getTransactionReceipt", 10)]);
        assert!(cache.is_cacheable("eth_getTransactionReceipt"));
        assert!(!cache.is_cacheable("eth_blockNumber"));
        assert_eq!(cache.ttl_for("eth_getTransactionReceipt"), Duration::from_secs(10));
    }

    #[test]
    fn cacheable_via_default_ttl() {
        let cache = config(5, &[]);
        assert!(cache.is_cacheable("eth_call"));
        assert_eq!(cache.ttl_for("eth_call"), Duration::from_secs(5));
    }

    #[test]
    fn min_ttl_skips_zero() {
        let cache = config(0, &[("a", 30), ("b", 2)]);
        assert_eq!(cache.min_ttl(), Some(Duration::from_secs(2)));
        assert_eq!(config(0, &[]).min_ttl(), None);
    }

    #[test]
    fn read_write_urls_fall_back() {
        let cache = ChainCacheConfig {
            redis: Some("redis://shared".into()),
            redis_write: Some("redis://writer".into()),
            ..Default::default()
        };
        assert_eq!(cache.read_url(), Some("redis://shared"));
        assert_eq!(cache.write_url(), Some("redis://writer"));
    }

    #[test]
    fn parses_humantime_ttls() {
        let cache: ChainCacheConfig = serde_yaml::from_str(
            r"
            defaultTtl: 30s
            mode: parallel
            methodTtls:
              eth_getTransactionReceipt: 10s
            ",
        )
        .unwrap();
        assert_eq!(cache.default_ttl, Duration::from_secs(30));
        assert_eq!(cache.mode, CacheMode::Parallel);
        assert_eq!(
            cache.method_ttls["eth_getTransactionReceipt"],
            Duration::from_secs(10)
        );
    }
}
