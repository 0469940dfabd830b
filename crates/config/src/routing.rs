use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Default number of blocks an upstream may trail the global tip.
pub const DEFAULT_MAX_BLOCKS_BEHIND: u64 = 10;

/// Default failure rate at which the passive checker trips.
pub const DEFAULT_ERROR_RATE: f64 = 0.25;

/// Default window over which request outcomes are counted.
pub(crate) const DEFAULT_DETECTION_WINDOW: Duration = Duration::from_secs(60);

/// Default time a tripped upstream stays unhealthy.
pub(crate) const DEFAULT_BAN_WINDOW: Duration = Duration::from_secs(300);

/// Routing policy for a chain.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoutingConfig {
    /// How many blocks an upstream may trail the global max height and still
    /// be considered near the tip.
    ///
    /// Default: 10
    #[serde(default = "default_max_blocks_behind")]
    pub max_blocks_behind: u64,
    /// Route to an unfiltered upstream rather than failing when every filter
    /// set comes up empty.
    #[serde(default)]
    pub always_route: bool,
    /// Window over which passive request outcomes are counted.
    ///
    /// Default: 60s
    #[serde(default = "default_detection_window", with = "humantime_serde")]
    pub detection_window: Duration,
    /// How long a tripped upstream stays unhealthy.
    ///
    /// Default: 5m
    #[serde(default = "default_ban_window", with = "humantime_serde")]
    pub ban_window: Duration,
    /// Passive error-rate policy. Presence enables enhanced routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorsConfig>,
    /// Passive latency policy. Presence enables enhanced routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_blocks_behind: DEFAULT_MAX_BLOCKS_BEHIND,
            always_route: false,
            detection_window: DEFAULT_DETECTION_WINDOW,
            ban_window: DEFAULT_BAN_WINDOW,
            errors: None,
            latency: None,
        }
    }
}

impl RoutingConfig {
    /// Whether the passive error/latency checker participates in routing.
    pub fn is_enhanced_routing_enabled(&self) -> bool {
        self.errors.is_some() || self.latency.is_some()
    }
}

/// Passive error classification policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorsConfig {
    /// Failure rate over the detection window at which an upstream trips.
    ///
    /// Default: 0.25
    #[serde(default = "default_error_rate")]
    pub rate: f64,
    /// HTTP status code patterns counted as failures. Digits may be wildcarded
    /// with `x`, e.g. `5xx`.
    #[serde(default)]
    pub http_codes: Vec<String>,
    /// JSON-RPC error code patterns counted as failures.
    #[serde(default)]
    pub json_rpc_codes: Vec<String>,
    /// Substrings of error messages counted as failures.
    #[serde(default)]
    pub error_strings: Vec<String>,
}

const fn default_error_rate() -> f64 {
    DEFAULT_ERROR_RATE
}

const fn default_max_blocks_behind() -> u64 {
    DEFAULT_MAX_BLOCKS_BEHIND
}

const fn default_detection_window() -> Duration {
    DEFAULT_DETECTION_WINDOW
}

const fn default_ban_window() -> Duration {
    DEFAULT_BAN_WINDOW
}

/// Passive latency policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LatencyConfig {
    /// Duration above which a request counts as slow, unless the method has
    /// its own threshold.
    #[serde(with = "humantime_serde")]
    pub threshold: Duration,
    /// Per-method threshold overrides.
    #[serde(
        default,
        with = "crate::serde_util::humantime_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub methods: HashMap<String, Duration>,
}

impl LatencyConfig {
    /// The slow-request threshold for `method`.
    pub fn threshold_for(&self, method: &str) -> Duration {
        self.methods.get(method).copied().unwrap_or(self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let routing = RoutingConfig::default();
        assert_eq!(routing.max_blocks_behind, 10);
        assert_eq!(routing.detection_window, Duration::from_secs(60));
        assert_eq!(routing.ban_window, Duration::from_secs(300));
        assert!(!routing.always_route);
        assert!(!routing.is_enhanced_routing_enabled());
    }

    #[test]
    fn enhanced_routing_enabled_by_either_subtree() {
        let routing: RoutingConfig = serde_yaml::from_str(
            r"
            maxBlocksBehind: 4
            detectionWindow: 30s
            banWindow: 2m
            errors:
              httpCodes: [5xx]
            ",
        )
        .unwrap();
        assert!(routing.is_enhanced_routing_enabled());
        assert_eq!(routing.errors.as_ref().unwrap().rate, DEFAULT_ERROR_RATE);

        let routing: RoutingConfig = serde_yaml::from_str(
            r"
            maxBlocksBehind: 4
            detectionWindow: 30s
            banWindow: 2m
            latency:
              threshold: 500ms
              methods:
                eth_getLogs: 4s
            ",
        )
        .unwrap();
        assert!(routing.is_enhanced_routing_enabled());
        let latency = routing.latency.unwrap();
        assert_eq!(latency.threshold_for("eth_getLogs"), Duration::from_secs(4));
        assert_eq!(latency.threshold_for("eth_call"), Duration::from_millis(500));
    }
}
