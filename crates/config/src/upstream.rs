use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Configuration for a single upstream node.
///
/// Upstreams are immutable once loaded; the router only ever reads them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Unique identifier of the upstream within its chain.
    pub id: String,
    /// HTTP endpoint requests are forwarded to.
    pub http_url: String,
    /// Optional websocket endpoint, required when `use_ws_for_block_height` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Group this upstream belongs to. Upstreams without a group are routed at
    /// the highest priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Whether this node keeps full historical state.
    #[serde(default)]
    pub node_type: NodeType,
    /// Basic-auth credentials applied to outbound requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthConfig>,
    /// Per-upstream method policy.
    #[serde(default)]
    pub methods: MethodsConfig,
    /// Extra headers applied to every outbound request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<HeaderConfig>,
    /// Subscribe to `newHeads` over websocket instead of polling for the tip.
    #[serde(default)]
    pub use_ws_for_block_height: bool,
    /// Skip the `net_peerCount` probe for this upstream.
    #[serde(default)]
    pub skip_peer_count_check: bool,
}

impl UpstreamConfig {
    /// Returns `true` if this upstream serves historical state for arbitrary
    /// blocks.
    pub fn is_archive(&self) -> bool {
        self.node_type == NodeType::Archive
    }
}

/// The kind of node behind an upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Recent state only.
    #[default]
    Full,
    /// Full historical state.
    Archive,
}

/// Basic-auth credentials for an upstream.
///
/// The header is only attached when both fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuthConfig {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Per-upstream method policy.
///
/// `enabled` opts a full node into archive-class methods it is known to
/// serve; `disabled` blocks methods outright.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MethodsConfig {
    /// Methods explicitly allowed on this upstream.
    #[serde(default)]
    pub enabled: HashSet<String>,
    /// Methods never routed to this upstream.
    #[serde(default)]
    pub disabled: HashSet<String>,
}

/// A single request header applied to outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderConfig {
    /// Header name.
    pub key: String,
    /// Header value.
    pub value: String,
}

/// A named cohort of upstreams sharing a routing priority.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// Group identifier referenced by [`UpstreamConfig::group`].
    pub id: String,
    /// Routing priority, `0` is tried first. Unique per chain.
    pub priority: u32,
}
