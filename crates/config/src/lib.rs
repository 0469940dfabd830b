//! Configuration for the gateway.
//!
//! The top-level [`GatewayConfig`] is loaded from a YAML file and validated
//! before any chain is wired up. Each [`ChainConfig`] describes the upstreams
//! the gateway can forward to, how they are grouped and prioritized, and the
//! optional cache and routing policies for that chain.

mod cache;
mod chain;
mod error;
mod routing;
mod serde_util;
mod upstream;
mod validate;

pub use cache::{CacheMode, ChainCacheConfig};
pub use chain::{ChainConfig, GatewayConfig};
pub use error::ConfigError;
pub use routing::{
    ErrorsConfig, LatencyConfig, RoutingConfig, DEFAULT_ERROR_RATE, DEFAULT_MAX_BLOCKS_BEHIND,
};
pub use upstream::{
    BasicAuthConfig, GroupConfig, HeaderConfig, MethodsConfig, NodeType, UpstreamConfig,
};

/// Default port the gateway listens on for JSON-RPC traffic.
pub const DEFAULT_PORT: u16 = 8080;

/// Default port the Prometheus exporter binds to.
pub const DEFAULT_METRICS_PORT: u16 = 9090;
