use std::path::PathBuf;

/// Errors produced while loading or validating a gateway configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid YAML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// A chain declares two upstreams with the same id.
    #[error("chain {chain}: duplicate upstream id {id}")]
    DuplicateUpstreamId {
        /// Chain name.
        chain: String,
        /// Offending upstream id.
        id: String,
    },
    /// Two groups on a chain share a priority.
    #[error("chain {chain}: groups {first} and {second} share priority {priority}")]
    DuplicateGroupPriority {
        /// Chain name.
        chain: String,
        /// First group id.
        first: String,
        /// Second group id.
        second: String,
        /// The shared priority.
        priority: u32,
    },
    /// An upstream references a group that is not declared.
    #[error("chain {chain}: upstream {upstream} references unknown group {group}")]
    UnknownGroup {
        /// Chain name.
        chain: String,
        /// Offending upstream id.
        upstream: String,
        /// Missing group id.
        group: String,
    },
    /// `useWsForBlockHeight` requires a websocket url.
    #[error("chain {chain}: upstream {upstream} uses ws for block height but has no wsUrl")]
    MissingWsUrl {
        /// Chain name.
        chain: String,
        /// Offending upstream id.
        upstream: String,
    },
    /// An upstream url did not parse.
    #[error("chain {chain}: upstream {upstream} has invalid url {url}: {source}")]
    InvalidUrl {
        /// Chain name.
        chain: String,
        /// Offending upstream id.
        upstream: String,
        /// The rejected url.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// A cache TTL below one second was configured.
    #[error("chain {chain}: cache ttl for {method} is below the 1s minimum")]
    TtlTooShort {
        /// Chain name.
        chain: String,
        /// Offending method, or `default` for the chain default.
        method: String,
    },
    /// An error rate outside `0.0..=1.0`.
    #[error("chain {chain}: error rate {rate} is not within 0.0..=1.0")]
    InvalidErrorRate {
        /// Chain name.
        chain: String,
        /// The rejected rate.
        rate: f64,
    },
    /// A chain without upstreams cannot route anything.
    #[error("chain {chain}: no upstreams configured")]
    NoUpstreams {
        /// Chain name.
        chain: String,
    },
    /// Two chains share a name.
    #[error("duplicate chain name {0}")]
    DuplicateChainName(String),
}
