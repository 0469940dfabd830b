//! Response caching for cacheable JSON-RPC lookups.
//!
//! The cache sits between the request executor and the origin call. A chain
//! picks one of two modes at wiring time: **coalesced**, where concurrent
//! lookups for the same key share a single origin call through a
//! single-flight registry, or **parallel**, where every miss goes to origin
//! and the write happens fire-and-forget. Reads and writes may use different
//! backends; any backend failure falls through to the origin so a cache
//! outage never takes the gateway down with it.

mod backend;
mod coalesce;
mod key;
mod rpc_cache;

pub use backend::{CacheBackend, MemoryBackend, RedisBackend};
pub use key::cache_key;
pub use rpc_cache::{OriginResponse, RpcCache};

use std::sync::Arc;

/// Errors surfaced by cache lookups.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The cache infrastructure failed; callers fall through to origin.
    #[error("cache backend error: {0}")]
    Backend(Arc<str>),
    /// The shared origin call failed; every coalesced waiter sees this.
    #[error("origin call failed: {0}")]
    Origin(Arc<str>),
}

impl CacheError {
    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into().into())
    }

    pub(crate) fn origin(message: impl Into<String>) -> Self {
        Self::Origin(message.into().into())
    }
}
