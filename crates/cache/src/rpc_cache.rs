use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use gateway_config::{CacheMode, ChainCacheConfig};

use crate::{
    backend::{CacheBackend, RedisBackend},
    cache_key,
    coalesce::{wait, OnceOutcome, Role, SingleFlight},
    CacheError,
};

/// What the origin produced for a cacheable lookup.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// The response body to hand back (and possibly store).
    pub body: Bytes,
    /// Whether the body may be stored. JSON-RPC level errors are surfaced
    /// but never cached.
    pub cacheable: bool,
}

/// The response cache for one chain.
///
/// Lookup flow depends on the configured [`CacheMode`]; see the crate docs.
pub struct RpcCache {
    chain_name: String,
    config: ChainCacheConfig,
    read: Arc<dyn CacheBackend>,
    write: Arc<dyn CacheBackend>,
    single_flight: SingleFlight,
}

impl std::fmt::Debug for RpcCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCache")
            .field("chain_name", &self.chain_name)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

// === impl RpcCache ===

impl RpcCache {
    /// Creates a cache over explicit backends.
    pub fn new(
        chain_name: impl Into<String>,
        config: ChainCacheConfig,
        read: Arc<dyn CacheBackend>,
        write: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            config,
            read,
            write,
            single_flight: SingleFlight::default(),
        }
    }

    /// Connects the configured redis backends. Returns `None` when the chain
    /// has no cache endpoint configured.
    pub async fn from_config(
        chain_name: &str,
        config: &ChainCacheConfig,
    ) -> Result<Option<Self>, CacheError> {
        let (Some(read_url), Some(write_url)) = (config.read_url(), config.write_url()) else {
            return Ok(None);
        };
        let read = RedisBackend::connect(read_url).await?;
        let write = if write_url == read_url {
            read.clone()
        } else {
            RedisBackend::connect(write_url).await?
        };
        Ok(Some(Self::new(chain_name, config.clone(), Arc::new(read), Arc::new(write))))
    }

    /// Whether responses for `method` may be served from or stored in this
    /// cache.
    pub fn is_cacheable(&self, method: &str) -> bool {
        self.config.is_cacheable(method)
    }

    /// Serves a cacheable single request, calling `build` for the origin
    /// round-trip on a miss.
    ///
    /// `build` reports origin failures as strings so coalesced waiters can
    /// share them; the executor keeps its own typed error for the caller
    /// that actually ran the build.
    pub async fn handle_request<F, Fut>(
        &self,
        method: &str,
        params: Option<&Value>,
        build: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<OriginResponse, String>> + Send,
    {
        let key = cache_key(&self.chain_name, method, params);
        let ttl = self.config.ttl_for(method);
        match self.config.mode {
            CacheMode::Coalesced => self.handle_coalesced(&key, ttl, build).await,
            CacheMode::Parallel => self.handle_parallel(&key, ttl, build).await,
        }
    }

    async fn handle_coalesced<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        build: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<OriginResponse, String>> + Send,
    {
        let mut build = Some(build);
        loop {
            match self.read.get(key).await {
                Ok(Some(hit)) => {
                    self.record_hit();
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(err) => {
                    // Cache down: go to origin directly, skip coalescing.
                    warn!(target: "cache", %key, %err, "cache read failed, falling through");
                    let build = build.take().expect("present until built");
                    return match build().await {
                        Ok(response) => Ok(response.body),
                        Err(message) => Err(CacheError::origin(message)),
                    };
                }
            }
            self.record_miss();

            match self.single_flight.join(key) {
                Role::Builder(completion) => {
                    let build = build.take().expect("a caller builds at most once");
                    return match build().await {
                        Ok(response) => {
                            if response.cacheable {
                                if let Err(err) =
                                    self.write.set_with_ttl(key, response.body.clone(), ttl).await
                                {
                                    warn!(target: "cache", %key, %err, "cache write failed");
                                }
                            }
                            completion.resolve(Ok(response.body.clone()));
                            Ok(response.body)
                        }
                        Err(message) => {
                            let err = CacheError::origin(message);
                            completion.resolve(Err(err.clone()));
                            Err(err)
                        }
                    };
                }
                Role::Waiter(rx) => match wait(rx).await {
                    OnceOutcome::Resolved(result) => {
                        self.record_hit();
                        return result;
                    }
                    // Builder went away; start over (and possibly build).
                    OnceOutcome::Cancelled => {}
                },
            }
        }
    }

    async fn handle_parallel<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        build: F,
    ) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<OriginResponse, String>> + Send,
    {
        match self.read.get(key).await {
            Ok(Some(hit)) => {
                self.record_hit();
                return Ok(hit);
            }
            Ok(None) => self.record_miss(),
            Err(err) => {
                warn!(target: "cache", %key, %err, "cache read failed, falling through");
            }
        }

        match build().await {
            Ok(response) => {
                if response.cacheable {
                    // Fire-and-forget write; its failure never reaches the caller.
                    let write = Arc::clone(&self.write);
                    let key = key.to_string();
                    let body = response.body.clone();
                    tokio::spawn(async move {
                        if let Err(err) = write.set_if_not_exists(&key, body, ttl).await {
                            debug!(target: "cache", %key, %err, "background cache write failed");
                        }
                    });
                }
                Ok(response.body)
            }
            Err(message) => Err(CacheError::origin(message)),
        }
    }

    fn record_hit(&self) {
        counter!("gateway_cache_hits_total", "chain" => self.chain_name.clone()).increment(1);
    }

    fn record_miss(&self) {
        counter!("gateway_cache_misses_total", "chain" => self.chain_name.clone()).increment(1);
    }
}
