use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::CacheError;

/// Time allowed for establishing the redis connection.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed per redis command.
const REDIS_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// Storage the cache reads from and writes to.
///
/// Read and write backends are wired independently so reads can go to a
/// replica while writes go to the primary.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Fetches a value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores a value with a TTL, overwriting.
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration)
        -> Result<(), CacheError>;

    /// Stores a value with a TTL only if the key is vacant.
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// Redis-backed storage using a managed async connection.
#[derive(Clone)]
pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

// === impl RedisBackend ===

impl RedisBackend {
    /// Connects to `url`, bounded by the connect timeout.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|err| CacheError::backend(err.to_string()))?;
        let manager = tokio::time::timeout(
            REDIS_CONNECT_TIMEOUT,
            redis::aio::ConnectionManager::new(client),
        )
        .await
        .map_err(|_| CacheError::backend(format!("timed out connecting to {url}")))?
        .map_err(|err| CacheError::backend(err.to_string()))?;
        Ok(Self { manager })
    }

    async fn run(&self, cmd: redis::Cmd) -> Result<redis::Value, CacheError> {
        let mut conn = self.manager.clone();
        tokio::time::timeout(REDIS_OP_TIMEOUT, cmd.query_async(&mut conn))
            .await
            .map_err(|_| CacheError::backend("redis command timed out"))?
            .map_err(|err| CacheError::backend(err.to_string()))
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        match self.run(cmd).await? {
            redis::Value::Nil => Ok(None),
            redis::Value::Data(data) => Ok(Some(Bytes::from(data))),
            other => Err(CacheError::backend(format!("unexpected GET reply: {other:?}"))),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref()).arg("EX").arg(ttl.as_secs().max(1));
        self.run(cmd).await.map(|_| ())
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref()).arg("EX").arg(ttl.as_secs().max(1)).arg("NX");
        self.run(cmd).await.map(|_| ())
    }
}

/// In-process storage for tests and cache-less development setups.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (Bytes, Instant)>>,
}

// === impl MemoryBackend ===

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_live(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.get_live(key))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires = Instant::now() + ttl;
        self.entries.lock().insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if self.get_live(key).is_some() {
            debug!(target: "cache", %key, "set-nx skipped, key live");
            return Ok(());
        }
        self.set_with_ttl(key, value, ttl).await
    }
}
