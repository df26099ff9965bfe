//! Embedding cache backends
//!
//! Key -> vector store with per-entry TTL. A backend failure is always
//! reported as a miss, never surfaced to callers. Three interchangeable
//! backends: Redis (shared across processes), moka (bounded in-process),
//! and disabled.

use crate::config::{CacheBackend, CacheConfig};
use crate::error::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Key -> embedding vector cache
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Look up a cached vector. A backend error is indistinguishable from a miss.
    async fn get(&self, key: &str) -> Option<Vec<f32>>;

    /// Store a vector with a per-entry TTL. Best effort.
    async fn set(&self, key: &str, value: Vec<f32>, ttl: Duration);
}

/// Construct the configured cache backend.
///
/// An unknown backend string is rejected earlier, when `CacheBackend` is
/// parsed from configuration, so misconfiguration fails at startup rather
/// than at request time.
pub async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn EmbeddingCache>> {
    match config.backend {
        CacheBackend::Redis => Ok(Arc::new(
            RedisEmbeddingCache::connect(&config.redis_url, &config.key_prefix).await?,
        )),
        CacheBackend::Memory => Ok(Arc::new(InProcessCache::new(config.max_size))),
        CacheBackend::Disabled => Ok(Arc::new(DisabledCache)),
    }
}

/// Serialize a vector as fixed-width little-endian f32 bytes
fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Inverse of [`vector_to_bytes`]; trailing partial chunks are dropped
fn bytes_to_vector(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Shared embedding cache backed by Redis
///
/// TTL is delegated to Redis' native key expiry. Also carries a named
/// distributed lock for cross-process coordination; the core read/write
/// paths do not use it.
#[derive(Clone)]
pub struct RedisEmbeddingCache {
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisEmbeddingCache {
    /// Connect and ping. An unreachable Redis is a startup error.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_connection_manager().await?;

        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        info!("Connected to Redis embedding cache");

        Ok(RedisEmbeddingCache {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Acquire a named lock with an expiry. Returns a release token, or
    /// None when the lock is held elsewhere.
    pub async fn acquire_lock(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let token = format!("{:032x}", rand::random::<u128>());
        let key = format!("{}lock:{}", self.prefix, name);
        let mut conn = self.conn.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    /// Release a named lock. Only the holder's token releases it; returns
    /// whether the lock was actually removed.
    pub async fn release_lock(&self, name: &str, token: &str) -> Result<bool> {
        const RELEASE_SCRIPT: &str = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;

        let key = format!("{}lock:{}", self.prefix, name);
        let mut conn = self.conn.clone();

        let released: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(released == 1)
    }
}

#[async_trait]
impl EmbeddingCache for RedisEmbeddingCache {
    async fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<Vec<u8>>>(self.key(key)).await {
            Ok(Some(data)) => Some(bytes_to_vector(&data)),
            Ok(None) => None,
            Err(e) => {
                debug!("Redis cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<f32>, ttl: Duration) {
        let mut conn = self.conn.clone();
        let data = vector_to_bytes(&value);
        if let Err(e) = conn
            .set_ex::<_, _, ()>(self.key(key), data, ttl.as_secs().max(1))
            .await
        {
            warn!("Redis cache write failed: {}", e);
        }
    }
}

#[derive(Clone)]
struct CachedVector {
    vector: Vec<f32>,
    ttl: Duration,
}

/// Expiry policy reading the TTL stored with each entry
struct PerEntryTtl;

impl Expiry<String, CachedVector> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedVector,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-process embedding cache (moka)
///
/// Capacity-bounded with recency-aware eviction; per-entry expiry is checked
/// lazily on read, so an expired entry is evicted and reported as a miss
/// rather than returned stale.
pub struct InProcessCache {
    entries: Cache<String, CachedVector>,
}

impl InProcessCache {
    /// Create a cache holding at most `max_size` entries
    pub fn new(max_size: u64) -> Self {
        InProcessCache {
            entries: Cache::builder()
                .max_capacity(max_size)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

#[async_trait]
impl EmbeddingCache for InProcessCache {
    async fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.entries.get(key).await.map(|entry| entry.vector)
    }

    async fn set(&self, key: &str, value: Vec<f32>, ttl: Duration) {
        self.entries
            .insert(key.to_string(), CachedVector { vector: value, ttl })
            .await;
    }
}

/// Cache backend that never holds anything
///
/// Lets callers bypass caching without branching.
pub struct DisabledCache;

#[async_trait]
impl EmbeddingCache for DisabledCache {
    async fn get(&self, _key: &str) -> Option<Vec<f32>> {
        None
    }

    async fn set(&self, _key: &str, _value: Vec<f32>, _ttl: Duration) {}
}
