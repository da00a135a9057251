//! Statistics cache handed explicitly to the services that read aggregate
//! numbers. Entries live for at most the configured TTL (plus jitter) and
//! are deleted by the write paths that change the underlying rows.

pub mod keys;
mod memory;

use std::time::Duration;

use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use memory::MemoryCache;

use crate::config::Config;

const TTL_JITTER_RATIO: f64 = 0.1;

#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(connection))
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn.get(key).await.ok()?;
        payload
    }

    async fn set_raw(&self, key: &str, payload: String, ttl: Duration) {
        let mut conn = self.connection.clone();
        if !ttl.is_zero() {
            let ttl_secs = ttl.as_secs().max(1);
            let _: Result<(), _> = conn.set_ex(key, payload, ttl_secs).await;
        } else {
            let _: Result<(), _> = conn.set(key, payload).await;
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.connection.clone();
        let _: Result<u64, _> = conn.del(key).await;
    }

    pub async fn is_connected(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

#[derive(Clone)]
pub enum CacheBackend {
    Memory(MemoryCache),
    Redis(RedisCache),
    Disabled,
}

#[derive(Clone)]
pub struct StatsCache {
    backend: CacheBackend,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(backend: CacheBackend, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn memory(ttl: Duration) -> Self {
        Self::new(CacheBackend::Memory(MemoryCache::new()), ttl)
    }

    pub fn disabled() -> Self {
        Self::new(CacheBackend::Disabled, Duration::ZERO)
    }

    /// Redis when `REDIS_URL` is set and reachable, process memory otherwise.
    pub async fn from_config(config: &Config) -> Self {
        if let Some(url) = config.redis_url.as_deref() {
            match RedisCache::connect(url).await {
                Ok(redis) => {
                    if redis.is_connected().await {
                        tracing::info!("stats cache backed by redis");
                        return Self::new(CacheBackend::Redis(redis), config.stats_cache_ttl);
                    }
                    tracing::warn!("redis did not answer PING, using in-process stats cache");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "redis unavailable, using in-process stats cache");
                }
            }
        }
        Self::memory(config.stats_cache_ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let payload = match &self.backend {
            CacheBackend::Memory(memory) => memory.get_raw(key),
            CacheBackend::Redis(redis) => redis.get_raw(key).await,
            CacheBackend::Disabled => None,
        }?;
        serde_json::from_str(&payload).ok()
    }

    pub async fn set<T>(&self, key: &str, value: &T)
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(_) => return,
        };
        let ttl = if self.ttl.is_zero() {
            self.ttl
        } else {
            apply_ttl_jitter(self.ttl)
        };

        match &self.backend {
            CacheBackend::Memory(memory) => memory.set_raw(key, payload, ttl),
            CacheBackend::Redis(redis) => redis.set_raw(key, payload, ttl).await,
            CacheBackend::Disabled => {}
        }
    }

    pub async fn delete(&self, key: &str) {
        match &self.backend {
            CacheBackend::Memory(memory) => memory.delete(key),
            CacheBackend::Redis(redis) => redis.delete(key).await,
            CacheBackend::Disabled => {}
        }
    }
}

fn apply_ttl_jitter(ttl: Duration) -> Duration {
    let base_ms = ttl.as_millis() as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0 - TTL_JITTER_RATIO..=1.0 + TTL_JITTER_RATIO);
    let jittered_ms = (base_ms * factor).round().max(1.0);
    Duration::from_millis(jittered_ms as u64)
}
