//! Cache-aside storage for assembled search results.
//!
//! [`CacheStore`] mirrors the external key-value protocol (`GET`, `SET` with a TTL,
//! `EXPIRE`, `DEL`). [`RedisStore`] speaks it to a Redis server, [`MemoryStore`]
//! keeps entries in process. [`ResultCache`] layers the key scheme and the JSON
//! value format on top of either. Entries are always replaced wholesale.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::models::AggregateResult;

pub const KEY_PREFIX: &str = "search:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cached value for {key} is unreadable: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Reset the time to live of an existing key; returns whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process [`CacheStore`]; expiry is checked on read, nothing sweeps in the background
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// [`CacheStore`] backed by a Redis server.
///
/// The connection manager reconnects on its own after a dropped connection; commands
/// issued while the server is away fail with [`CacheError::Unavailable`].
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Unavailable(format!(
                    "no connection to {} within {:?}",
                    url, connect_timeout
                ))
            })??;

        Ok(Self { conn })
    }
}

/// Redis counts expiry in whole seconds; anything shorter would mean "no expiry" or an error.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

pub fn cache_key(normalized_query: &str) -> String {
    format!("{}{}", KEY_PREFIX, normalized_query)
}

/// Typed view over a [`CacheStore`] holding [`AggregateResult`] values
pub struct ResultCache {
    store: Box<dyn CacheStore>,
}

impl ResultCache {
    pub fn new(store: impl CacheStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Redis when `cfg.url` is set and reachable, process memory otherwise
    pub async fn connect(cfg: &CacheConfig) -> Self {
        let Some(url) = cfg.url.as_deref() else {
            info!("No [cache] url configured, caching in memory");
            return Self::in_memory();
        };

        match RedisStore::connect(url, cfg.connect_timeout()).await {
            Ok(store) => {
                info!("Connected to Redis cache");
                Self::new(store)
            }
            Err(err) => {
                warn!("Falling back to the in-memory cache: {}", err);
                Self::in_memory()
            }
        }
    }

    pub async fn get(&self, normalized_query: &str) -> Result<Option<AggregateResult>, CacheError> {
        let key = cache_key(normalized_query);
        match self.store.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| CacheError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    pub async fn put(
        &self,
        normalized_query: &str,
        result: &AggregateResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = cache_key(normalized_query);
        let raw = match serde_json::to_string(result) {
            Ok(raw) => raw,
            Err(source) => return Err(CacheError::Encode { key, source }),
        };
        self.store.set(&key, raw, ttl).await
    }

    pub async fn invalidate(&self, normalized_query: &str) -> Result<(), CacheError> {
        self.store.delete(&cache_key(normalized_query)).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::models::SourceStatus;
    use crate::scrapers::fakes::listing;

    fn result(query: &str) -> AggregateResult {
        let mut sources = BTreeMap::new();
        sources.insert("x".to_string(), SourceStatus::Success { listings: 1 });
        sources.insert("y".to_string(), SourceStatus::Timeout);

        AggregateResult {
            query: query.to_string(),
            listings: vec![listing("x", "1", "Finka NKVD", 0.1 + 0.2)],
            assembled_at: Utc::now(),
            sources,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = ResultCache::in_memory();
        let stored = result("finka");

        cache
            .put("finka", &stored, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("finka").await.unwrap(), Some(stored));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("finka").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_replaces_the_whole_entry() {
        let cache = ResultCache::in_memory();
        let first = result("finka");
        let mut second = result("finka");
        second.listings.clear();

        cache.put("finka", &first, Duration::from_secs(60)).await.unwrap();
        cache.put("finka", &second, Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("finka").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn values_are_json_under_prefixed_keys() {
        let store = MemoryStore::new();
        store.set("search:finka", "{".to_string(), Duration::from_secs(60)).await.unwrap();
        let cache = ResultCache::new(store);

        let err = cache.get("finka").await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { ref key, .. } if key == "search:finka"));
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = ResultCache::in_memory();
        cache
            .put("finka", &result("finka"), Duration::from_secs(60))
            .await
            .unwrap();

        cache.invalidate("finka").await.unwrap();

        assert_eq!(cache.get("finka").await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_redis_url_is_unavailable() {
        let err = RedisStore::connect("not a redis url", Duration::from_secs(1))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, CacheError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back_to_memory() {
        let cfg = CacheConfig {
            url: Some("not a redis url".to_string()),
            connect_timeout_secs: 1,
        };
        let cache = ResultCache::connect(&cfg).await;
        let stored = result("finka");

        cache.put("finka", &stored, Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("finka").await.unwrap(), Some(stored));
    }

    #[test]
    fn redis_ttl_is_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(300)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(900)), 900);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_extends_only_live_keys() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string(), Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.expire("k", Duration::from_secs(30)).await.unwrap());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!store.expire("k", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }
}
