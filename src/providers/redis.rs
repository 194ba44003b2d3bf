//! Redis provider.
//!
//! Every key is stored as `{namespace}:{key}`, so several modules can share
//! one Redis database. `reset` only removes the provider's own namespace.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{Provider, ProviderResult};
use crate::error::ProviderError;

/// Keys fetched per SCAN round during `reset`.
const SCAN_BATCH: usize = 200;

pub struct RedisProvider {
    url: String,
    namespace: String,
    ttl: Option<Duration>,
    conn: Option<ConnectionManager>,
}

impl RedisProvider {
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `namespace` - Prefix shared by every key of this provider
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: namespace.into(),
            ttl: None,
            conn: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn conn(&self) -> ProviderResult<ConnectionManager> {
        self.conn.clone().ok_or(ProviderError::NotInitialized)
    }
}

/// Maps Redis errors to ProviderError.
fn map_redis_error(err: redis::RedisError) -> ProviderError {
    if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        ProviderError::ConnectionFailed(err.to_string())
    } else {
        ProviderError::OperationFailed(err.to_string())
    }
}

#[async_trait]
impl Provider for RedisProvider {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn init(&mut self, ttl: Option<Duration>) -> ProviderResult<()> {
        let client = redis::Client::open(self.url.as_str()).map_err(map_redis_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;

        self.ttl = ttl;
        self.conn = Some(conn);
        info!("Connected to Redis for namespace '{}'", self.namespace);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.conn.is_some()
    }

    async fn get(&self, key: &str) -> ProviderResult<Vec<u8>> {
        let mut conn = self.conn()?;
        let result: Option<Vec<u8>> = conn.get(self.key(key)).await.map_err(map_redis_error)?;
        result.ok_or_else(|| ProviderError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> ProviderResult<()> {
        let mut conn = self.conn()?;
        match self.ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(self.key(key), value, seconds)
                    .await
                    .map_err(map_redis_error)?;
            }
            None => {
                conn.set::<_, _, ()>(self.key(key), value)
                    .await
                    .map_err(map_redis_error)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        let mut conn = self.conn()?;
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(map_redis_error)
    }

    async fn reset(&self) -> ProviderResult<()> {
        let mut conn = self.conn()?;
        let pattern = format!("{}:*", self.namespace);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(&keys).await.map_err(map_redis_error)?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Reset namespace '{}', {} keys removed", self.namespace, removed);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> ProviderResult<bool> {
        let mut conn = self.conn()?;
        conn.exists(self.key(key)).await.map_err(map_redis_error)
    }
}

impl std::fmt::Debug for RedisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisProvider")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    /// Helper to get Redis URL from environment.
    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    /// Namespace unique to one test run.
    fn test_namespace(suffix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("test:cacheable:{}:{}:{}", std::process::id(), nanos, suffix)
    }

    /// Skip test if Redis not available.
    async fn get_test_provider(suffix: &str, ttl: Option<Duration>) -> Option<RedisProvider> {
        let mut provider = RedisProvider::new(redis_url(), test_namespace(suffix));
        provider.init(ttl).await.ok()?;
        Some(provider)
    }

    #[tokio::test]
    async fn test_redis_requires_init() {
        let provider = RedisProvider::new(redis_url(), "unused");
        assert!(!provider.is_ready());
        assert_eq!(
            provider.get("k").await.unwrap_err(),
            ProviderError::NotInitialized
        );
    }

    #[tokio::test]
    async fn test_redis_set_and_get() {
        let Some(provider) = get_test_provider("set_get", None).await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        provider.set("greeting", b"hello world").await.unwrap();
        assert_eq!(provider.get("greeting").await.unwrap(), b"hello world".to_vec());
        assert!(provider.has_key("greeting").await.unwrap());

        provider.delete("greeting").await.unwrap();
        assert!(provider.get("greeting").await.unwrap_err().is_not_found());
        assert!(!provider.has_key("greeting").await.unwrap());
    }

    #[tokio::test]
    async fn test_redis_reset_keeps_other_namespaces() {
        let Some(first) = get_test_provider("reset_a", None).await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };
        let Some(second) = get_test_provider("reset_b", None).await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        first.set("a", b"1").await.unwrap();
        first.set("b", b"2").await.unwrap();
        second.set("a", b"3").await.unwrap();

        first.reset().await.unwrap();

        assert!(first.get("a").await.unwrap_err().is_not_found());
        assert!(first.get("b").await.unwrap_err().is_not_found());
        assert_eq!(second.get("a").await.unwrap(), b"3".to_vec());

        second.reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_ttl() {
        let Some(provider) = get_test_provider("ttl", Some(Duration::from_secs(1))).await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        provider.set("expiring", b"value").await.unwrap();
        assert!(provider.has_key("expiring").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(provider.get("expiring").await.unwrap_err().is_not_found());
    }
}
