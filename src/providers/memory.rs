//! In-memory provider backed by Moka.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use tracing::debug;

use super::{Provider, ProviderResult};
use crate::cache::ProviderConfig;
use crate::error::ProviderError;

/// In-memory provider over a Moka cache.
///
/// This provider is:
/// - Thread-safe (Moka shards its internal maps)
/// - Bounded by `max_capacity`, evicting by Moka's own policy
/// - Clone-friendly (cloning is cheap, shares the same underlying cache)
///
/// The Moka cache is only built by [`Provider::init`]; before that every
/// operation fails with [`ProviderError::NotInitialized`].
#[derive(Clone)]
pub struct MemoryProvider {
    config: ProviderConfig,
    inner: Option<Cache<String, Arc<[u8]>>>,
}

impl MemoryProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            inner: None,
        }
    }

    /// Approximate number of stored entries.
    ///
    /// Note: This may not be perfectly accurate due to concurrent operations.
    pub fn entry_count(&self) -> u64 {
        self.inner.as_ref().map_or(0, Cache::entry_count)
    }

    fn cache(&self) -> ProviderResult<&Cache<String, Arc<[u8]>>> {
        self.inner.as_ref().ok_or(ProviderError::NotInitialized)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(ProviderConfig::default())
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn init(&mut self, ttl: Option<Duration>) -> ProviderResult<()> {
        let mut builder = Cache::builder().max_capacity(self.config.max_capacity);

        // The module-level lifetime wins over the preset one
        if let Some(ttl) = ttl.or(self.config.ttl) {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = self.config.tti {
            builder = builder.time_to_idle(tti);
        }

        debug!(
            "Memory provider initialized (capacity={}, ttl={:?})",
            self.config.max_capacity,
            ttl.or(self.config.ttl)
        );
        self.inner = Some(builder.build());
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.is_some()
    }

    async fn get(&self, key: &str) -> ProviderResult<Vec<u8>> {
        self.cache()?
            .get(key)
            .map(|value| value.to_vec())
            .ok_or_else(|| ProviderError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> ProviderResult<()> {
        self.cache()?.insert(key.to_string(), Arc::from(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        self.cache()?.invalidate(key);
        Ok(())
    }

    async fn reset(&self) -> ProviderResult<()> {
        self.cache()?.invalidate_all();
        Ok(())
    }

    async fn has_key(&self, key: &str) -> ProviderResult<bool> {
        Ok(self.cache()?.contains_key(key))
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("config", &self.config)
            .field("ready", &self.inner.is_some())
            .field("entry_count", &self.entry_count())
            .finish()
    }
}
