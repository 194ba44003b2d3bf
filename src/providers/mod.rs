//! Storage providers.
//!
//! A provider stores opaque byte payloads for exactly one cache module.
//! New backends implement [`Provider`]; the core never looks inside a payload.
//!
//! # Feature Flags
//!
//! - always built: [`MemoryProvider`] on top of Moka
//! - `redis`: [`RedisProvider`], a remote key-value cache
//! - `mongo`: [`MongoProvider`], a document store used as a key-value cache

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

mod memory;
#[cfg(feature = "mongo")]
mod mongo;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryProvider;
#[cfg(feature = "mongo")]
pub use mongo::MongoProvider;
#[cfg(feature = "redis")]
pub use redis::RedisProvider;

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Contract every storage backend satisfies.
///
/// `init` runs once, before the owning module is admitted to a registry.
/// All other operations must be safe to call concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short backend name used in logs.
    fn kind(&self) -> &'static str;

    /// Prepares the backend. `ttl` is the provider-level entry lifetime, if any.
    async fn init(&mut self, ttl: Option<Duration>) -> ProviderResult<()>;

    /// True once `init` completed successfully.
    fn is_ready(&self) -> bool;

    /// Returns the payload for `key`, or [`ProviderError::NotFound`].
    async fn get(&self, key: &str) -> ProviderResult<Vec<u8>>;

    /// Stores `value` under `key`, replacing any previous payload.
    async fn set(&self, key: &str, value: &[u8]) -> ProviderResult<()>;

    /// Removes `key`. Succeeds when the key is absent.
    async fn delete(&self, key: &str) -> ProviderResult<()>;

    /// Removes every entry owned by this provider.
    async fn reset(&self) -> ProviderResult<()>;

    /// Checks whether `key` is present.
    async fn has_key(&self, key: &str) -> ProviderResult<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Box<P> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    async fn init(&mut self, ttl: Option<Duration>) -> ProviderResult<()> {
        (**self).init(ttl).await
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn get(&self, key: &str) -> ProviderResult<Vec<u8>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> ProviderResult<()> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        (**self).delete(key).await
    }

    async fn reset(&self) -> ProviderResult<()> {
        (**self).reset().await
    }

    async fn has_key(&self, key: &str) -> ProviderResult<bool> {
        (**self).has_key(key).await
    }
}

/// Test doubles shared by the unit tests of the cache, gate and context modules.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Provider whose failures are switched on from the test.
    #[derive(Clone, Default)]
    pub struct FlakyProvider {
        pub fail_init: Arc<AtomicBool>,
        pub fail_get: Arc<AtomicBool>,
        pub fail_set: Arc<AtomicBool>,
        pub get_calls: Arc<AtomicUsize>,
        inner: Arc<parking_lot::Mutex<Option<MemoryProvider>>>,
    }

    impl FlakyProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_init() -> Self {
            let provider = Self::default();
            provider.fail_init.store(true, Ordering::SeqCst);
            provider
        }

        fn inner(&self) -> ProviderResult<MemoryProvider> {
            self.inner.lock().clone().ok_or(ProviderError::NotInitialized)
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn init(&mut self, ttl: Option<Duration>) -> ProviderResult<()> {
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(ProviderError::ConnectionFailed("init refused".into()));
            }
            let mut memory = MemoryProvider::default();
            memory.init(ttl).await?;
            *self.inner.lock() = Some(memory);
            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.inner.lock().is_some()
        }

        async fn get(&self, key: &str) -> ProviderResult<Vec<u8>> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(ProviderError::OperationFailed("get refused".into()));
            }
            self.inner()?.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> ProviderResult<()> {
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(ProviderError::OperationFailed("set refused".into()));
            }
            self.inner()?.set(key, value).await
        }

        async fn delete(&self, key: &str) -> ProviderResult<()> {
            self.inner()?.delete(key).await
        }

        async fn reset(&self) -> ProviderResult<()> {
            self.inner()?.reset().await
        }
    }
}
