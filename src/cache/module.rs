//! Cache module - a named partition of the cache backed by one provider.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::codec::{self, Codec, JsonCodec};
use crate::error::{CacheError, Result};
use crate::providers::Provider;

/// A named cache partition that owns exactly one provider.
///
/// Values go through a structural codec on their way to the provider:
/// only the fields serde serializes survive a round trip, a field marked
/// `#[serde(skip)]` comes back as its `Default`. Do not rely on internal-only
/// state surviving the cache.
pub struct CacheModule {
    identifier: String,
    name: String,
    provider: Box<dyn Provider>,
    codec: Arc<dyn Codec>,
}

impl CacheModule {
    /// Create a module with the default JSON codec.
    ///
    /// The provider is taken as-is; registries call `init` before admission.
    pub fn new(name: impl Into<String>, provider: impl Provider + 'static) -> Self {
        Self::from_boxed(name, Box::new(provider))
    }

    pub fn from_boxed(name: impl Into<String>, provider: Box<dyn Provider>) -> Self {
        let name = name.into();
        Self {
            identifier: Self::identifier_for(&name),
            name,
            provider,
            codec: Arc::new(JsonCodec),
        }
    }

    /// Replace the payload codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Derive the identifier for a module name.
    ///
    /// The name is lowercased and every space becomes `_`, so
    /// `"Orders Cache"` is `"orders_cache"`. Callers may rely on this
    /// mapping to predict identifiers.
    pub fn identifier_for(name: &str) -> String {
        name.replace(' ', "_").to_lowercase()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The human name this module was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider_kind(&self) -> &'static str {
        self.provider.kind()
    }

    /// True once the provider finished initialization successfully.
    pub fn provider_ready(&self) -> bool {
        self.provider.is_ready()
    }

    /// Get a value from the cache.
    ///
    /// Absent keys are [`CacheError::KeyNotFound`], backend failures are
    /// [`CacheError::Provider`] and undecodable payloads are
    /// [`CacheError::Deserialize`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let bytes = self.get_bytes(key).await?;
        self.decode(&bytes)
    }

    /// Insert a value into the cache.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = self.encode(value)?;
        self.put_bytes(key, &bytes).await
    }

    /// Remove a key. Succeeds when the key is absent.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.provider
            .delete(key)
            .await
            .map_err(|e| CacheError::from_provider(&self.identifier, key, e))
    }

    /// Remove every entry of this module. Other modules are untouched.
    pub async fn reset(&self) -> Result<()> {
        self.provider
            .reset()
            .await
            .map_err(|e| CacheError::from_provider(&self.identifier, "*", e))
    }

    pub async fn has_key(&self, key: &str) -> Result<bool> {
        self.provider
            .has_key(key)
            .await
            .map_err(|e| CacheError::from_provider(&self.identifier, key, e))
    }

    pub(crate) async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.provider
            .get(key)
            .await
            .map_err(|e| CacheError::from_provider(&self.identifier, key, e))
    }

    pub(crate) async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.provider
            .set(key, bytes)
            .await
            .map_err(|e| CacheError::from_provider(&self.identifier, key, e))
    }

    pub(crate) fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        codec::encode(self.codec.as_ref(), value)
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        codec::decode(self.codec.as_ref(), bytes)
    }
}

impl std::fmt::Debug for CacheModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheModule")
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .field("provider", &self.provider.kind())
            .field("codec", &self.codec.name())
            .finish()
    }
}
