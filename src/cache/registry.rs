//! Module registry - Central ownership of every cache module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::CacheModule;
use crate::error::{CacheError, Result};
use crate::providers::Provider;

/// Shared handle to a registered module.
pub type ModuleRef = Arc<CacheModule>;

/// Central registry for managing cache modules by identifier.
///
/// Identifiers are unique: two names that normalize to the same identifier
/// are a conflict, never an overwrite. A failed admission leaves the
/// registry exactly as it was.
///
/// ## Example
///
/// ```rust,no_run
/// # async fn run() -> cacheable::Result<()> {
/// use cacheable::{MemoryProvider, ModuleRegistry};
///
/// let registry = ModuleRegistry::new();
/// registry.add_module("orders cache", MemoryProvider::default(), None).await?;
///
/// registry.set("orders_cache", "total", &42u32).await?;
/// let total: u32 = registry.get("orders_cache", "total").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<HashMap<String, ModuleRef>>>,
}

impl ModuleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        debug!("Module registry initialized");
        Self {
            modules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Initialize `provider` and register it as a new module called `name`.
    ///
    /// The provider is initialized first; if that fails the module is not
    /// added and the provider error is returned. A name whose identifier is
    /// already taken fails with [`CacheError::ModuleConflict`].
    pub async fn add_module(
        &self,
        name: &str,
        provider: impl Provider + 'static,
        ttl: Option<Duration>,
    ) -> Result<ModuleRef> {
        let mut provider: Box<dyn Provider> = Box::new(provider);
        let identifier = CacheModule::identifier_for(name);

        if let Err(e) = provider.init(ttl).await {
            warn!("Provider init failed for module '{}': {}", identifier, e);
            return Err(CacheError::Provider {
                module: identifier,
                source: e,
            });
        }

        self.admit(CacheModule::from_boxed(name, provider))
    }

    /// Register an already constructed module.
    ///
    /// The provider's `init` is not called here. A module whose provider is
    /// not ready is admitted, but the memoization gate refuses to use it.
    pub fn admit(&self, module: CacheModule) -> Result<ModuleRef> {
        let mut modules = self.modules.write();

        if modules.contains_key(module.identifier()) {
            return Err(CacheError::ModuleConflict(module.identifier().to_string()));
        }

        let module = Arc::new(module);
        modules.insert(module.identifier().to_string(), Arc::clone(&module));

        info!(
            "Registered cache module '{}' ({} provider)",
            module.identifier(),
            module.provider_kind()
        );
        Ok(module)
    }

    /// Find a module by its identifier.
    pub fn find_module(&self, identifier: &str) -> Result<ModuleRef> {
        self.modules
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| CacheError::ModuleNotFound(identifier.to_string()))
    }

    /// Check if a module with the given identifier exists.
    pub fn contains_module(&self, identifier: &str) -> bool {
        self.modules.read().contains_key(identifier)
    }

    /// Get the number of registered modules.
    pub fn modules_count(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Sorted list of all registered identifiers.
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.modules.read().keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    /// Get a value from a module.
    pub async fn get<T: DeserializeOwned>(&self, module_id: &str, key: &str) -> Result<T> {
        self.find_module(module_id)?.get(key).await
    }

    /// Store a value in a module.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        module_id: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        self.find_module(module_id)?.set(key, value).await
    }

    /// Remove a key from a module.
    pub async fn delete_key(&self, module_id: &str, key: &str) -> Result<()> {
        self.find_module(module_id)?.delete(key).await
    }

    /// Clear every entry of one module.
    pub async fn reset(&self, module_id: &str) -> Result<()> {
        self.find_module(module_id)?.reset().await
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("module_count", &self.modules_count())
            .field("identifiers", &self.identifiers())
            .finish()
    }
}
