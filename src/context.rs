//! Application-wide cache context.
//!
//! Owns the module registry, the memoization gate and the event bus, and is
//! the one object an application passes around. Cloning is cheap; every clone
//! shares the same state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheModule, GateStats, Lookup, MemoizationGate, ModuleRef, ModuleRegistry};
use crate::config::Config;
use crate::error::{BoxError, CacheError, Result};
use crate::events::{types, BusConfig, CacheEvent, EventBus};
use crate::providers::{MemoryProvider, Provider};

#[derive(Clone)]
pub struct CacheContext {
    config: Arc<Config>,
    registry: ModuleRegistry,
    gate: MemoizationGate,
    events: EventBus<CacheEvent>,
}

impl CacheContext {
    pub fn new(config: Config) -> Self {
        let bus = config.bus_config();
        Self::with_bus_config(config, bus)
    }

    /// Build a context whose event bus uses `bus` instead of the settings in `config`.
    pub fn with_bus_config(config: Config, bus: BusConfig) -> Self {
        let registry = ModuleRegistry::new();
        let gate = MemoizationGate::new(registry.clone());
        info!(
            "Cache context ready (default ttl {:?}, mutation events {})",
            config.default_ttl,
            if config.emit_mutation_events { "on" } else { "off" }
        );

        Self {
            config: Arc::new(config),
            registry,
            gate,
            events: EventBus::new(bus),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &MemoizationGate {
        &self.gate
    }

    pub fn events(&self) -> &EventBus<CacheEvent> {
        &self.events
    }

    // ========== Modules ==========

    pub async fn add_module(
        &self,
        name: &str,
        provider: impl Provider + 'static,
        ttl: Option<Duration>,
    ) -> Result<ModuleRef> {
        self.registry.add_module(name, provider, ttl).await
    }

    /// Register an in-memory module sized from the configuration.
    pub async fn add_memory_module(&self, name: &str) -> Result<ModuleRef> {
        let provider = MemoryProvider::new(self.config.provider_config());
        self.registry.add_module(name, provider, None).await
    }

    pub fn admit(&self, module: CacheModule) -> Result<ModuleRef> {
        self.registry.admit(module)
    }

    pub fn find_module(&self, identifier: &str) -> Result<ModuleRef> {
        self.registry.find_module(identifier)
    }

    pub fn contains_module(&self, identifier: &str) -> bool {
        self.registry.contains_module(identifier)
    }

    pub fn modules_count(&self) -> usize {
        self.registry.modules_count()
    }

    // ========== Entries ==========

    pub async fn get<T: DeserializeOwned>(&self, module_id: &str, key: &str) -> Result<T> {
        self.registry.get(module_id, key).await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        module_id: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        self.registry.set(module_id, key, value).await?;
        self.announce(
            types::STORED,
            CacheEvent::Stored {
                module: module_id.to_string(),
                key: key.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn delete_key(&self, module_id: &str, key: &str) -> Result<()> {
        self.registry.delete_key(module_id, key).await?;
        self.announce(
            types::DELETED,
            CacheEvent::Deleted {
                module: module_id.to_string(),
                key: key.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn reset(&self, module_id: &str) -> Result<()> {
        self.registry.reset(module_id).await?;
        self.announce(
            types::RESET,
            CacheEvent::Cleared {
                module: module_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// See [`MemoizationGate::cacheable`].
    pub async fn cacheable<T, F, Fut, E>(
        &self,
        module_id: &str,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.cacheable_with_outcome(module_id, key, ttl, compute)
            .await
            .map(|(value, _)| value)
    }

    pub async fn cacheable_with_outcome<T, F, Fut, E>(
        &self,
        module_id: &str,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<(T, Lookup)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let (value, outcome) = self
            .gate
            .cacheable_with_outcome(module_id, key, ttl, compute)
            .await?;

        if outcome == Lookup::Computed {
            self.announce(
                types::STORED,
                CacheEvent::Stored {
                    module: module_id.to_string(),
                    key: key.to_string(),
                },
            )
            .await;
        }
        Ok((value, outcome))
    }

    /// `cacheable` with the configured default TTL.
    pub async fn cacheable_default<T, F, Fut, E>(
        &self,
        module_id: &str,
        key: &str,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let ttl = self.config.default_ttl;
        self.cacheable(module_id, key, ttl, compute).await
    }

    pub fn stats(&self, module_id: &str) -> GateStats {
        self.gate.stats(module_id)
    }

    // ========== Events ==========

    /// Make `module_id` drop entries when `event_type` is emitted.
    ///
    /// The module gets a mailbox named after its identifier (created if
    /// missing). [`CacheEvent::Invalidate`] deletes its key and
    /// [`CacheEvent::Purge`] resets the module; other events are ignored.
    /// These removals do not emit mutation events.
    pub fn bind_invalidation(&self, module_id: &str, event_type: &str) -> Result<()> {
        let module = self.registry.find_module(module_id)?;
        let identifier = module.identifier().to_string();

        match self.events.register_module(&identifier) {
            Ok(_) | Err(CacheError::EventModuleConflict(_)) => {}
            Err(e) => return Err(e),
        }

        self.events
            .subscribe_event(&identifier, event_type, move |event: Arc<CacheEvent>| {
                let module = Arc::clone(&module);
                async move { invalidate(&module, &event).await }
            })
    }

    /// Cancel pending expiries, then stop every event listener.
    pub async fn shutdown(&self) {
        self.gate.shutdown().await;
        self.events.shutdown().await;
        info!("Cache context shut down");
    }

    /// Emit a mutation event if enabled and someone registered its type.
    ///
    /// A subscriber of a mutation event must not mutate the cache through
    /// this context while the bus runs in rendezvous mode: its own mailbox
    /// would be the one the emitter waits on.
    async fn announce(&self, event_type: &str, event: CacheEvent) {
        if !self.config.emit_mutation_events || !self.events.contains_event_type(event_type) {
            return;
        }
        if let Err(e) = self.events.emit_event(event_type, event).await {
            warn!("Failed to announce '{}': {}", event_type, e);
        }
    }
}

async fn invalidate(module: &CacheModule, event: &CacheEvent) {
    let outcome = match event {
        CacheEvent::Invalidate { key } => module.delete(key).await,
        CacheEvent::Purge => module.reset().await,
        _ => return,
    };

    match outcome {
        Ok(()) => debug!("Module '{}' invalidated by event", module.identifier()),
        Err(e) => error!(
            "Error invalidating module {}: {}",
            module.identifier(),
            e
        ),
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("registry", &self.registry)
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    fn counted<'a, T: 'a>(
        calls: &'a AtomicUsize,
        value: T,
    ) -> impl FnOnce() -> std::future::Ready<std::result::Result<T, Infallible>> + 'a {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    fn with_mutation_events() -> CacheContext {
        CacheContext::new(Config {
            emit_mutation_events: true,
            ..Config::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_cache_walkthrough() {
        let ctx = CacheContext::default();
        let module = ctx
            .add_module("orders cache", MemoryProvider::default(), None)
            .await
            .unwrap();
        assert_eq!(module.identifier(), "orders_cache");

        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(5);

        let total: u32 = ctx
            .cacheable("orders_cache", "total", ttl, counted(&calls, 42))
            .await
            .unwrap();
        assert_eq!(total, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let total: u32 = ctx
            .cacheable("orders_cache", "total", ttl, counted(&calls, 42))
            .await
            .unwrap();
        assert_eq!(total, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;

        let total: u32 = ctx
            .cacheable("orders_cache", "total", ttl, counted(&calls, 42))
            .await
            .unwrap();
        assert_eq!(total, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = ctx.stats("orders_cache");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.computes, 2);
        assert_eq!(stats.expirations, 1);

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let ctx = CacheContext::default();
        ctx.add_memory_module("profiles").await.unwrap();

        ctx.set("profiles", "alice", &"admin").await.unwrap();
        let role: String = ctx.get("profiles", "alice").await.unwrap();
        assert_eq!(role, "admin");

        ctx.delete_key("profiles", "alice").await.unwrap();
        let err = ctx.get::<String>("profiles", "alice").await.unwrap_err();
        assert!(matches!(err, CacheError::KeyNotFound { .. }));

        // Deleting an absent key is fine
        ctx.delete_key("profiles", "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_only_touches_one_module() {
        let ctx = CacheContext::default();
        ctx.add_memory_module("a").await.unwrap();
        ctx.add_memory_module("b").await.unwrap();

        ctx.set("a", "k", &1u8).await.unwrap();
        ctx.set("b", "k", &2u8).await.unwrap();
        ctx.reset("a").await.unwrap();

        assert!(ctx.get::<u8>("a", "k").await.unwrap_err().is_not_found());
        assert_eq!(ctx.get::<u8>("b", "k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let ctx = CacheContext::default();
        let err = ctx.set("missing", "k", &1u8).await.unwrap_err();
        assert!(matches!(err, CacheError::ModuleNotFound(_)));

        let err = ctx.bind_invalidation("missing", "invalidate").unwrap_err();
        assert!(matches!(err, CacheError::ModuleNotFound(_)));
    }

    #[tokio::test]
    async fn test_bind_invalidation() {
        let ctx = CacheContext::default();
        ctx.add_memory_module("search index").await.unwrap();
        ctx.add_memory_module("audit log").await.unwrap();
        ctx.events().register_event_type("invalidate").unwrap();

        ctx.bind_invalidation("search_index", "invalidate").unwrap();
        assert_eq!(
            ctx.events().subscribed_events("search_index").unwrap(),
            vec!["invalidate".to_string()]
        );

        ctx.set("search_index", "total", &3u32).await.unwrap();
        ctx.set("search_index", "other", &4u32).await.unwrap();
        ctx.set("audit_log", "total", &5u32).await.unwrap();

        let report = ctx
            .events()
            .emit_event("invalidate", CacheEvent::invalidate("total"))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);

        // Wait for the listener to finish the callback
        ctx.events().shutdown().await;

        assert!(ctx.get::<u32>("search_index", "total").await.unwrap_err().is_not_found());
        assert_eq!(ctx.get::<u32>("search_index", "other").await.unwrap(), 4);
        assert_eq!(ctx.get::<u32>("audit_log", "total").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_bind_invalidation_purge_and_errors() {
        let ctx = CacheContext::default();
        ctx.add_memory_module("search index").await.unwrap();

        let err = ctx.bind_invalidation("search_index", "purge").unwrap_err();
        assert!(matches!(err, CacheError::EventTypeNotFound(_)));

        ctx.events().register_event_type("purge").unwrap();
        ctx.bind_invalidation("search_index", "purge").unwrap();
        let err = ctx.bind_invalidation("search_index", "purge").unwrap_err();
        assert!(matches!(err, CacheError::SubscriptionConflict { .. }));

        ctx.set("search_index", "a", &1u8).await.unwrap();
        ctx.set("search_index", "b", &2u8).await.unwrap();
        ctx.events().emit_event("purge", CacheEvent::Purge).await.unwrap();
        ctx.events().shutdown().await;

        assert!(ctx.get::<u8>("search_index", "a").await.unwrap_err().is_not_found());
        assert!(ctx.get::<u8>("search_index", "b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mutation_events() {
        let ctx = with_mutation_events();
        ctx.add_memory_module("orders").await.unwrap();

        let events = ctx.events();
        events.register_event_type(types::STORED).unwrap();
        events.register_event_type(types::DELETED).unwrap();
        events.register_event_type(types::RESET).unwrap();
        events.register_module("watcher").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for event_type in [types::STORED, types::DELETED, types::RESET] {
            let tx = tx.clone();
            events
                .subscribe_event("watcher", event_type, move |event: Arc<CacheEvent>| {
                    let _ = tx.send(event);
                    async {}
                })
                .unwrap();
        }

        ctx.set("orders", "total", &1u32).await.unwrap();
        assert_eq!(
            *rx.recv().await.unwrap(),
            CacheEvent::Stored {
                module: "orders".into(),
                key: "total".into()
            }
        );

        ctx.delete_key("orders", "total").await.unwrap();
        assert!(matches!(*rx.recv().await.unwrap(), CacheEvent::Deleted { .. }));

        let _: u32 = ctx
            .cacheable("orders", "count", Duration::from_secs(60), || async {
                Ok::<_, Infallible>(7)
            })
            .await
            .unwrap();
        assert!(matches!(
            *rx.recv().await.unwrap(),
            CacheEvent::Stored { ref key, .. } if key == "count"
        ));

        // A hit stores nothing
        let _: u32 = ctx
            .cacheable("orders", "count", Duration::from_secs(60), || async {
                Ok::<_, Infallible>(8)
            })
            .await
            .unwrap();

        ctx.reset("orders").await.unwrap();
        assert!(matches!(*rx.recv().await.unwrap(), CacheEvent::Cleared { .. }));
        assert!(rx.try_recv().is_err());

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_mutation_events_off_by_default() {
        let ctx = CacheContext::default();
        ctx.add_memory_module("orders").await.unwrap();
        ctx.events().register_event_type(types::STORED).unwrap();
        ctx.events().register_module("watcher").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        ctx.events()
            .subscribe_event("watcher", types::STORED, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .unwrap();

        ctx.set("orders", "total", &1u32).await.unwrap();
        ctx.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mutation_survives_closed_bus() {
        let ctx = with_mutation_events();
        ctx.add_memory_module("orders").await.unwrap();
        ctx.events().register_event_type(types::STORED).unwrap();
        ctx.events().register_module("watcher").unwrap();
        ctx.events()
            .subscribe_event("watcher", types::STORED, |_| async {})
            .unwrap();

        ctx.events().shutdown().await;

        ctx.set("orders", "total", &9u32).await.unwrap();
        assert_eq!(ctx.get::<u32>("orders", "total").await.unwrap(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cacheable_default_uses_configured_ttl() {
        let ctx = CacheContext::new(Config {
            default_ttl: Duration::from_secs(2),
            ..Config::default()
        });
        ctx.add_memory_module("m").await.unwrap();

        let _: u8 = ctx
            .cacheable_default("m", "k", || async { Ok::<_, Infallible>(1) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.get::<u8>("m", "k").await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ctx.get::<u8>("m", "k").await.unwrap_err().is_not_found());
    }
}
