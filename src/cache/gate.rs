//! Memoization gate - get-or-compute with best-effort TTL expiry.
//!
//! A lookup that misses runs the caller's compute function once, stores the
//! result and arms a one-shot expiry task. Concurrent misses on the same key
//! are not coalesced: each may compute and write, the later write wins.
//! An expiry task deletes whatever is stored under its key when it fires,
//! even if a newer value replaced the one it was armed for.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::registry::{ModuleRef, ModuleRegistry};
use crate::error::{BoxError, CacheError, Result};

/// How a `cacheable` call was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Served from the module's cache.
    Hit,
    /// Computed, stored and scheduled for expiry.
    Computed,
}

/// Snapshot of the gate's counters for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub compute_failures: u64,
    pub expirations: u64,
}

#[derive(Default)]
struct ModuleCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    compute_failures: AtomicU64,
    expirations: AtomicU64,
}

impl ModuleCounters {
    fn snapshot(&self) -> GateStats {
        GateStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Get-or-compute front door over a [`ModuleRegistry`].
///
/// Expiry tasks live in a `JoinSet` owned by the gate, so [`MemoizationGate::shutdown`]
/// can cancel every pending one.
#[derive(Clone)]
pub struct MemoizationGate {
    registry: ModuleRegistry,
    expiries: Arc<Mutex<JoinSet<()>>>,
    counters: Arc<DashMap<String, Arc<ModuleCounters>>>,
    closed: Arc<AtomicBool>,
}

impl MemoizationGate {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry,
            expiries: Arc::new(Mutex::new(JoinSet::new())),
            counters: Arc::new(DashMap::with_capacity(16)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Return the cached value for `key` in `module_id`, or compute, store and
    /// return it.
    ///
    /// Only [`CacheError::KeyNotFound`] counts as a miss; any other lookup
    /// error is returned without calling `compute`. A failing `compute` is
    /// reported as [`CacheError::Compute`] and nothing is stored. A result
    /// that cannot be encoded is [`CacheError::Serialize`]. A stored result
    /// that does not decode back is removed again and reported as
    /// [`CacheError::Deserialize`], so the next call computes afresh.
    ///
    /// The returned value always went through the module's codec, so a
    /// computed result looks exactly like a later cache hit.
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

    /// Same as [`MemoizationGate::cacheable`], also telling whether the value
    /// was a hit or freshly computed.
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
        let module = self.registry.find_module(module_id)?;
        if !module.provider_ready() {
            return Err(CacheError::Uninitialized(module.identifier().to_string()));
        }
        let counters = self.counters_for(module.identifier());

        match module.get::<T>(key).await {
            Ok(value) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Key '{}' served from module '{}'", key, module_id);
                return Ok((value, Lookup::Hit));
            }
            Err(CacheError::KeyNotFound { .. }) => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(e),
        }

        counters.computes.fetch_add(1, Ordering::Relaxed);
        let computed = match compute().await {
            Ok(value) => value,
            Err(e) => {
                counters.compute_failures.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::Compute(e.into()));
            }
        };

        let bytes = module.encode(&computed)?;
        module.put_bytes(key, &bytes).await?;
        self.arm_expiry(Arc::clone(&module), key.to_string(), ttl, counters);

        // A payload that does not decode back would fail every later lookup
        let value = match module.decode(&bytes) {
            Ok(value) => value,
            Err(e) => {
                if let Err(delete_err) = module.delete(key).await {
                    error!(
                        "Error deleting undecodable key = {} from module {}: {}",
                        key,
                        module.name(),
                        delete_err
                    );
                }
                return Err(e);
            }
        };
        Ok((value, Lookup::Computed))
    }

    /// Counters for one module. All zeros if the gate never served it.
    pub fn stats(&self, module_id: &str) -> GateStats {
        self.counters
            .get(module_id)
            .map(|counters| counters.snapshot())
            .unwrap_or_default()
    }

    /// Number of expiry tasks that have not fired yet.
    pub fn pending_expiries(&self) -> usize {
        let mut expiries = self.expiries.lock();
        while expiries.try_join_next().is_some() {}
        expiries.len()
    }

    /// Cancel every pending expiry task. Later stores are not scheduled.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut expiries = std::mem::take(&mut *self.expiries.lock());
        let pending = expiries.len();
        expiries.shutdown().await;
        debug!("Memoization gate stopped, {} expiry tasks cancelled", pending);
    }

    fn counters_for(&self, module_id: &str) -> Arc<ModuleCounters> {
        if let Some(counters) = self.counters.get(module_id) {
            return Arc::clone(&counters);
        }
        Arc::clone(
            &self
                .counters
                .entry(module_id.to_string())
                .or_insert_with(|| Arc::new(ModuleCounters::default())),
        )
    }

    fn arm_expiry(&self, module: ModuleRef, key: String, ttl: Duration, counters: Arc<ModuleCounters>) {
        let mut expiries = self.expiries.lock();
        // Reap tasks that already fired
        while expiries.try_join_next().is_some() {}

        if self.closed.load(Ordering::SeqCst) {
            debug!("Gate closed, key '{}' will not expire", key);
            return;
        }

        expiries.spawn(async move {
            tokio::time::sleep(ttl).await;

            match module.has_key(&key).await {
                Ok(true) => match module.delete(&key).await {
                    Ok(()) => {
                        counters.expirations.fetch_add(1, Ordering::Relaxed);
                        debug!("Key '{}' expired from module '{}'", key, module.identifier());
                    }
                    Err(e) => error!(
                        "Error deleting cache with key = {} from module {}: {}",
                        key,
                        module.name(),
                        e
                    ),
                },
                Ok(false) => {}
                Err(e) => error!(
                    "Error checking cache key = {} in module {}: {}",
                    key,
                    module.name(),
                    e
                ),
            }
        });
    }
}

impl std::fmt::Debug for MemoizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizationGate")
            .field("registry", &self.registry)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
