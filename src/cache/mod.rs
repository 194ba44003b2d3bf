//! Cache module - Module-partitioned caching over pluggable providers.
//!
//! This module provides a registry-based caching system that lets every part
//! of an application own a named partition of the cache.
//!
//! ## Architecture
//!
//! The cache system follows a registry pattern:
//! - `ModuleRegistry` - Central registry holding all cache modules
//! - `CacheModule` - One named partition, owning exactly one provider
//! - `MemoizationGate` - Get-or-compute with best-effort TTL expiry
//! - `Codec` - Byte layout for structurally serialized values
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> cacheable::Result<()> {
//! use std::time::Duration;
//! use cacheable::{MemoizationGate, MemoryProvider, ModuleRegistry};
//!
//! let registry = ModuleRegistry::new();
//! registry.add_module("orders cache", MemoryProvider::default(), None).await?;
//!
//! let gate = MemoizationGate::new(registry);
//! let total: u32 = gate
//!     .cacheable("orders_cache", "total", Duration::from_secs(5), || async {
//!         Ok::<_, std::convert::Infallible>(42)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod gate;
mod module;
mod registry;

pub use codec::{decode, encode, Codec, JsonCodec};
pub use config::ProviderConfig;
pub use gate::{GateStats, Lookup, MemoizationGate};
pub use module::CacheModule;
pub use registry::{ModuleRef, ModuleRegistry};
