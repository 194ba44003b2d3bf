//! Cacheable - Module-partitioned caching facade
//!
//! Applications register named cache modules, each backed by its own storage
//! provider, read and write typed values through them, memoize expensive
//! computations with a TTL and coordinate invalidation over an in-process
//! event bus.
//!
//! ## Architecture
//!
//! - `cache` - Module registry, cache modules, codec and the memoization gate
//! - `providers` - Storage backends (Moka in memory, Redis and MongoDB behind features)
//! - `events` - Event types, per-module mailboxes and fan-out emission
//! - `context` - One handle bundling all of the above
//! - `config` - Environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! # async fn run() -> cacheable::Result<()> {
//! use std::time::Duration;
//! use cacheable::{CacheContext, CacheEvent, Config};
//!
//! let ctx = CacheContext::new(Config::default());
//! ctx.add_memory_module("orders cache").await?;
//!
//! let total: u32 = ctx
//!     .cacheable("orders_cache", "total", Duration::from_secs(5), || async {
//!         Ok::<_, std::convert::Infallible>(42)
//!     })
//!     .await?;
//!
//! ctx.events().register_event_type("invalidate")?;
//! ctx.bind_invalidation("orders_cache", "invalidate")?;
//! ctx.events().emit_event("invalidate", CacheEvent::invalidate("total")).await?;
//!
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod providers;

pub use cache::{CacheModule, Codec, GateStats, JsonCodec, Lookup, MemoizationGate, ModuleRef, ModuleRegistry, ProviderConfig};
pub use config::{Config, ConfigError};
pub use context::CacheContext;
pub use error::{BoxError, CacheError, ErrorKind, ProviderError, Result};
pub use events::{BusConfig, CacheEvent, DeliveryMode, EmitReport, EventBus, MailboxHandle, OverflowPolicy};
#[cfg(feature = "mongo")]
pub use providers::MongoProvider;
#[cfg(feature = "redis")]
pub use providers::RedisProvider;
pub use providers::{MemoryProvider, Provider, ProviderResult};
