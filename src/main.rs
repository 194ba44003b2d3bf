//! Cacheable demo binary
//!
//! Walks through memoization, expiry and event-driven invalidation against
//! an in-memory module, plus a Redis or MongoDB module when the matching
//! feature is enabled and configured.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cacheable::events::types;
use cacheable::{CacheContext, CacheEvent, Config, Lookup};

const ORDERS: &str = "orders_cache";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cacheable=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting cacheable demo...");

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");
    info!("Event delivery: {:?}", config.delivery);

    let ctx = CacheContext::new(config);
    ctx.add_memory_module("orders cache").await?;
    add_remote_modules(&ctx).await;

    // Log every mutation announced by the context
    let events = ctx.events();
    events.register_event_type("invalidate")?;
    for event_type in [types::STORED, types::DELETED, types::RESET] {
        events.register_event_type(event_type)?;
    }
    events.register_module("audit")?;
    for event_type in [types::STORED, types::DELETED, types::RESET] {
        events.subscribe_event("audit", event_type, |event: Arc<CacheEvent>| async move {
            info!("audit: {:?}", event);
        })?;
    }
    ctx.bind_invalidation(ORDERS, "invalidate")?;

    let ttl = Duration::from_secs(2);
    for round in 1..=2 {
        let (total, outcome) = ctx
            .cacheable_with_outcome(ORDERS, "total", ttl, || async {
                info!("Computing order total...");
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, Infallible>(42u32)
            })
            .await?;
        info!(
            "Round {}: total = {} ({})",
            round,
            total,
            if outcome == Lookup::Hit { "hit" } else { "computed" }
        );
    }

    let report = events
        .emit_event("invalidate", CacheEvent::invalidate("total"))
        .await?;
    info!("Invalidation delivered to {} modules", report.delivered);

    // Give the listener a moment to drop the key
    tokio::time::sleep(Duration::from_millis(50)).await;
    match ctx.get::<u32>(ORDERS, "total").await {
        Ok(total) => warn!("Total still cached: {}", total),
        Err(e) => info!("After invalidation: {}", e),
    }

    let stats = ctx.stats(ORDERS);
    info!(
        "Gate stats for '{}': {} hits, {} misses, {} computes",
        ORDERS, stats.hits, stats.misses, stats.computes
    );

    ctx.shutdown().await;
    Ok(())
}

/// Register remote modules for the backends compiled in and configured.
async fn add_remote_modules(ctx: &CacheContext) {
    #[cfg(feature = "redis")]
    if let Some(url) = ctx.config().redis_url.clone() {
        let provider = cacheable::RedisProvider::new(url, "cacheable:sessions");
        match ctx.add_module("sessions", provider, Some(ctx.config().default_ttl)).await {
            Ok(module) => info!("Redis module '{}' ready", module.identifier()),
            Err(e) => warn!("Redis module unavailable: {}", e),
        }
    }

    #[cfg(feature = "mongo")]
    if let Some(uri) = ctx.config().mongodb_uri.clone() {
        let database = ctx.config().mongodb_database.clone();
        let provider = cacheable::MongoProvider::new(uri, database, "reports");
        match ctx.add_module("reports", provider, Some(ctx.config().default_ttl)).await {
            Ok(module) => info!("MongoDB module '{}' ready", module.identifier()),
            Err(e) => warn!("MongoDB module unavailable: {}", e),
        }
    }

    if ctx.modules_count() == 1 {
        info!("No remote modules configured");
    }
}
