//! Configuration module for the cache facade.
//!
//! Loads configuration from environment variables. Every setting has a
//! default; a variable that is set but cannot be parsed is an error.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cache::ProviderConfig;
use crate::events::{BusConfig, DeliveryMode, OverflowPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Cache
    pub default_ttl: Duration,
    pub max_capacity: u64,

    /// Announce set/delete/reset on the event bus when the matching
    /// `cache.*` event type is registered.
    pub emit_mutation_events: bool,

    // Event bus
    pub delivery: DeliveryMode,
    pub buffer_capacity: usize,
    pub overflow: OverflowPolicy,
    pub delivery_timeout: Option<Duration>,
    pub shutdown_grace: Duration,

    // Remote providers
    pub redis_url: Option<String>,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_capacity: 10_000,
            emit_mutation_events: false,
            delivery: DeliveryMode::Rendezvous,
            buffer_capacity: 64,
            overflow: OverflowPolicy::Block,
            delivery_timeout: None,
            shutdown_grace: Duration::from_millis(5000),
            redis_url: None,
            mongodb_uri: None,
            mongodb_database: "cacheable".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment and `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from any variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let default_ttl = match var("CACHE_DEFAULT_TTL_SECS") {
            Some(value) => Duration::from_secs(parse("CACHE_DEFAULT_TTL_SECS", &value)?),
            None => defaults.default_ttl,
        };

        let max_capacity = match var("CACHE_MAX_CAPACITY") {
            Some(value) => parse("CACHE_MAX_CAPACITY", &value)?,
            None => defaults.max_capacity,
        };

        let emit_mutation_events = match var("CACHE_EMIT_MUTATIONS") {
            Some(value) => parse_bool("CACHE_EMIT_MUTATIONS", &value)?,
            None => defaults.emit_mutation_events,
        };

        let delivery = match var("EVENT_DELIVERY").map(|v| v.to_lowercase()) {
            Some(value) => match value.as_str() {
                "rendezvous" => DeliveryMode::Rendezvous,
                "buffered" => DeliveryMode::Buffered,
                _ => return Err(invalid("EVENT_DELIVERY", &value, "expected rendezvous or buffered")),
            },
            None => defaults.delivery,
        };

        let buffer_capacity = match var("EVENT_BUFFER_CAPACITY") {
            Some(value) => {
                let capacity: usize = parse("EVENT_BUFFER_CAPACITY", &value)?;
                if capacity == 0 {
                    return Err(invalid("EVENT_BUFFER_CAPACITY", &value, "must be at least 1"));
                }
                capacity
            }
            None => defaults.buffer_capacity,
        };

        let overflow = match var("EVENT_OVERFLOW").map(|v| v.to_lowercase()) {
            Some(value) => match value.as_str() {
                "block" => OverflowPolicy::Block,
                "drop" => OverflowPolicy::Drop,
                _ => return Err(invalid("EVENT_OVERFLOW", &value, "expected block or drop")),
            },
            None => defaults.overflow,
        };

        let delivery_timeout = match var("EVENT_DELIVERY_TIMEOUT_MS") {
            Some(value) => Some(Duration::from_millis(parse(
                "EVENT_DELIVERY_TIMEOUT_MS",
                &value,
            )?)),
            None => defaults.delivery_timeout,
        };

        let shutdown_grace = match var("EVENT_SHUTDOWN_GRACE_MS") {
            Some(value) => Duration::from_millis(parse("EVENT_SHUTDOWN_GRACE_MS", &value)?),
            None => defaults.shutdown_grace,
        };

        Ok(Self {
            default_ttl,
            max_capacity,
            emit_mutation_events,
            delivery,
            buffer_capacity,
            overflow,
            delivery_timeout,
            shutdown_grace,
            redis_url: var("REDIS_URL"),
            mongodb_uri: var("MONGODB_URI"),
            mongodb_database: var("MONGODB_DATABASE").unwrap_or(defaults.mongodb_database),
        })
    }

    /// Event bus settings derived from this configuration.
    pub fn bus_config(&self) -> BusConfig {
        let mut bus = match self.delivery {
            DeliveryMode::Rendezvous => BusConfig::rendezvous(),
            DeliveryMode::Buffered => BusConfig::buffered(self.buffer_capacity, self.overflow),
        }
        .shutdown_grace(self.shutdown_grace);

        if let Some(timeout) = self.delivery_timeout {
            bus = bus.delivery_timeout(timeout);
        }
        bus
    }

    /// Provider settings for in-memory modules.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::default().max_capacity(self.max_capacity)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(name, value, &e.to_string()))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "expected a boolean")),
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
