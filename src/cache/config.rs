//! Provider sizing configuration.

use std::time::Duration;

/// Sizing and lifetime settings for an in-memory provider.
///
/// The `ttl` given to [`crate::Provider::init`] takes precedence over
/// the one configured here.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Maximum number of entries in the provider.
    pub max_capacity: u64,

    /// Time-to-live for entries, enforced by the provider itself.
    pub ttl: Option<Duration>,

    /// Time-to-idle for entries.
    /// Entries are evicted if not accessed within this duration.
    pub tti: Option<Duration>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: None,
            tti: None,
        }
    }
}

impl ProviderConfig {
    /// Create a new config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set max capacity (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Set time-to-live for entries.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = Some(duration);
        self
    }

    /// Set time-to-idle for entries.
    #[must_use]
    pub fn tti(mut self, duration: Duration) -> Self {
        self.tti = Some(duration);
        self
    }

    /// Config for frequently accessed data.
    /// Higher capacity, idle entries go quickly.
    pub fn hot_data() -> Self {
        Self {
            max_capacity: 50_000,
            ttl: Some(Duration::from_secs(60)),
            tti: Some(Duration::from_secs(30)),
        }
    }

    /// Config for rarely changing data.
    pub fn cold_data() -> Self {
        Self {
            max_capacity: 5_000,
            ttl: Some(Duration::from_secs(3600)), // 1 hour
            tti: None,
        }
    }
}
