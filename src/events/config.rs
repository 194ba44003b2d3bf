//! Event bus delivery configuration.

use std::time::Duration;

use serde::Deserialize;

/// How an emission hands an event to a mailbox.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The emitter waits until the listener has taken the event.
    #[default]
    Rendezvous,
    /// The event is queued in a bounded mailbox buffer.
    Buffered,
}

/// What a buffered mailbox does when its buffer is full.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for room, bounded by the delivery timeout if one is set.
    #[default]
    Block,
    /// Drop the event and count it in the emit report.
    Drop,
}

/// Delivery settings shared by every mailbox of a bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub mode: DeliveryMode,

    /// Buffer size of each mailbox in [`DeliveryMode::Buffered`].
    pub buffer_capacity: usize,

    pub overflow: OverflowPolicy,

    /// Upper bound for one handoff. `None` waits forever, so a stuck
    /// listener stalls the emitter.
    pub delivery_timeout: Option<Duration>,

    /// How long shutdown waits for a listener to drain before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Rendezvous,
            buffer_capacity: 64,
            overflow: OverflowPolicy::Block,
            delivery_timeout: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl BusConfig {
    /// Unbuffered handoff, the emitter waits for every listener.
    pub fn rendezvous() -> Self {
        Self::default()
    }

    /// Bounded mailboxes with the given overflow policy.
    pub fn buffered(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            mode: DeliveryMode::Buffered,
            buffer_capacity: capacity.max(1),
            overflow,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Channel size backing each mailbox.
    pub(crate) fn channel_capacity(&self) -> usize {
        match self.mode {
            DeliveryMode::Rendezvous => 1,
            DeliveryMode::Buffered => self.buffer_capacity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_blocking_rendezvous() {
        let config = BusConfig::default();
        assert_eq!(config.mode, DeliveryMode::Rendezvous);
        assert_eq!(config.channel_capacity(), 1);
        assert!(config.delivery_timeout.is_none());
    }

    #[test]
    fn test_buffered_capacity_is_at_least_one() {
        let config = BusConfig::buffered(0, OverflowPolicy::Drop);
        assert_eq!(config.channel_capacity(), 1);
        assert_eq!(config.overflow, OverflowPolicy::Drop);
    }

    #[test]
    fn test_modes_deserialize_lowercase() {
        let mode: DeliveryMode = serde_json::from_str(r#""buffered""#).unwrap();
        assert_eq!(mode, DeliveryMode::Buffered);

        let overflow: OverflowPolicy = serde_json::from_str(r#""drop""#).unwrap();
        assert_eq!(overflow, OverflowPolicy::Drop);
    }
}
