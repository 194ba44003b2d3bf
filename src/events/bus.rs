//! Event bus - event types, mailboxes, subscriptions and fan-out.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::config::BusConfig;
use super::event::CacheEvent;
use super::mailbox::{Callback, Handoff, Mailbox, MailboxHandle};
use crate::error::{CacheError, Result};

/// What one emission did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Mailboxes that accepted the event.
    pub delivered: usize,
    /// Mailboxes that dropped it because their buffer was full.
    pub dropped: usize,
}

impl EmitReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.dropped == 0
    }
}

struct BusInner<E> {
    config: BusConfig,
    event_types: RwLock<BTreeSet<String>>,
    mailboxes: RwLock<BTreeMap<String, Arc<Mailbox<E>>>>,
}

/// In-process event bus.
///
/// Modules register a mailbox, subscribe it to registered event types and
/// get a callback invoked for every matching emission. Filtering happens at
/// emission time: a mailbox only ever receives events it subscribed to.
///
/// Emission visits subscribed mailboxes one by one, in module name order.
/// With the default [`BusConfig::rendezvous`] policy the emitter waits at each
/// mailbox until its listener took the event, so a slow listener slows the
/// emitter down. See [`BusConfig`] for buffered delivery and timeouts.
pub struct EventBus<E = CacheEvent> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Send + Sync + 'static> EventBus<E> {
    pub fn new(config: BusConfig) -> Self {
        debug!("Event bus initialized ({:?} delivery)", config.mode);
        Self {
            inner: Arc::new(BusInner {
                config,
                event_types: RwLock::new(BTreeSet::new()),
                mailboxes: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Register a new event type.
    pub fn register_event_type(&self, event_type: &str) -> Result<()> {
        let mut event_types = self.inner.event_types.write();
        if !event_types.insert(event_type.to_string()) {
            return Err(CacheError::EventTypeConflict(event_type.to_string()));
        }
        debug!("Registered event type '{}'", event_type);
        Ok(())
    }

    pub fn contains_event_type(&self, event_type: &str) -> bool {
        self.inner.event_types.read().contains(event_type)
    }

    pub fn event_types_count(&self) -> usize {
        self.inner.event_types.read().len()
    }

    /// Sorted list of registered event types.
    pub fn event_types(&self) -> Vec<String> {
        self.inner.event_types.read().iter().cloned().collect()
    }

    /// Register a module with an empty subscription set.
    pub fn register_module(&self, module: &str) -> Result<MailboxHandle<E>> {
        let mut mailboxes = self.inner.mailboxes.write();
        if mailboxes.contains_key(module) {
            return Err(CacheError::EventModuleConflict(module.to_string()));
        }

        let mailbox = Mailbox::new(module, &self.inner.config);
        let handle = mailbox.handle();
        mailboxes.insert(module.to_string(), Arc::new(mailbox));

        info!("Registered event mailbox for module '{}'", module);
        Ok(handle)
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.inner.mailboxes.read().contains_key(module)
    }

    pub fn modules_count(&self) -> usize {
        self.inner.mailboxes.read().len()
    }

    /// Handle of an already registered mailbox.
    pub fn mailbox(&self, module: &str) -> Result<MailboxHandle<E>> {
        self.find_mailbox(module).map(|mailbox| mailbox.handle())
    }

    /// Event types `module` is subscribed to, in subscription order.
    pub fn subscribed_events(&self, module: &str) -> Result<Vec<String>> {
        self.find_mailbox(module)
            .map(|mailbox| mailbox.subscribed_events())
    }

    /// Subscribe `module` to `event_type`.
    ///
    /// Both must be registered. The module's listener task starts with its
    /// first subscription and invokes `callback` for every `event_type` event
    /// delivered to the mailbox. Must be called from within a Tokio runtime.
    pub fn subscribe_event<F, Fut>(&self, module: &str, event_type: &str, callback: F) -> Result<()>
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime =
            Handle::try_current().map_err(|_| CacheError::NoRuntime(module.to_string()))?;

        let mailbox = self.find_mailbox(module)?;
        if !self.contains_event_type(event_type) {
            return Err(CacheError::EventTypeNotFound(event_type.to_string()));
        }

        let callback: Callback<E> = Arc::new(move |event| callback(event).boxed());
        mailbox.subscribe(event_type, callback, &runtime)?;

        info!("Module '{}' subscribed to '{}'", module, event_type);
        Ok(())
    }

    /// Deliver `event` to every module subscribed to `event_type`.
    ///
    /// Returns immediately when nobody is subscribed. The first mailbox that
    /// fails (closed, or timed out) stops the fan-out and its error is returned;
    /// mailboxes visited before it keep the event.
    pub async fn emit_event(&self, event_type: &str, event: E) -> Result<EmitReport> {
        let targets: Vec<Arc<Mailbox<E>>> = self
            .inner
            .mailboxes
            .read()
            .values()
            .filter(|mailbox| mailbox.is_subscribed_to(event_type))
            .cloned()
            .collect();

        if targets.is_empty() {
            debug!("No subscribers for '{}'", event_type);
            return Ok(EmitReport::default());
        }

        let event_type: Arc<str> = Arc::from(event_type);
        let event = Arc::new(event);
        let mut report = EmitReport::default();

        for mailbox in targets {
            match mailbox
                .deliver(&event_type, &event, &self.inner.config)
                .await?
            {
                Handoff::Delivered => report.delivered += 1,
                Handoff::Dropped => report.dropped += 1,
            }
        }

        debug!(
            "Emitted '{}' to {} mailboxes ({} dropped)",
            event_type, report.delivered, report.dropped
        );
        Ok(report)
    }

    /// Close every mailbox and stop its listener.
    ///
    /// Listeners finish what is already buffered; one still running after
    /// `shutdown_grace` is aborted. Later emissions to subscribed modules and
    /// new subscriptions fail with [`CacheError::MailboxClosed`].
    pub async fn shutdown(&self) {
        let mailboxes: Vec<Arc<Mailbox<E>>> =
            self.inner.mailboxes.read().values().cloned().collect();

        for mailbox in &mailboxes {
            mailbox.close();
        }
        for mailbox in &mailboxes {
            mailbox.join(self.inner.config.shutdown_grace).await;
        }

        info!("Event bus stopped ({} mailboxes closed)", mailboxes.len());
    }

    fn find_mailbox(&self, module: &str) -> Result<Arc<Mailbox<E>>> {
        self.inner
            .mailboxes
            .read()
            .get(module)
            .cloned()
            .ok_or_else(|| CacheError::EventModuleNotFound(module.to_string()))
    }
}

impl<E: Send + Sync + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("event_types", &self.inner.event_types.read().len())
            .field("modules", &self.inner.mailboxes.read().len())
            .finish()
    }
}
