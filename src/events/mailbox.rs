//! Per-module mailbox and its listener task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::config::{BusConfig, DeliveryMode, OverflowPolicy};
use crate::error::{CacheError, Result};

/// Type-erased subscription callback.
pub(crate) type Callback<E> = Arc<dyn Fn(Arc<E>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscription<E> {
    event_type: String,
    callback: Callback<E>,
}

type Subscriptions<E> = Arc<RwLock<Vec<Subscription<E>>>>;

struct Envelope<E> {
    event_type: Arc<str>,
    event: Arc<E>,
    /// Present in rendezvous mode; the listener answers on receipt.
    ack: Option<oneshot::Sender<()>>,
}

/// Outcome of one handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    Delivered,
    Dropped,
}

pub(crate) struct Mailbox<E> {
    name: String,
    subscriptions: Subscriptions<E>,
    delivered: Arc<AtomicU64>,
    sender: Mutex<Option<mpsc::Sender<Envelope<E>>>>,
    receiver: Mutex<Option<mpsc::Receiver<Envelope<E>>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + Sync + 'static> Mailbox<E> {
    pub(crate) fn new(name: &str, config: &BusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_capacity());
        Self {
            name: name.to_string(),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            delivered: Arc::new(AtomicU64::new(0)),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            listener: Mutex::new(None),
        }
    }

    pub(crate) fn handle(&self) -> MailboxHandle<E> {
        MailboxHandle {
            name: self.name.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
            delivered: Arc::clone(&self.delivered),
        }
    }

    pub(crate) fn is_subscribed_to(&self, event_type: &str) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|s| s.event_type == event_type)
    }

    pub(crate) fn subscribed_events(&self) -> Vec<String> {
        subscribed_events(&self.subscriptions)
    }

    /// Add a subscription and make sure the listener runs.
    pub(crate) fn subscribe(
        &self,
        event_type: &str,
        callback: Callback<E>,
        runtime: &Handle,
    ) -> Result<()> {
        if self.sender.lock().is_none() {
            return Err(CacheError::MailboxClosed(self.name.clone()));
        }

        {
            let mut subscriptions = self.subscriptions.write();
            if subscriptions.iter().any(|s| s.event_type == event_type) {
                return Err(CacheError::SubscriptionConflict {
                    module: self.name.clone(),
                    event_type: event_type.to_string(),
                });
            }
            subscriptions.push(Subscription {
                event_type: event_type.to_string(),
                callback,
            });
        }

        let mut listener = self.listener.lock();
        if listener.is_none() {
            let receiver = self.receiver.lock().take();
            if let Some(receiver) = receiver {
                *listener = Some(runtime.spawn(listen(
                    self.name.clone(),
                    receiver,
                    Arc::clone(&self.subscriptions),
                    Arc::clone(&self.delivered),
                )));
                debug!("Listener started for mailbox '{}'", self.name);
            }
        }
        Ok(())
    }

    /// Hand `event` to this mailbox according to `config`.
    pub(crate) async fn deliver(
        &self,
        event_type: &Arc<str>,
        event: &Arc<E>,
        config: &BusConfig,
    ) -> Result<Handoff> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(CacheError::MailboxClosed(self.name.clone()));
        };

        match (config.mode, config.overflow) {
            (DeliveryMode::Rendezvous, _) => {
                let (ack, received) = oneshot::channel();
                let envelope = Envelope {
                    event_type: Arc::clone(event_type),
                    event: Arc::clone(event),
                    ack: Some(ack),
                };
                let handoff = async {
                    sender.send(envelope).await.map_err(|_| self.closed())?;
                    received.await.map_err(|_| self.closed())
                };
                self.bounded(handoff, event_type, config.delivery_timeout)
                    .await?;
                Ok(Handoff::Delivered)
            }
            (DeliveryMode::Buffered, OverflowPolicy::Drop) => {
                match sender.try_send(self.envelope(event_type, event)) {
                    Ok(()) => Ok(Handoff::Delivered),
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Mailbox '{}' full, dropped '{}' event",
                            self.name, event_type
                        );
                        Ok(Handoff::Dropped)
                    }
                    Err(TrySendError::Closed(_)) => Err(self.closed()),
                }
            }
            (DeliveryMode::Buffered, OverflowPolicy::Block) => {
                let envelope = self.envelope(event_type, event);
                let handoff = async { sender.send(envelope).await.map_err(|_| self.closed()) };
                self.bounded(handoff, event_type, config.delivery_timeout)
                    .await?;
                Ok(Handoff::Delivered)
            }
        }
    }

    /// Close the channel. The listener drains what is buffered, then stops.
    pub(crate) fn close(&self) {
        self.sender.lock().take();
    }

    /// Wait for the listener to finish, aborting it after `grace`.
    pub(crate) async fn join(&self, grace: Duration) {
        let listener = self.listener.lock().take();
        let Some(listener) = listener else {
            return;
        };

        let abort = listener.abort_handle();
        if tokio::time::timeout(grace, listener).await.is_err() {
            warn!(
                "Listener for mailbox '{}' still busy after {:?}, aborting",
                self.name, grace
            );
            abort.abort();
        }
    }

    fn envelope(&self, event_type: &Arc<str>, event: &Arc<E>) -> Envelope<E> {
        Envelope {
            event_type: Arc::clone(event_type),
            event: Arc::clone(event),
            ack: None,
        }
    }

    fn closed(&self) -> CacheError {
        CacheError::MailboxClosed(self.name.clone())
    }

    async fn bounded<F>(&self, handoff: F, event_type: &str, timeout: Option<Duration>) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, handoff)
                .await
                .map_err(|_| CacheError::DeliveryTimeout {
                    module: self.name.clone(),
                    event_type: event_type.to_string(),
                    timeout,
                })?,
            None => handoff.await,
        }
    }
}

async fn listen<E: Send + Sync + 'static>(
    name: String,
    mut receiver: mpsc::Receiver<Envelope<E>>,
    subscriptions: Subscriptions<E>,
    delivered: Arc<AtomicU64>,
) {
    while let Some(envelope) = receiver.recv().await {
        if let Some(ack) = envelope.ack {
            // Emitter gave up (timeout) before we took it
            if ack.send(()).is_err() {
                debug!(
                    "Mailbox '{}' skipped abandoned '{}' event",
                    name, envelope.event_type
                );
                continue;
            }
        }

        let callback = subscriptions
            .read()
            .iter()
            .find(|s| *s.event_type == *envelope.event_type)
            .map(|s| Arc::clone(&s.callback));
        let Some(callback) = callback else {
            warn!(
                "Mailbox '{}' has no callback for '{}'",
                name, envelope.event_type
            );
            continue;
        };

        let event = envelope.event;
        if AssertUnwindSafe(async move { callback(event).await })
            .catch_unwind()
            .await
            .is_err()
        {
            error!(
                "Callback for '{}' in mailbox '{}' panicked",
                envelope.event_type, name
            );
        }
        delivered.fetch_add(1, Ordering::Relaxed);
    }

    debug!("Mailbox '{}' closed, listener stopped", name);
}

fn subscribed_events<E>(subscriptions: &Subscriptions<E>) -> Vec<String> {
    subscriptions
        .read()
        .iter()
        .map(|s| s.event_type.clone())
        .collect()
}

/// Read-only view of a registered mailbox.
pub struct MailboxHandle<E> {
    name: String,
    subscriptions: Subscriptions<E>,
    delivered: Arc<AtomicU64>,
}

impl<E> MailboxHandle<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribed event types, in subscription order.
    pub fn subscribed_events(&self) -> Vec<String> {
        subscribed_events(&self.subscriptions)
    }

    /// Number of events whose callback has finished running.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl<E> Clone for MailboxHandle<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
            delivered: Arc::clone(&self.delivered),
        }
    }
}

impl<E> std::fmt::Debug for MailboxHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxHandle")
            .field("name", &self.name)
            .field("subscribed_events", &self.subscribed_events())
            .field("delivered", &self.delivered_count())
            .finish()
    }
}
