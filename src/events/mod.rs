//! In-process event bus.
//!
//! Event types and modules are registered by name. A module subscribes to
//! the event types it cares about and gets its callback run on its own
//! listener task for every matching emission.

mod bus;
mod config;
mod event;
mod mailbox;

pub use bus::{EmitReport, EventBus};
pub use config::{BusConfig, DeliveryMode, OverflowPolicy};
pub use event::{types, CacheEvent};
pub use mailbox::MailboxHandle;
