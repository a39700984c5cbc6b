//! Runtime
//!
//! Async driver for a single sans-IO module.
//!
//! # Overview
//!
//! The runtime owns the broker session and everything around it:
//! - connecting, with endpoint rotation and backoff
//! - subscribing the module's topics after every connect
//! - feeding inbound messages, queued UI intents and timer ticks to the module
//! - keep-alive
//!
//! # Publishing Pattern
//!
//! Modules never perform async I/O directly. Instead, they use the `PublishOutbox`
//! trait to queue publish requests. The runtime then performs the actual async
//! publishing after the module method returns. Requests queued while no
//! session is up are dropped.
//!
//! # UI Intents
//!
//! The UI runs in its own task and reaches the module through an
//! [`IntentChannel`]. Hand it a [`KioskHandle`] built from the channel's
//! sender; the runtime owns the receiver and wakes on every intent.

pub(crate) mod event_loop;
pub(crate) mod publisher;
pub(crate) mod registry;
pub(crate) mod traits;

pub use event_loop::{KioskRuntime, MAX_OUTBOUND_PAYLOAD, MAX_SUBSCRIPTIONS, OUTBOX_CAPACITY};
pub use publisher::{
    BufferedOutbox, IntentChannel, IntentReceiver, IntentSender, KioskHandle, OwnedPublishRequest,
};
pub use registry::TopicRegistry;
pub use traits::{MqttModule, PublishOutbox, TopicCollector};
