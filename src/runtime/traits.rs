//! Seams between the runtime and the logic it drives.
//!
//! A module never performs I/O itself. The runtime hands it [`LinkEvent`]s,
//! queued UI intents and timer ticks, and the module answers by queueing
//! publishes on a [`PublishOutbox`]. The runtime drains the outbox through
//! the live session after each callback returns.

use embassy_time::Instant;

use crate::connection::LinkEvent;
use crate::packet::QoS;
use crate::presence::LastWill;

/// Object-safe sink for outbound publishes.
///
/// Queuing is synchronous and infallible from the caller's point of view;
/// requests that cannot be buffered are logged and dropped by the outbox.
pub trait PublishOutbox {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool);
}

/// Collects subscription filters during registration.
pub trait TopicCollector {
    /// Copies `topic` in. Returns `false` if the collector is full or the
    /// topic does not fit.
    fn add(&mut self, topic: &str) -> bool;
}

/// Logic driven by [`KioskRuntime`](super::KioskRuntime).
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl MqttModule for Echo {
///     type Intent = ();
///
///     fn register(&self, collector: &mut dyn TopicCollector) {
///         collector.add("echo/in");
///     }
///
///     fn on_event(&mut self, event: LinkEvent<'_>, _now: Instant, outbox: &mut dyn PublishOutbox) {
///         if let LinkEvent::Message { fragment, .. } = event {
///             outbox.publish("echo/out", fragment.data, QoS::AtMostOnce, false);
///         }
///     }
/// }
/// ```
pub trait MqttModule {
    /// What the UI can ask for.
    type Intent;

    /// Subscription filters, (re)subscribed after every connect.
    fn register(&self, collector: &mut dyn TopicCollector);

    /// Will to register with each connect attempt.
    fn last_will(&self) -> Option<LastWill> {
        None
    }

    fn on_event(&mut self, event: LinkEvent<'_>, now: Instant, outbox: &mut dyn PublishOutbox);

    fn on_intent(&mut self, _intent: Self::Intent, _now: Instant, _outbox: &mut dyn PublishOutbox) {
    }

    /// Runs every timer that is due at `now` and returns the next deadline.
    fn on_tick(&mut self, _now: Instant, _outbox: &mut dyn PublishOutbox) -> Option<Instant> {
        None
    }

    /// Earliest instant at which [`on_tick`](Self::on_tick) has work.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }
}

impl<M: MqttModule + ?Sized> MqttModule for &mut M {
    type Intent = M::Intent;

    fn register(&self, collector: &mut dyn TopicCollector) {
        (**self).register(collector)
    }

    fn last_will(&self) -> Option<LastWill> {
        (**self).last_will()
    }

    fn on_event(&mut self, event: LinkEvent<'_>, now: Instant, outbox: &mut dyn PublishOutbox) {
        (**self).on_event(event, now, outbox)
    }

    fn on_intent(&mut self, intent: Self::Intent, now: Instant, outbox: &mut dyn PublishOutbox) {
        (**self).on_intent(intent, now, outbox)
    }

    fn on_tick(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) -> Option<Instant> {
        (**self).on_tick(now, outbox)
    }

    fn next_deadline(&self) -> Option<Instant> {
        (**self).next_deadline()
    }
}
