//! Outbound queueing: the buffered outbox modules publish into, and the
//! channel that carries UI intents to the runtime.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::Vec;

use super::traits::PublishOutbox;
use crate::QoS;

pub type IntentChannel<I, const DEPTH: usize> = Channel<CriticalSectionRawMutex, I, DEPTH>;

pub type IntentSender<'a, I, const DEPTH: usize> = Sender<'a, CriticalSectionRawMutex, I, DEPTH>;

pub type IntentReceiver<'a, I, const DEPTH: usize> =
    Receiver<'a, CriticalSectionRawMutex, I, DEPTH>;

/// Handed to the UI so it can queue intents without touching the session.
///
/// Cheap to copy; every task that reacts to user input can hold one.
pub struct KioskHandle<'a, I, const DEPTH: usize> {
    tx: IntentSender<'a, I, DEPTH>,
}

impl<I, const DEPTH: usize> Clone for KioskHandle<'_, I, DEPTH> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I, const DEPTH: usize> Copy for KioskHandle<'_, I, DEPTH> {}

impl<'a, I, const DEPTH: usize> KioskHandle<'a, I, DEPTH> {
    pub fn new(tx: IntentSender<'a, I, DEPTH>) -> Self {
        Self { tx }
    }

    /// Queues an intent, waiting while the channel is full.
    pub async fn send(&self, intent: I) {
        self.tx.send(intent).await;
    }

    /// Queues an intent without waiting. Returns `false` if the channel is
    /// full; a UI tap dropped here is indistinguishable from a debounced one.
    pub fn try_send(&self, intent: I) -> bool {
        self.tx.try_send(intent).is_ok()
    }
}

/// A publish request with inline storage.
#[derive(Debug, Clone)]
pub struct OwnedPublishRequest<const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize> {
    pub topic: heapless::String<TOPIC_SIZE>,
    pub payload: heapless::Vec<u8, PAYLOAD_SIZE>,
    pub qos: QoS,
    pub retain: bool,
}

/// Collects publishes queued during one module callback; the runtime
/// drains it right after.
///
/// - `CAPACITY`: requests held at once
/// - `TOPIC_SIZE`: longest topic
/// - `PAYLOAD_SIZE`: largest payload
pub struct BufferedOutbox<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize>
{
    requests: Vec<OwnedPublishRequest<TOPIC_SIZE, PAYLOAD_SIZE>, CAPACITY>,
}

impl<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize>
    BufferedOutbox<CAPACITY, TOPIC_SIZE, PAYLOAD_SIZE>
{
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
        }
    }

    /// Takes every queued request, oldest first, leaving the outbox empty.
    pub fn drain(&mut self) -> impl Iterator<Item = OwnedPublishRequest<TOPIC_SIZE, PAYLOAD_SIZE>> {
        core::mem::take(&mut self.requests).into_iter()
    }

    /// Drops every queued request. Used while no session is up.
    pub fn discard(&mut self) {
        for request in self.drain() {
            debug!("outbox: offline, dropping publish to {}", request.topic.as_str());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

impl<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize> Default
    for BufferedOutbox<CAPACITY, TOPIC_SIZE, PAYLOAD_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize, const TOPIC_SIZE: usize, const PAYLOAD_SIZE: usize> PublishOutbox
    for BufferedOutbox<CAPACITY, TOPIC_SIZE, PAYLOAD_SIZE>
{
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) {
        let Ok(topic) = heapless::String::try_from(topic) else {
            warn!("outbox: topic too long, dropped");
            return;
        };
        let Ok(payload) = heapless::Vec::from_slice(payload) else {
            warn!("outbox: {} byte payload too large, dropped", payload.len());
            return;
        };
        let request = OwnedPublishRequest {
            topic,
            payload,
            qos,
            retain,
        };
        if self.requests.push(request).is_err() {
            warn!("outbox: full, publish dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_in_order() {
        let mut outbox = BufferedOutbox::<4, 32, 16>::new();
        outbox.publish("a", b"1", QoS::AtLeastOnce, true);
        outbox.publish("b", b"2", QoS::AtMostOnce, false);
        let drained: std::vec::Vec<_> = outbox.drain().collect();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].topic.as_str(), "a");
        assert!(drained[0].retain);
        assert_eq!(drained[1].payload.as_slice(), b"2");
        assert!(outbox.is_empty());
    }

    #[test]
    fn oversized_requests_are_dropped() {
        let mut outbox = BufferedOutbox::<1, 4, 4>::new();
        outbox.publish("too/long", b"x", QoS::AtMostOnce, false);
        outbox.publish("t", b"too large", QoS::AtMostOnce, false);
        outbox.publish("t", b"ok", QoS::AtMostOnce, false);
        outbox.publish("t", b"full", QoS::AtMostOnce, false);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn handle_queues_intents() {
        static CHANNEL: IntentChannel<u8, 2> = Channel::new();
        let handle = KioskHandle::new(CHANNEL.sender());
        assert!(handle.try_send(1));
        assert!(handle.try_send(2));
        assert!(!handle.try_send(3));
        assert_eq!(CHANNEL.try_receive(), Ok(1));
    }
}
