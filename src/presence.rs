//! Retained online/offline presence.
//!
//! While a session is up the kiosk republishes `{"online":true,"at":..}`
//! retained on its presence topic every interval. The offline state is never
//! published by the kiosk itself: it is the last will registered with every
//! connect attempt, so clean and unclean disconnects look the same to the
//! backend.

use alloc::vec::Vec;

use embassy_time::Duration;
use serde::Serialize;

use crate::packet::{QoS, Will};
use crate::topics::{Topic, Topics};

/// Payload of the last will, published by the broker on our behalf.
pub const OFFLINE_PAYLOAD: &[u8] = br#"{"online":false,"at":""}"#;

/// Presence messages are retained and delivered at least once.
pub const PRESENCE_QOS: QoS = QoS::AtLeastOnce;

#[derive(Serialize)]
struct Presence<'a> {
    online: bool,
    at: &'a str,
}

/// An owned last-will registration.
///
/// A connect attempt keeps this alive until it resolves, since the CONNECT
/// packet borrows its topic and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    topic: Topic,
    payload: &'static [u8],
}

impl LastWill {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    pub fn as_will(&self) -> Will<'_> {
        Will {
            topic: &self.topic,
            payload: self.payload,
            qos: PRESENCE_QOS,
            retain: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceBeacon {
    topic: Topic,
    interval: Duration,
}

impl PresenceBeacon {
    pub fn new(topics: &Topics, interval: Duration) -> Self {
        Self {
            topic: Topic::try_from(topics.presence()).unwrap_or_default(),
            interval,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.topic.clone(),
            payload: OFFLINE_PAYLOAD,
        }
    }

    /// The retained heartbeat body; `at` may be empty when the wall clock is
    /// not known yet.
    pub fn heartbeat(&self, at: &str) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Presence { online: true, at })
    }
}
