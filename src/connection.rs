//! Broker session lifecycle.
//!
//! [`ConnectionManager`] decides *when* to connect and *where* to; the
//! runtime performs the I/O and reports back. Every way a session can end
//! (or fail to start) funnels into [`ConnectionManager::on_disconnected`],
//! which rotates to the next endpoint and waits a fixed backoff. There is no
//! terminal state.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::config::{BrokerEndpoint, KioskConfig, MAX_ENDPOINTS};
use crate::error::DisconnectReason;
use crate::presence::LastWill;
use crate::reassembly::Fragment;

/// What the session reports to the kiosk, drained once per poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent<'a> {
    Connected,
    Disconnected(DisconnectReason),
    Message {
        topic: &'a str,
        fragment: Fragment<'a>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackoffWait,
}

/// One connect attempt handed to the runtime.
///
/// Owns the last will for as long as the attempt is in flight.
#[derive(Debug)]
pub struct ConnectAttempt {
    endpoint: BrokerEndpoint,
    will: Option<LastWill>,
    deadline: Instant,
}

impl ConnectAttempt {
    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn will(&self) -> Option<&LastWill> {
        self.will.as_ref()
    }

    /// The attempt counts as failed if no CONNACK arrived by then.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    endpoints: Vec<BrokerEndpoint, MAX_ENDPOINTS>,
    index: usize,
    state: ConnectionState,
    backoff: Duration,
    connect_timeout: Duration,
    retry_at: Option<Instant>,
    attempt_deadline: Option<Instant>,
    last_reason: Option<DisconnectReason>,
}

impl ConnectionManager {
    pub fn new(config: &KioskConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            index: 0,
            state: ConnectionState::Disconnected,
            backoff: config.reconnect_backoff,
            connect_timeout: config.connect_timeout,
            retry_at: None,
            attempt_deadline: None,
            last_reason: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn endpoint_index(&self) -> usize {
        self.index
    }

    pub fn current_endpoint(&self) -> Option<&BrokerEndpoint> {
        self.endpoints.get(self.index)
    }

    pub fn last_reason(&self) -> Option<DisconnectReason> {
        self.last_reason
    }

    /// Starts an attempt on the current endpoint if one is due.
    ///
    /// The will is registered here, before anything goes on the wire. When
    /// the network link is down nothing is dialled and the manager waits
    /// another backoff period on the same endpoint.
    pub fn begin_attempt(
        &mut self,
        now: Instant,
        link_up: bool,
        will: Option<LastWill>,
    ) -> Option<ConnectAttempt> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::BackoffWait if self.retry_at.is_none_or(|at| now >= at) => {}
            _ => return None,
        }
        if !link_up {
            debug!("connection: network link down, waiting");
            self.state = ConnectionState::BackoffWait;
            self.retry_at = Some(now + self.backoff);
            return None;
        }
        let Some(endpoint) = self.endpoints.get(self.index) else {
            warn!("connection: no broker endpoints configured");
            self.state = ConnectionState::BackoffWait;
            self.retry_at = Some(now + self.backoff);
            return None;
        };

        info!(
            "connection: connecting to {}:{} (endpoint {})",
            endpoint.host(),
            endpoint.port(),
            self.index
        );
        let deadline = now + self.connect_timeout;
        self.state = ConnectionState::Connecting;
        self.retry_at = None;
        self.attempt_deadline = Some(deadline);
        Some(ConnectAttempt {
            endpoint: endpoint.clone(),
            will,
            deadline,
        })
    }

    /// The broker accepted the session.
    pub fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!("connection: unexpected CONNACK in {:?}", self.state);
            return;
        }
        info!("connection: connected");
        self.state = ConnectionState::Connected;
        self.attempt_deadline = None;
        self.last_reason = None;
    }

    /// The session ended, or the attempt failed. Rotates to the next
    /// endpoint and schedules the retry. Returns `false` if no session or
    /// attempt was live, so a failure is never counted twice.
    pub fn on_disconnected(&mut self, now: Instant, reason: DisconnectReason) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {}
            _ => return false,
        }
        warn!("connection: lost ({:?}), backing off", reason);
        if !self.endpoints.is_empty() {
            self.index = (self.index + 1) % self.endpoints.len();
        }
        info!("connection: next endpoint {}", self.index);
        self.state = ConnectionState::BackoffWait;
        self.attempt_deadline = None;
        self.retry_at = Some(now + self.backoff);
        self.last_reason = Some(reason);
        true
    }

    /// When the manager next needs attention: the retry time while backing
    /// off, the attempt deadline while connecting.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::BackoffWait => self.retry_at,
            ConnectionState::Connecting => self.attempt_deadline,
            _ => None,
        }
    }
}
