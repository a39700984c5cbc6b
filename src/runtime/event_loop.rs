//! The async driver.
//!
//! [`KioskRuntime`] is the only owner of a broker session. It asks the
//! [`ConnectionManager`] when and where to connect, runs the session, and
//! between I/O hands every event, intent and timer tick to the module. Each
//! callback may queue publishes; the runtime flushes them before waiting
//! again.

use embassy_futures::select::{Either, Either3, select, select3};
use embassy_time::{Duration, Instant, Timer, with_deadline};
use heapless::Vec;

use super::publisher::{BufferedOutbox, IntentReceiver};
use super::registry::TopicRegistry;
use super::traits::MqttModule;
use crate::client::{MqttClient, MqttEvent, MqttOptions};
use crate::config::{Credentials, DeviceIdentity, KioskConfig};
use crate::connection::{ConnectAttempt, ConnectionManager, LinkEvent};
use crate::error::{DisconnectReason, MqttError};
use crate::packet::QoS;
use crate::topics::MAX_TOPIC_LEN;
use crate::transport::Connector;

/// Filters a module may register.
pub const MAX_SUBSCRIPTIONS: usize = 8;
/// Publishes a single callback may queue.
pub const OUTBOX_CAPACITY: usize = 8;
/// Largest payload a module may queue.
pub const MAX_OUTBOUND_PAYLOAD: usize = 512;

type Outbox = BufferedOutbox<OUTBOX_CAPACITY, MAX_TOPIC_LEN, MAX_OUTBOUND_PAYLOAD>;

/// Drives one [`MqttModule`] over connections opened by a [`Connector`].
///
/// - `DEPTH`: intent channel depth
/// - `BUF`: MQTT receive and transmit buffer size; larger inbound messages
///   reach the module in fragments
///
/// ```ignore
/// static INTENTS: IntentChannel<UiIntent, 4> = IntentChannel::new();
///
/// let kiosk = Kiosk::new(config.clone(), storage, sink, rng, clock);
/// let connector = TcpConnector::<2048, 1024>::new(stack, Duration::from_secs(10));
/// let mut runtime = KioskRuntime::<_, _, 4, 1024>::new(&config, connector, kiosk, INTENTS.receiver());
/// runtime.run().await
/// ```
pub struct KioskRuntime<'ch, C, M, const DEPTH: usize, const BUF: usize>
where
    C: Connector,
    M: MqttModule,
{
    connector: C,
    module: M,
    connection: ConnectionManager,
    intents: IntentReceiver<'ch, M::Intent, DEPTH>,
    identity: DeviceIdentity,
    keep_alive: Duration,
    credentials: Option<Credentials>,
    registry: TopicRegistry<MAX_SUBSCRIPTIONS>,
    outbox: Outbox,
}

impl<'ch, C, M, const DEPTH: usize, const BUF: usize> KioskRuntime<'ch, C, M, DEPTH, BUF>
where
    C: Connector,
    M: MqttModule,
{
    pub fn new(
        config: &KioskConfig,
        connector: C,
        module: M,
        intents: IntentReceiver<'ch, M::Intent, DEPTH>,
    ) -> Self {
        Self {
            connector,
            module,
            connection: ConnectionManager::new(config),
            intents,
            identity: config.identity.clone(),
            keep_alive: config.keep_alive,
            credentials: config.credentials.clone(),
            registry: TopicRegistry::new(),
            outbox: Outbox::new(),
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Runs forever. Sessions come and go; nothing here ever gives up.
    pub async fn run(&mut self) -> ! {
        self.module.register(&mut self.registry);
        info!("runtime: {} subscriptions registered", self.registry.len());

        loop {
            let now = Instant::now();
            self.module.on_tick(now, &mut self.outbox);
            self.outbox.discard();

            let link_up = self.connector.is_link_up();
            let will = self.module.last_will();
            if let Some(attempt) = self.connection.begin_attempt(now, link_up, will) {
                let reason = self.run_session(&attempt).await;
                let now = Instant::now();
                self.connection.on_disconnected(now, reason);
                self.module
                    .on_event(LinkEvent::Disconnected(reason), now, &mut self.outbox);
                self.outbox.discard();
                continue;
            }

            let wake = [self.connection.next_deadline(), self.module.next_deadline()]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(Instant::MAX);
            if let Either::First(intent) = select(self.intents.receive(), Timer::at(wake)).await {
                self.module.on_intent(intent, Instant::now(), &mut self.outbox);
            }
        }
    }

    /// Opens, runs and loses one session. Always returns why it ended.
    async fn run_session(&mut self, attempt: &ConnectAttempt) -> DisconnectReason {
        let transport =
            match with_deadline(attempt.deadline(), self.connector.connect(attempt.endpoint())).await {
                Ok(Ok(transport)) => transport,
                Ok(Err(err)) => {
                    warn!("runtime: connect failed: {:?}", crate::fmt::dbg(&err));
                    return DisconnectReason::Unreachable;
                }
                Err(_) => return DisconnectReason::ConnectTimeout,
            };

        let mut options =
            MqttOptions::new(self.identity.client_id()).with_keep_alive(self.keep_alive);
        if let Some(credentials) = &self.credentials {
            options = options
                .with_credentials(&credentials.username, credentials.password.as_bytes());
        }
        if let Some(will) = attempt.will() {
            options = options.with_will(will.as_will());
        }
        let mut client = MqttClient::<_, BUF>::new(transport, options);

        match with_deadline(attempt.deadline(), client.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return session_end(err),
            Err(_) => return DisconnectReason::ConnectTimeout,
        }
        self.connection.on_connected();

        let filters: Vec<&str, MAX_SUBSCRIPTIONS> = self.registry.iter().collect();
        if let Err(err) = client.subscribe(&filters, QoS::AtLeastOnce).await {
            return session_end(err);
        }
        self.module
            .on_event(LinkEvent::Connected, Instant::now(), &mut self.outbox);

        loop {
            for request in self.outbox.drain() {
                let sent = client
                    .publish(&request.topic, &request.payload, request.qos, request.retain)
                    .await;
                match sent {
                    Ok(()) => {}
                    Err(MqttError::Protocol(err)) => {
                        warn!("runtime: publish to {} dropped: {:?}", request.topic.as_str(), err)
                    }
                    Err(err) => return session_end(err),
                }
            }

            let deadline = [self.module.next_deadline(), client.keepalive_deadline()]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(Instant::MAX);
            let wake = select3(client.readable(), self.intents.receive(), Timer::at(deadline)).await;
            match wake {
                Either3::First(()) => match client.poll().await {
                    Ok(Some(MqttEvent::Message {
                        topic, fragment, ..
                    })) => {
                        self.module.on_event(
                            LinkEvent::Message { topic, fragment },
                            Instant::now(),
                            &mut self.outbox,
                        );
                    }
                    Ok(None) => {}
                    Err(err) => return session_end(err),
                },
                Either3::Second(intent) => {
                    self.module.on_intent(intent, Instant::now(), &mut self.outbox)
                }
                Either3::Third(()) => {}
            }

            let now = Instant::now();
            if let Err(err) = client.keepalive(now).await {
                return match err {
                    MqttError::Timeout => DisconnectReason::KeepaliveTimeout,
                    other => session_end(other),
                };
            }
            self.module.on_tick(now, &mut self.outbox);
        }
    }
}

fn session_end<T: core::fmt::Debug>(err: MqttError<T>) -> DisconnectReason {
    let reason = DisconnectReason::from(err);
    debug!("runtime: session ended: {:?}", reason);
    reason
}
