//! # Classroom Kiosk Sync Core
//!
//! `kiosk-link` is the `no_std` broker synchronization core of a classroom
//! homework kiosk, built upon the [Embassy](https://embassy.dev/) async
//! ecosystem. The kiosk shows today's roster, binds to one student, and
//! drives that student's homework items through their server-owned
//! lifecycle, all over a single MQTT 3.1.1 session.
//!
//! ## Core Features
//!
//! - **`no_std` + `alloc`:** Bounded protocol buffers use `heapless`; payloads and
//!   snapshots live on the heap.
//! - **Fully Async:** Built with `async/await` on Embassy timers and networking.
//! - **Sans-IO protocol core:** [`Kiosk`] never touches a socket. It consumes
//!   [`LinkEvent`]s, UI intents and timer ticks, and answers with queued publishes
//!   and [`RenderSink`] notifications, so the whole protocol is testable on the host.
//! - **Failover:** Broker endpoints are tried round-robin with a fixed backoff,
//!   forever. A retained last will is the only offline signal.
//! - **Idempotent commands:** Every homework request carries a key generated
//!   once when the command is built.
//! - **Transport Agnostic:** The `MqttTransport` and `Connector` traits allow
//!   any reliable, ordered byte stream; an `embassy-net` TCP implementation is included.
//!
//! ## Architecture
//!
//! ### 1. Protocol core
//!
//! ```ignore
//! let mut kiosk = Kiosk::new(config, storage, sink, rng, clock);
//! kiosk.handle_event(LinkEvent::Connected, now, &mut outbox);
//! kiosk.select_student("s1", now, &mut outbox)?;
//! ```
//!
//! ### 2. Runtime
//!
//! [`KioskRuntime`](runtime::KioskRuntime) owns the connection and drives any
//! [`MqttModule`](runtime::MqttModule), the kiosk included:
//!
//! ```ignore
//! use kiosk_link::runtime::{IntentChannel, KioskHandle, KioskRuntime};
//!
//! static INTENTS: IntentChannel<UiIntent, 4> = IntentChannel::new();
//!
//! let ui = KioskHandle::new(INTENTS.sender());
//! let mut runtime = KioskRuntime::<_, _, 4, 1024>::new(&config, connector, kiosk, INTENTS.receiver());
//! runtime.run().await
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod fmt;

pub mod binding;
pub mod client;
pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod debounce;
pub mod error;
pub mod homework;
pub mod kiosk;
pub mod packet;
pub mod presence;
pub mod reassembly;
pub mod runtime;
pub mod schema;
pub mod sink;
pub mod timer;
pub mod topics;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use binding::{Binding, Storage, UiMode};
pub use client::{MqttClient, MqttEvent, MqttOptions};
pub use clock::WallClock;
pub use command::{Command, HomeworkAction, IdempotencyKey};
pub use config::{BrokerEndpoint, DeviceIdentity, KioskConfig};
pub use connection::{ConnectionState, LinkEvent};
pub use error::{CommandError, DisconnectReason, ParseError};
pub use kiosk::{Kiosk, UiIntent};
pub use packet::QoS;
pub use reassembly::Fragment;
pub use schema::{HomeworkItem, Phase, RosterEntry, StudentInfo};
pub use sink::RenderSink;
pub use transport::{TcpConnector, TcpTransport};
