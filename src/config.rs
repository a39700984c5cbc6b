//! Device identity, broker endpoints and tunables.
//!
//! `KioskConfig` is built once at boot and shared read-only by every
//! component. All protocol topics are derived from [`DeviceIdentity`], never
//! stored separately.

use core::fmt::Write;
use core::str::FromStr;

use embassy_time::Duration;
use heapless::{String, Vec};

/// Maximum number of broker endpoints in the failover list.
pub const MAX_ENDPOINTS: usize = 4;
/// Maximum length of an academy or device id.
pub const MAX_ID_LEN: usize = 48;
/// Maximum length of a broker host name.
pub const MAX_HOST_LEN: usize = 64;
/// Maximum length of the derived MQTT client id.
pub const MAX_CLIENT_ID_LEN: usize = 32;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Identity of this kiosk, immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    academy_id: String<MAX_ID_LEN>,
    device_id: String<MAX_ID_LEN>,
    client_id: String<MAX_CLIENT_ID_LEN>,
}

/// An id was empty or did not fit its bounded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdentityError {
    Empty,
    TooLong,
}

impl DeviceIdentity {
    /// Builds an identity whose client id is derived from `hardware_id`
    /// (typically the Wi-Fi MAC), so every reconnect reuses one broker session.
    pub fn new(academy_id: &str, device_id: &str, hardware_id: &[u8]) -> Result<Self, IdentityError> {
        let mut client_id = String::new();
        client_id
            .push_str("kiosk-")
            .map_err(|_| IdentityError::TooLong)?;
        for byte in hardware_id {
            write!(client_id, "{:02x}", byte).map_err(|_| IdentityError::TooLong)?;
        }
        Ok(Self {
            academy_id: bounded(academy_id)?,
            device_id: bounded(device_id)?,
            client_id,
        })
    }

    pub fn academy_id(&self) -> &str {
        &self.academy_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

fn bounded<const N: usize>(value: &str) -> Result<String<N>, IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::Empty);
    }
    String::try_from(value).map_err(|_| IdentityError::TooLong)
}

/// One broker candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    host: String<MAX_HOST_LEN>,
    port: u16,
}

/// A broker URL that could not be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointError {
    EmptyHost,
    HostTooLong,
    InvalidPort,
    UnsupportedScheme,
}

impl BrokerEndpoint {
    pub fn new(host: &str, port: u16) -> Result<Self, EndpointError> {
        if host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        let host = String::try_from(host).map_err(|_| EndpointError::HostTooLong)?;
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for BrokerEndpoint {
    type Err = EndpointError;

    /// Accepts `mqtt://`, `mqtts://`, `ws://`, `wss://` or a bare `host[:port]`.
    ///
    /// The websocket schemes only select the default port; the transport is
    /// always plain MQTT over TCP.
    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let (default_port, rest) = match url.split_once("://") {
            Some((scheme, rest)) => {
                let port = if scheme.eq_ignore_ascii_case("mqtt") || scheme.eq_ignore_ascii_case("ws")
                {
                    DEFAULT_MQTT_PORT
                } else if scheme.eq_ignore_ascii_case("mqtts")
                    || scheme.eq_ignore_ascii_case("wss")
                {
                    DEFAULT_MQTTS_PORT
                } else {
                    return Err(EndpointError::UnsupportedScheme);
                };
                (port, rest)
            }
            None => (DEFAULT_MQTT_PORT, url),
        };
        let rest = rest.trim_end_matches('/');
        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| EndpointError::InvalidPort)?;
                Self::new(host, port)
            }
            None => Self::new(rest, default_port),
        }
    }
}

/// Username / password presented in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String<64>,
    pub password: String<64>,
}

/// Everything a kiosk needs to know before it connects.
#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub identity: DeviceIdentity,
    pub endpoints: Vec<BrokerEndpoint, MAX_ENDPOINTS>,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
    pub presence_interval: Duration,
    pub card_debounce: Duration,
    pub refresh_debounce: Duration,
    pub restart_delay: Duration,
    pub elapsed_tick: Duration,
    pub attention_period: Duration,
    /// Offset of the academy's local time from UTC, in seconds.
    pub utc_offset_secs: i32,
    /// Largest logical message the reassembler will buffer.
    pub max_message_len: usize,
    /// Optional `updated_by` stamped on homework commands.
    pub updated_by: Option<String<MAX_ID_LEN>>,
}

impl KioskConfig {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            endpoints: Vec::new(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            presence_interval: Duration::from_secs(15),
            card_debounce: Duration::from_millis(500),
            refresh_debounce: Duration::from_millis(300),
            restart_delay: Duration::from_millis(1800),
            elapsed_tick: Duration::from_secs(1),
            attention_period: Duration::from_secs(2),
            utc_offset_secs: 9 * 3600,
            max_message_len: 32 * 1024,
            updated_by: None,
        }
    }

    /// Appends a broker candidate; candidates are tried in insertion order.
    pub fn with_endpoint(mut self, endpoint: BrokerEndpoint) -> Self {
        if self.endpoints.push(endpoint).is_err() {
            warn!("endpoint list full, ignoring extra broker");
        }
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        match (String::try_from(username), String::try_from(password)) {
            (Ok(username), Ok(password)) => {
                self.credentials = Some(Credentials { username, password });
            }
            _ => warn!("broker credentials too long, connecting anonymously"),
        }
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_presence_interval(mut self, interval: Duration) -> Self {
        self.presence_interval = interval;
        self
    }

    pub fn with_utc_offset(mut self, offset_secs: i32) -> Self {
        self.utc_offset_secs = offset_secs;
        self
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn with_updated_by(mut self, updated_by: &str) -> Self {
        self.updated_by = String::try_from(updated_by).ok();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_is_derived_from_hardware_id() {
        let a = DeviceIdentity::new("acad", "m5-001", &[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]).unwrap();
        let b = DeviceIdentity::new("acad", "m5-001", &[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]).unwrap();
        assert_eq!(a.client_id(), "kiosk-deadbeef0001");
        assert_eq!(a, b);
    }

    #[test]
    fn identity_rejects_empty_ids() {
        assert_eq!(
            DeviceIdentity::new("", "dev", &[1]),
            Err(IdentityError::Empty)
        );
    }

    #[test]
    fn endpoint_urls() {
        let ep: BrokerEndpoint = "mqtt://broker.local:1884".parse().unwrap();
        assert_eq!((ep.host(), ep.port()), ("broker.local", 1884));

        let ep: BrokerEndpoint = "mqtts://secure.example.com".parse().unwrap();
        assert_eq!((ep.host(), ep.port()), ("secure.example.com", 8883));

        let ep: BrokerEndpoint = "WS://10.0.0.2".parse().unwrap();
        assert_eq!(ep.port(), 1883);

        let ep: BrokerEndpoint = "10.0.0.3:2000".parse().unwrap();
        assert_eq!((ep.host(), ep.port()), ("10.0.0.3", 2000));

        assert_eq!(
            "http://x".parse::<BrokerEndpoint>(),
            Err(EndpointError::UnsupportedScheme)
        );
        assert_eq!(
            "mqtt://x:port".parse::<BrokerEndpoint>(),
            Err(EndpointError::InvalidPort)
        );
        assert_eq!(
            "mqtt://".parse::<BrokerEndpoint>(),
            Err(EndpointError::EmptyHost)
        );
    }

    #[test]
    fn builder_keeps_endpoint_order() {
        let identity = DeviceIdentity::new("a", "d", &[1]).unwrap();
        let config = KioskConfig::new(identity)
            .with_endpoint(BrokerEndpoint::new("one", 1883).unwrap())
            .with_endpoint(BrokerEndpoint::new("two", 1883).unwrap());
        assert_eq!(config.endpoints[0].host(), "one");
        assert_eq!(config.endpoints[1].host(), "two");
        assert_eq!(config.reconnect_backoff, Duration::from_secs(3));
    }
}
