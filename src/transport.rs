//! # MQTT Transport Abstraction
//!
//! `MqttTransport` abstracts the byte stream a broker session runs over, and
//! `Connector` abstracts how such a stream is opened towards one
//! [`BrokerEndpoint`]. The TCP implementations sit on top of `embassy-net`.

use embassy_net::dns::{self, DnsQueryType};
use embassy_net::tcp::{self, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

use crate::config::BrokerEndpoint;

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

/// A trait representing a transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read, which is never zero.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Resolves once at least one byte can be read without blocking.
    ///
    /// Cancelling this future never loses data, which is what lets the poll
    /// loop race it against timers.
    async fn readable(&mut self);
}

/// Opens transports towards broker endpoints.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Transport<'c>: MqttTransport
    where
        Self: 'c;
    type Error: core::fmt::Debug;

    /// Whether the underlying network (Wi-Fi association plus IP config) is up.
    fn is_link_up(&self) -> bool;

    /// Opens a fresh stream to `endpoint`.
    async fn connect<'c>(
        &'c mut self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Self::Transport<'c>, Self::Error>;
}

/// Errors from [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpTransportError {
    Socket(tcp::Error),
    TimedOut,
    Closed,
}

impl TransportError for TcpTransportError {}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given socket and read timeout.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// A helper function to perform a read with a timeout.
    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, TcpTransportError> {
        // Use `select` to race the read operation against a timer.
        let read_fut = self.socket.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                // If the peer closes the connection, read returns 0.
                debug!("tcp: connection closed by peer");
                Err(TcpTransportError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => {
                trace!("tcp: read {} bytes", n);
                Ok(n)
            }
            futures::future::Either::Left((Err(e), _)) => Err(TcpTransportError::Socket(e)),
            futures::future::Either::Right(((), _)) => {
                debug!("tcp: read timed out");
                Err(TcpTransportError::TimedOut)
            }
        }
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpTransportError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("tcp: write {} bytes", buf.len());
        self.socket
            .write_all(buf)
            .await
            .map_err(TcpTransportError::Socket)?;

        // Flush to ensure data is actually sent to the network
        self.socket.flush().await.map_err(TcpTransportError::Socket)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_with_timeout(buf).await
    }

    async fn readable(&mut self) {
        self.socket.wait_read_ready().await
    }
}

/// Errors from [`TcpConnector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorError {
    Dns(dns::Error),
    NoAddress,
    Connect(tcp::ConnectError),
}

/// Opens TCP sockets on an `embassy-net` stack, reusing one pair of socket
/// buffers for every attempt.
pub struct TcpConnector<'d, const RX: usize, const TX: usize> {
    stack: Stack<'d>,
    rx_buffer: [u8; RX],
    tx_buffer: [u8; TX],
    io_timeout: Duration,
}

impl<'d, const RX: usize, const TX: usize> TcpConnector<'d, RX, TX> {
    pub fn new(stack: Stack<'d>, io_timeout: Duration) -> Self {
        Self {
            stack,
            rx_buffer: [0; RX],
            tx_buffer: [0; TX],
            io_timeout,
        }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddress, ConnectorError> {
        if let Ok(addr) = host.parse::<core::net::Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(addr));
        }
        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(ConnectorError::Dns)?;
        addrs.first().copied().ok_or(ConnectorError::NoAddress)
    }
}

impl<'d, const RX: usize, const TX: usize> Connector for TcpConnector<'d, RX, TX> {
    type Transport<'c>
        = TcpTransport<'c>
    where
        Self: 'c;
    type Error = ConnectorError;

    fn is_link_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    async fn connect<'c>(
        &'c mut self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Self::Transport<'c>, Self::Error> {
        let address = self.resolve(endpoint.host()).await?;
        debug!("tcp: connecting to {}:{}", endpoint.host(), endpoint.port());

        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buffer, &mut self.tx_buffer);
        // The socket-level timeout only catches dead peers; reads have their own.
        socket.set_timeout(Some(self.io_timeout * 4));
        socket
            .connect((address, endpoint.port()))
            .await
            .map_err(ConnectorError::Connect)?;
        Ok(TcpTransport::new(socket, self.io_timeout))
    }
}
