//! # MQTT 3.1.1 Client
//!
//! A single-session client over any [`MqttTransport`]. It owns one receive
//! and one transmit buffer of `BUF` bytes and never allocates.
//!
//! Inbound PUBLISH packets that fit the receive buffer are handed out whole.
//! Larger ones are streamed: [`MqttClient::poll`] yields one
//! [`Fragment`] per call, each tagged with its byte offset and the total
//! payload length, and the caller reassembles them. QoS 1 deliveries are
//! acknowledged once the last byte has been handed out.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::error::{MqttError, ProtocolError};
use crate::packet::{
    ConnAck, Connect, EncodePacket, FixedHeader, MqttPacket, PINGRESP, PUBLISH,
    PingReq, PubAck, Publish, PublishHeader, QoS, Subscribe, Will, decode,
};
use crate::reassembly::Fragment;
use crate::topics::Topic;
use crate::transport::MqttTransport;
use crate::util::read_variable_byte_integer;

/// Filters sent per SUBSCRIBE packet.
const FILTERS_PER_SUBSCRIBE: usize = 8;

/// Session parameters presented in CONNECT.
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    keep_alive: Duration,
    clean_session: bool,
    username: Option<&'a str>,
    password: Option<&'a [u8]>,
    will: Option<Will<'a>>,
}

impl<'a> MqttOptions<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            username: None,
            password: None,
            will: None,
        }
    }

    /// A zero keep-alive disables PINGREQ entirely.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    pub fn with_will(mut self, will: Will<'a>) -> Self {
        self.will = Some(will);
        self
    }

    pub fn client_id(&self) -> &str {
        self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

/// What [`MqttClient::poll`] surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttEvent<'a> {
    Message {
        topic: &'a str,
        fragment: Fragment<'a>,
        qos: QoS,
        retain: bool,
    },
}

/// An oversized PUBLISH being handed out piece by piece.
#[derive(Debug)]
struct Stream {
    topic: Topic,
    qos: QoS,
    retain: bool,
    packet_id: Option<u16>,
    total: usize,
    offset: usize,
    done: bool,
}

pub struct MqttClient<'o, T: MqttTransport, const BUF: usize> {
    transport: T,
    options: MqttOptions<'o>,
    rx: [u8; BUF],
    rx_start: usize,
    rx_end: usize,
    tx: [u8; BUF],
    next_packet_id: u16,
    last_sent: Instant,
    ping_sent: Option<Instant>,
    stream: Option<Stream>,
}

impl<'o, T: MqttTransport, const BUF: usize> MqttClient<'o, T, BUF> {
    pub fn new(transport: T, options: MqttOptions<'o>) -> Self {
        Self {
            transport,
            options,
            rx: [0; BUF],
            rx_start: 0,
            rx_end: 0,
            tx: [0; BUF],
            next_packet_id: 1,
            last_sent: Instant::now(),
            ping_sent: None,
            stream: None,
        }
    }

    pub fn options(&self) -> &MqttOptions<'o> {
        &self.options
    }

    /// Sends CONNECT and waits for CONNACK.
    pub async fn connect(&mut self) -> Result<(), MqttError<T::Error>> {
        let keep_alive = self.options.keep_alive.as_secs().min(u16::MAX as u64) as u16;
        let mut packet = Connect::new(self.options.client_id, keep_alive, self.options.clean_session);
        packet.will = self.options.will;
        packet.username = self.options.username;
        packet.password = self.options.password;
        self.send_packet(&packet).await?;
        debug!("mqtt: CONNECT sent as {}", self.options.client_id);

        loop {
            let (header, header_len) = self.read_fixed_header().await?;
            let len = header_len + header.remaining_len;
            if len > BUF {
                return Err(ProtocolError::PayloadTooLarge.into());
            }
            self.fill(len).await?;
            let body = &self.rx[self.rx_start + header_len..self.rx_start + len];
            let ack: Option<ConnAck> = match decode(header, body)? {
                MqttPacket::ConnAck(ack) => Some(ack),
                _ => None,
            };
            self.consume(len);
            match ack {
                Some(ack) if ack.reason_code == 0 => {
                    info!("mqtt: CONNACK (session present: {})", ack.session_present);
                    self.ping_sent = None;
                    return Ok(());
                }
                Some(ack) => return Err(MqttError::ConnectionRefused(ack.reason_code.into())),
                None => debug!("mqtt: ignoring packet type {} before CONNACK", header.packet_type),
            }
        }
    }

    /// Sends SUBSCRIBE for every filter without waiting for SUBACK;
    /// [`poll`](Self::poll) logs refusals when the SUBACK arrives.
    pub async fn subscribe(&mut self, filters: &[&str], qos: QoS) -> Result<(), MqttError<T::Error>> {
        for chunk in filters.chunks(FILTERS_PER_SUBSCRIBE) {
            let mut topics = Vec::new();
            for filter in chunk {
                // Chunk size never exceeds the packet's capacity.
                let _ = topics.push((*filter, qos));
            }
            let packet = Subscribe {
                packet_id: self.take_packet_id(),
                topics,
            };
            self.send_packet(&packet).await?;
            debug!("mqtt: SUBSCRIBE {} filters", chunk.len());
        }
        Ok(())
    }

    /// Publishes without waiting for PUBACK.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError<T::Error>> {
        let mut packet = Publish::new(topic, payload, qos, retain);
        if qos != QoS::AtMostOnce {
            packet.packet_id = Some(self.take_packet_id());
        }
        self.send_packet(&packet).await?;
        trace!("mqtt: PUBLISH {} ({} bytes)", topic, payload.len());
        Ok(())
    }

    /// Whether [`poll`](Self::poll) can make progress without reading the socket.
    pub fn has_pending(&self) -> bool {
        self.rx_end > self.rx_start || self.stream.as_ref().is_some_and(|s| !s.done)
    }

    /// Resolves when [`poll`](Self::poll) has something to do. Safe to cancel.
    pub async fn readable(&mut self) {
        if self.has_pending() {
            return;
        }
        self.transport.readable().await
    }

    /// Reads and handles one packet, or one fragment of a streamed PUBLISH.
    ///
    /// Control packets are handled internally and yield `Ok(None)`.
    pub async fn poll(&mut self) -> Result<Option<MqttEvent<'_>>, MqttError<T::Error>> {
        if self.stream.as_ref().is_some_and(|s| s.done) {
            self.stream = None;
        }
        if self.stream.is_some() {
            return self.continue_stream().await;
        }

        let (header, header_len) = self.read_fixed_header().await?;
        let len = header_len + header.remaining_len;
        if len > BUF {
            if header.packet_type != PUBLISH {
                return Err(ProtocolError::PayloadTooLarge.into());
            }
            return self.start_stream(header, header_len).await;
        }
        self.fill(len).await?;
        let start = self.rx_start + header_len;
        let end = self.rx_start + len;
        self.consume(len);

        if header.packet_type == PUBLISH {
            let publish = PublishHeader::decode(header.flags, &self.rx[start..end])?;
            self.acknowledge(publish.qos, publish.packet_id).await?;
            return match decode(header, &self.rx[start..end])? {
                MqttPacket::Publish(p) => Ok(Some(MqttEvent::Message {
                    topic: p.topic,
                    fragment: Fragment::whole(p.payload),
                    qos: p.qos,
                    retain: p.retain,
                })),
                _ => Err(ProtocolError::InvalidResponse.into()),
            };
        }

        match decode(header, &self.rx[start..end])? {
            MqttPacket::PingResp => {
                trace!("mqtt: PINGRESP");
                self.ping_sent = None;
            }
            MqttPacket::SubAck(ack) => {
                if ack.any_rejected() {
                    warn!("mqtt: broker refused a subscription (packet {})", ack.packet_id);
                } else {
                    debug!("mqtt: SUBACK {}", ack.packet_id);
                }
            }
            MqttPacket::PubAck(ack) => trace!("mqtt: PUBACK {}", ack.packet_id),
            MqttPacket::ConnAck(_) => warn!("mqtt: unexpected CONNACK mid-session"),
            MqttPacket::Publish(_) => {}
        }
        Ok(None)
    }

    /// When [`keepalive`](Self::keepalive) next has work.
    pub fn keepalive_deadline(&self) -> Option<Instant> {
        let keep_alive = self.options.keep_alive;
        if keep_alive.as_ticks() == 0 {
            return None;
        }
        Some(match self.ping_sent {
            Some(sent) => sent + keep_alive,
            None => self.last_sent + keep_alive / 2,
        })
    }

    /// Sends PINGREQ after half a keep-alive period without outbound
    /// traffic. Fails with [`MqttError::Timeout`] once a PINGREQ has gone a
    /// full period unanswered.
    pub async fn keepalive(&mut self, now: Instant) -> Result<(), MqttError<T::Error>> {
        let keep_alive = self.options.keep_alive;
        if keep_alive.as_ticks() == 0 {
            return Ok(());
        }
        if let Some(sent) = self.ping_sent {
            if now >= sent + keep_alive {
                warn!("mqtt: no PINGRESP within keep-alive");
                return Err(MqttError::Timeout);
            }
            return Ok(());
        }
        if now >= self.last_sent + keep_alive / 2 {
            self.send_packet(&PingReq).await?;
            self.ping_sent = Some(now);
            trace!("mqtt: PINGREQ");
        }
        Ok(())
    }

    async fn start_stream(
        &mut self,
        header: FixedHeader,
        header_len: usize,
    ) -> Result<Option<MqttEvent<'_>>, MqttError<T::Error>> {
        self.fill(header_len + 2).await?;
        let at = self.rx_start + header_len;
        let topic_len = u16::from_be_bytes([self.rx[at], self.rx[at + 1]]) as usize;
        let id_len = if (header.flags >> 1) & 0x03 != 0 { 2 } else { 0 };
        let var_len = 2 + topic_len + id_len;
        if var_len > header.remaining_len {
            return Err(ProtocolError::MalformedPacket.into());
        }
        if header_len + var_len > BUF {
            return Err(ProtocolError::PayloadTooLarge.into());
        }
        self.fill(header_len + var_len).await?;

        // The fill may have compacted the buffer.
        let at = self.rx_start + header_len;
        let var_header = &self.rx[at..at + var_len];
        let publish = PublishHeader::decode(header.flags, var_header)?;
        let topic = core::str::from_utf8(&var_header[2..2 + publish.topic_len])
            .map_err(|_| ProtocolError::InvalidUtf8String)?;
        let topic = Topic::try_from(topic).map_err(|_| ProtocolError::PayloadTooLarge)?;
        let total = header.remaining_len - var_len;
        debug!("mqtt: streaming {} byte PUBLISH on {}", total, topic.as_str());

        self.consume(header_len + var_len);
        self.stream = Some(Stream {
            topic,
            qos: publish.qos,
            retain: publish.retain,
            packet_id: publish.packet_id,
            total,
            offset: 0,
            done: false,
        });
        self.continue_stream().await
    }

    async fn continue_stream(&mut self) -> Result<Option<MqttEvent<'_>>, MqttError<T::Error>> {
        let Some((offset, total)) = self.stream.as_ref().map(|s| (s.offset, s.total)) else {
            return Ok(None);
        };
        let remaining = total - offset;
        if remaining > 0 && self.rx_end == self.rx_start {
            self.fill(1).await?;
        }
        let take = remaining.min(self.rx_end - self.rx_start);
        let start = self.rx_start;
        self.consume(take);

        let mut ack = None;
        if let Some(stream) = self.stream.as_mut() {
            stream.offset += take;
            if stream.offset == stream.total {
                stream.done = true;
                ack = Some((stream.qos, stream.packet_id));
            }
        }
        if let Some((qos, packet_id)) = ack {
            self.acknowledge(qos, packet_id).await?;
        }

        let Some(stream) = self.stream.as_ref() else {
            return Ok(None);
        };
        Ok(Some(MqttEvent::Message {
            topic: stream.topic.as_str(),
            fragment: Fragment {
                offset,
                total,
                data: &self.rx[start..start + take],
            },
            qos: stream.qos,
            retain: stream.retain,
        }))
    }

    async fn acknowledge(&mut self, qos: QoS, packet_id: Option<u16>) -> Result<(), MqttError<T::Error>> {
        match (qos, packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => self.send_packet(&PubAck { packet_id }).await,
            (QoS::ExactlyOnce, _) => {
                warn!("mqtt: QoS 2 delivery is not acknowledged");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Reads the fixed header without consuming it. Returns the header and
    /// its length in bytes.
    async fn read_fixed_header(&mut self) -> Result<(FixedHeader, usize), MqttError<T::Error>> {
        self.fill(2).await?;
        loop {
            let available = &self.rx[self.rx_start + 1..self.rx_end];
            let mut cursor = 0;
            match read_variable_byte_integer(&mut cursor, available) {
                Ok(remaining_len) => {
                    let header = FixedHeader::new(self.rx[self.rx_start], remaining_len);
                    return Ok((header, 1 + cursor));
                }
                Err(ProtocolError::MalformedPacket) if available.len() < 4 => {
                    let buffered = self.rx_end - self.rx_start;
                    self.fill(buffered + 1).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reads until at least `min` unconsumed bytes are buffered.
    async fn fill(&mut self, min: usize) -> Result<(), MqttError<T::Error>> {
        if min > BUF {
            return Err(ProtocolError::BufferTooSmall.into());
        }
        while self.rx_end - self.rx_start < min {
            if self.rx_start + min > BUF {
                self.rx.copy_within(self.rx_start..self.rx_end, 0);
                self.rx_end -= self.rx_start;
                self.rx_start = 0;
            }
            let n = self
                .transport
                .recv(&mut self.rx[self.rx_end..])
                .await
                .map_err(MqttError::Transport)?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.rx_end += n;
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.rx_start += n;
        if self.rx_start >= self.rx_end {
            self.rx_start = 0;
            self.rx_end = 0;
        }
    }

    async fn send_packet(&mut self, packet: &impl EncodePacket) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx)?;
        self.transport
            .send(&self.tx[..len])
            .await
            .map_err(MqttError::Transport)?;
        self.last_sent = Instant::now();
        Ok(())
    }

    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::vec;
    use std::vec::Vec as StdVec;

    use embassy_futures::block_on;

    use super::*;
    use crate::packet::PINGREQ;
    use crate::transport::TransportError;

    #[derive(Debug, PartialEq)]
    struct Eof;

    impl TransportError for Eof {}

    /// Replays scripted inbound chunks and records every write.
    #[derive(Default)]
    struct Script {
        inbound: VecDeque<StdVec<u8>>,
        sent: StdVec<StdVec<u8>>,
    }

    impl Script {
        fn with(chunks: &[&[u8]]) -> Self {
            Self {
                inbound: chunks.iter().map(|c| c.to_vec()).collect(),
                sent: StdVec::new(),
            }
        }
    }

    impl MqttTransport for &mut Script {
        type Error = Eof;

        async fn send(&mut self, buf: &[u8]) -> Result<(), Eof> {
            self.sent.push(buf.to_vec());
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Eof> {
            let mut chunk = self.inbound.pop_front().ok_or(Eof)?;
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.inbound.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        async fn readable(&mut self) {}
    }

    const CONNACK_OK: &[u8] = &[0x20, 0x02, 0x00, 0x00];

    fn publish_bytes(topic: &str, payload: &[u8], qos: QoS, packet_id: u16) -> StdVec<u8> {
        let mut packet = Publish::new(topic, payload, qos, false);
        if qos != QoS::AtMostOnce {
            packet.packet_id = Some(packet_id);
        }
        let mut buf = vec![0u8; payload.len() + topic.len() + 16];
        let n = packet.encode(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn connect_waits_for_connack() {
        let mut script = Script::with(&[CONNACK_OK]);
        let mut client = MqttClient::<_, 64>::new(&mut script, MqttOptions::new("kiosk-01"));
        block_on(client.connect()).unwrap();
        drop(client);
        assert_eq!(script.sent.len(), 1);
        assert_eq!(script.sent[0][0], 0x10);
    }

    #[test]
    fn refused_connack_is_an_error() {
        let mut script = Script::with(&[&[0x20, 0x02, 0x00, 0x05]]);
        let mut client = MqttClient::<_, 64>::new(&mut script, MqttOptions::new("kiosk-01"));
        assert!(matches!(
            block_on(client.connect()),
            Err(MqttError::ConnectionRefused(crate::error::ConnectReasonCode::NotAuthorized))
        ));
    }

    #[test]
    fn small_qos1_publish_is_whole_and_acked() {
        let publish = publish_bytes("a/b", b"{\"x\":1}", QoS::AtLeastOnce, 42);
        // Split mid-header to exercise buffering.
        let (head, tail) = publish.split_at(3);
        let mut script = Script::with(&[CONNACK_OK, head, tail]);
        let mut client = MqttClient::<_, 64>::new(&mut script, MqttOptions::new("c"));
        block_on(client.connect()).unwrap();
        match block_on(client.poll()).unwrap() {
            Some(MqttEvent::Message { topic, fragment, qos, .. }) => {
                assert_eq!(topic, "a/b");
                assert_eq!(qos, QoS::AtLeastOnce);
                assert!(fragment.is_whole());
                assert_eq!(fragment.data, b"{\"x\":1}");
            }
            None => panic!("expected a message"),
        }
        drop(client);
        assert_eq!(script.sent.last().unwrap(), &[0x40, 0x02, 0x00, 42]);
    }

    #[test]
    fn oversized_publish_streams_fragments_then_acks() {
        let payload: StdVec<u8> = (0..100u8).collect();
        let publish = publish_bytes("big", &payload, QoS::AtLeastOnce, 7);
        let mut script = Script::with(&[CONNACK_OK, &publish]);
        let mut client = MqttClient::<_, 32>::new(&mut script, MqttOptions::new("c"));
        block_on(client.connect()).unwrap();

        let mut collected = StdVec::new();
        loop {
            let Some(MqttEvent::Message { topic, fragment, .. }) = block_on(client.poll()).unwrap()
            else {
                panic!("expected a fragment");
            };
            assert_eq!(topic, "big");
            assert_eq!(fragment.total, 100);
            assert_eq!(fragment.offset, collected.len());
            collected.extend_from_slice(fragment.data);
            if collected.len() == fragment.total {
                break;
            }
        }
        assert!(!client.has_pending());
        drop(client);
        assert_eq!(collected, payload);
        assert_eq!(script.sent.len(), 2);
        assert_eq!(script.sent[1], [0x40, 0x02, 0x00, 7]);
    }

    #[test]
    fn stream_header_straddling_the_buffer_end_is_compacted() {
        let small = publish_bytes("a/b", &[b'x'; 49], QoS::AtMostOnce, 0);
        assert_eq!(small.len(), 56);
        let payload: StdVec<u8> = (0..200u8).collect();
        let big = publish_bytes(
            "academies/a/devices/d/students_today",
            &payload,
            QoS::AtMostOnce,
            0,
        );
        let mut first = small.clone();
        first.extend_from_slice(&big[..5]);
        let mut script = Script::with(&[CONNACK_OK, &first, &big[5..]]);
        let mut client = MqttClient::<_, 64>::new(&mut script, MqttOptions::new("c"));
        block_on(client.connect()).unwrap();

        match block_on(client.poll()).unwrap() {
            Some(MqttEvent::Message { topic, fragment, .. }) => {
                assert_eq!(topic, "a/b");
                assert!(fragment.is_whole());
            }
            None => panic!("expected the small message"),
        }

        let mut collected = StdVec::new();
        while collected.len() < payload.len() {
            let Some(MqttEvent::Message { topic, fragment, .. }) = block_on(client.poll()).unwrap()
            else {
                panic!("expected a fragment");
            };
            assert_eq!(topic, "academies/a/devices/d/students_today");
            assert_eq!(fragment.total, 200);
            assert_eq!(fragment.offset, collected.len());
            collected.extend_from_slice(fragment.data);
        }
        assert_eq!(collected, payload);
    }

    #[test]
    fn pingresp_clears_outstanding_ping() {
        let mut script = Script::with(&[CONNACK_OK, &[PINGRESP << 4, 0]]);
        let options = MqttOptions::new("c").with_keep_alive(Duration::from_secs(10));
        let mut client = MqttClient::<_, 64>::new(&mut script, options);
        block_on(client.connect()).unwrap();

        let later = client.last_sent + Duration::from_secs(5);
        block_on(client.keepalive(later)).unwrap();
        assert_eq!(client.keepalive_deadline(), Some(later + Duration::from_secs(10)));
        assert!(block_on(client.poll()).unwrap().is_none());
        assert!(client.ping_sent.is_none());
        drop(client);
        assert_eq!(script.sent[1], [PINGREQ << 4, 0]);
    }

    #[test]
    fn unanswered_ping_times_out() {
        let mut script = Script::with(&[CONNACK_OK]);
        let options = MqttOptions::new("c").with_keep_alive(Duration::from_secs(10));
        let mut client = MqttClient::<_, 64>::new(&mut script, options);
        block_on(client.connect()).unwrap();
        let sent_at = client.last_sent + Duration::from_secs(6);
        block_on(client.keepalive(sent_at)).unwrap();
        assert!(block_on(client.keepalive(sent_at + Duration::from_secs(9))).is_ok());
        assert!(matches!(
            block_on(client.keepalive(sent_at + Duration::from_secs(10))),
            Err(MqttError::Timeout)
        ));
    }

    #[test]
    fn subscribe_batches_filters() {
        let mut script = Script::default();
        let mut client = MqttClient::<_, 256>::new(&mut script, MqttOptions::new("c"));
        let filters = ["a", "b", "c", "d", "e", "f", "g", "h", "i"];
        block_on(client.subscribe(&filters, QoS::AtLeastOnce)).unwrap();
        drop(client);
        assert_eq!(script.sent.len(), 2);
        assert_eq!(script.sent[0][0], 0x82);
        // Second packet carries packet id 2 and the ninth filter.
        assert_eq!(&script.sent[1][2..], &[0, 2, 0, 1, b'i', 1]);
    }

    #[test]
    fn closed_stream_is_reported() {
        let mut script = Script::with(&[CONNACK_OK]);
        let mut client = MqttClient::<_, 64>::new(&mut script, MqttOptions::new("c"));
        block_on(client.connect()).unwrap();
        assert!(matches!(block_on(client.poll()), Err(MqttError::Transport(Eof))));
    }
}
