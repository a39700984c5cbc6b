//! # MQTT Packet Structures and Serialization
//!
//! MQTT 3.1.1 control packets and their encoding to / decoding from byte
//! buffers. Inbound packets are decoded from their body (everything after
//! the fixed header), because the client reads the fixed header on its own
//! to decide whether a PUBLISH fits its buffer or has to be streamed.

use heapless::Vec;

use crate::error::ProtocolError;
use crate::util::{
    read_u16, read_utf8_string, write_binary, write_raw, write_u16, write_utf8_string,
    write_variable_byte_integer,
};

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }
}

pub const CONNECT: u8 = 1;
pub const CONNACK: u8 = 2;
pub const PUBLISH: u8 = 3;
pub const PUBACK: u8 = 4;
pub const SUBSCRIBE: u8 = 8;
pub const SUBACK: u8 = 9;
pub const PINGREQ: u8 = 12;
pub const PINGRESP: u8 = 13;

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the complete packet (fixed header included) and returns its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError>;
}

/// The first byte and remaining length of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: u8,
    pub flags: u8,
    pub remaining_len: usize,
}

impl FixedHeader {
    pub fn new(first_byte: u8, remaining_len: usize) -> Self {
        Self {
            packet_type: first_byte >> 4,
            flags: first_byte & 0x0F,
            remaining_len,
        }
    }
}

/// Inbound control packets the client acts on.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    SubAck(SubAck),
    PingResp,
}

/// Decodes the body of an inbound packet described by `header`.
pub fn decode<'a>(header: FixedHeader, body: &'a [u8]) -> Result<MqttPacket<'a>, ProtocolError> {
    let packet = match header.packet_type {
        CONNACK => MqttPacket::ConnAck(ConnAck::decode(body)?),
        PUBLISH => MqttPacket::Publish(Publish::decode(header.flags, body)?),
        PUBACK => MqttPacket::PubAck(PubAck::decode(body)?),
        SUBACK => MqttPacket::SubAck(SubAck::decode(body)?),
        PINGRESP => MqttPacket::PingResp,
        other => return Err(ProtocolError::InvalidPacketType(other)),
    };
    Ok(packet)
}

/// Writes `first_byte`, lets `body` fill the content, then fills in the
/// remaining length and compacts the content next to it.
fn encode_framed(
    buf: &mut [u8],
    first_byte: u8,
    body: impl FnOnce(&mut [u8]) -> Result<usize, ProtocolError>,
) -> Result<usize, ProtocolError> {
    // Reserve space for the widest remaining-length field.
    const CONTENT_START: usize = 5;
    if buf.len() < CONTENT_START {
        return Err(ProtocolError::BufferTooSmall);
    }
    buf[0] = first_byte;
    let remaining_len = body(&mut buf[CONTENT_START..])?;
    let len_bytes = write_variable_byte_integer(&mut buf[1..CONTENT_START], remaining_len)?;
    let header_len = 1 + len_bytes;
    buf.copy_within(CONTENT_START..CONTENT_START + remaining_len, header_len);
    Ok(header_len + remaining_len)
}

// --- CONNECT Packet ---

/// A last-will message the broker publishes if the session drops uncleanly.
#[derive(Debug, Clone, Copy)]
pub struct Will<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub will: Option<Will<'a>>,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            will: None,
            username: None,
            password: None,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        encode_framed(buf, CONNECT << 4, |out| {
            let mut cursor = write_utf8_string(out, "MQTT")?;
            // Protocol level 4 is MQTT 3.1.1.
            cursor += write_raw(&mut out[cursor..], &[4, self.flags()])?;
            cursor += write_u16(&mut out[cursor..], self.keep_alive)?;
            cursor += write_utf8_string(&mut out[cursor..], self.client_id)?;
            if let Some(will) = &self.will {
                cursor += write_utf8_string(&mut out[cursor..], will.topic)?;
                cursor += write_binary(&mut out[cursor..], will.payload)?;
            }
            if let Some(username) = self.username {
                cursor += write_utf8_string(&mut out[cursor..], username)?;
            }
            if let Some(password) = self.password {
                cursor += write_binary(&mut out[cursor..], password)?;
            }
            Ok(cursor)
        })
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
}

impl ConnAck {
    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        match body {
            [flags, code, ..] => Ok(Self {
                session_present: (flags & 0x01) != 0,
                reason_code: *code,
            }),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

/// The variable header of an inbound PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishHeader {
    pub qos: QoS,
    pub retain: bool,
    pub packet_id: Option<u16>,
    /// Length of the topic string.
    pub topic_len: usize,
    /// Bytes taken by topic and packet id; the payload starts here.
    pub header_len: usize,
}

impl PublishHeader {
    /// Parses the topic and packet id from the start of a PUBLISH body.
    pub fn decode(flags: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        let qos = QoS::from_bits((flags >> 1) & 0x03)?;
        let retain = (flags & 0x01) != 0;

        let mut cursor = 0;
        let topic = read_utf8_string(&mut cursor, body)?;
        let topic_len = topic.len();

        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };

        Ok(Self {
            qos,
            retain,
            packet_id,
            topic_len,
            header_len: cursor,
        })
    }
}

impl<'a> Publish<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            qos,
            retain,
            payload,
            packet_id: None,
        }
    }

    fn decode(flags: u8, body: &'a [u8]) -> Result<Self, ProtocolError> {
        let header = PublishHeader::decode(flags, body)?;
        let mut cursor = 0;
        let topic = read_utf8_string(&mut cursor, body)?;
        Ok(Publish {
            topic,
            qos: header.qos,
            retain: header.retain,
            payload: &body[header.header_len..],
            packet_id: header.packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut first = (PUBLISH << 4) | ((self.qos as u8) << 1);
        if self.retain {
            first |= 0x01;
        }
        encode_framed(buf, first, |out| {
            let mut cursor = write_utf8_string(out, self.topic)?;
            if self.qos != QoS::AtMostOnce {
                let id = self.packet_id.ok_or(ProtocolError::MalformedPacket)?;
                cursor += write_u16(&mut out[cursor..], id)?;
            }
            cursor += write_raw(&mut out[cursor..], self.payload)?;
            Ok(cursor)
        })
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

impl PubAck {
    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        Ok(Self {
            packet_id: read_u16(&mut cursor, body)?,
        })
    }
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        encode_framed(buf, PUBACK << 4, |out| write_u16(out, self.packet_id))
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), 8>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        // SUBSCRIBE carries the reserved flag bits 0b0010.
        encode_framed(buf, (SUBSCRIBE << 4) | 0x02, |out| {
            let mut cursor = write_u16(out, self.packet_id)?;
            for (topic, qos) in &self.topics {
                cursor += write_utf8_string(&mut out[cursor..], topic)?;
                cursor += write_raw(&mut out[cursor..], &[*qos as u8])?;
            }
            Ok(cursor)
        })
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, 8>,
}

impl SubAck {
    fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let mut return_codes = Vec::new();
        for code in &body[cursor..] {
            let _ = return_codes.push(*code);
        }
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }

    /// `0x80` in a return code means the broker refused that filter.
    pub fn any_rejected(&self) -> bool {
        self.return_codes.iter().any(|code| *code == 0x80)
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        write_raw(buf, &[PINGREQ << 4, 0x00])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_carries_retained_will() {
        let mut connect = Connect::new("kiosk-a1b2", 30, true);
        connect.will = Some(Will {
            topic: "p",
            payload: b"{}",
            qos: QoS::AtLeastOnce,
            retain: true,
        });
        let mut buf = [0u8; 64];
        let n = connect.encode(&mut buf).unwrap();

        assert_eq!(buf[0], 0x10);
        assert_eq!(buf[1] as usize, n - 2);
        // "MQTT" name, level 4, then flags: clean + will + will QoS 1 + will retain.
        assert_eq!(&buf[2..8], &[0, 4, b'M', b'Q', b'T', b'T']);
        assert_eq!(buf[8], 4);
        assert_eq!(buf[9], 0x02 | 0x04 | 0x08 | 0x20);
        assert_eq!(&buf[10..12], &30u16.to_be_bytes());
        // client id, will topic, will payload
        assert_eq!(&buf[12..24], b"\x00\x0akiosk-a1b2");
        assert_eq!(&buf[24..27], b"\x00\x01p");
        assert_eq!(&buf[27..31], b"\x00\x02{}");
        assert_eq!(n, 31);
    }

    #[test]
    fn connect_with_credentials_sets_flags() {
        let mut connect = Connect::new("c", 10, true);
        connect.username = Some("u");
        connect.password = Some(b"pw");
        let mut buf = [0u8; 64];
        connect.encode(&mut buf).unwrap();
        assert_eq!(buf[9], 0x02 | 0x40 | 0x80);
    }

    #[test]
    fn retained_qos1_publish_encoding() {
        let mut publish = Publish::new("a/b", b"hi", QoS::AtLeastOnce, true);
        publish.packet_id = Some(7);
        let mut buf = [0u8; 32];
        let n = publish.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x33, 9, 0, 3, b'a', b'/', b'b', 0, 7, b'h', b'i']);
    }

    #[test]
    fn qos1_publish_without_packet_id_is_rejected() {
        let publish = Publish::new("a", b"", QoS::AtLeastOnce, false);
        let mut buf = [0u8; 16];
        assert_eq!(publish.encode(&mut buf), Err(ProtocolError::MalformedPacket));
    }

    #[test]
    fn decodes_inbound_publish_body() {
        let body = [0, 3, b'a', b'/', b'b', 0, 9, b'x', b'y'];
        let header = FixedHeader::new(0x32, body.len());
        match decode(header, &body).unwrap() {
            MqttPacket::Publish(p) => {
                assert_eq!(p.topic, "a/b");
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert_eq!(p.packet_id, Some(9));
                assert_eq!(p.payload, b"xy");
                assert!(!p.retain);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn subscribe_encoding() {
        let sub = Subscribe::new(1, "t/+", QoS::AtLeastOnce);
        let mut buf = [0u8; 32];
        let n = sub.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x82, 8, 0, 1, 0, 3, b't', b'/', b'+', 1]);
    }

    #[test]
    fn connack_and_suback_decoding() {
        let ack = ConnAck::decode(&[0x01, 0x05]).unwrap();
        assert!(ack.session_present);
        assert_eq!(ack.reason_code, 5);
        assert_eq!(ConnAck::decode(&[0x00]), Err(ProtocolError::MalformedPacket));

        let suback = SubAck::decode(&[0, 2, 0x01, 0x80]).unwrap();
        assert_eq!(suback.packet_id, 2);
        assert!(suback.any_rejected());
    }

    #[test]
    fn unknown_packet_type_is_reported() {
        let header = FixedHeader::new(0xF0, 0);
        assert!(matches!(
            decode(header, &[]),
            Err(ProtocolError::InvalidPacketType(15))
        ));
    }
}
