//! # Error Types
//!
//! Error enums for every layer of the crate: the MQTT client and its codec,
//! the reason a broker session ended, locally rejected commands, and payload
//! schema failures. None of these is ever fatal to the device; each one ends
//! in a log line, an `Err` handed back to the UI, or the reconnect path.

use core::fmt;

/// The primary error enum for the MQTT client.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred while encoding or decoding a packet.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The client is not currently connected to the broker.
    NotConnected,
    /// An operation timed out.
    Timeout,
}

impl<T> From<ProtocolError> for MqttError<T> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

/// Represents the reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// An unknown or unspecified error occurred.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates codec and framing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The server sent an invalid or unexpected response.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
}

/// Why a broker session ended, or why an attempt never became one.
///
/// Every variant takes the same backoff-and-rotate path in
/// [`ConnectionManager`](crate::connection::ConnectionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// The network link was down when a connect was due.
    LinkDown,
    /// No CONNACK arrived within the connect timeout.
    ConnectTimeout,
    /// The endpoint could not be resolved or the TCP connect failed.
    Unreachable,
    /// The broker answered CONNACK with a non-zero code.
    Refused(ConnectReasonCode),
    /// No PINGRESP arrived within the keep-alive interval.
    KeepaliveTimeout,
    /// The socket failed mid-session.
    Transport,
    /// The broker sent something the codec could not accept.
    Protocol(ProtocolError),
    /// The peer closed the connection.
    Closed,
}

impl<T> From<MqttError<T>> for DisconnectReason {
    fn from(err: MqttError<T>) -> Self {
        match err {
            MqttError::Transport(_) => DisconnectReason::Transport,
            MqttError::Protocol(ProtocolError::ConnectionClosed) => DisconnectReason::Closed,
            MqttError::Protocol(p) => DisconnectReason::Protocol(p),
            MqttError::ConnectionRefused(code) => DisconnectReason::Refused(code),
            MqttError::NotConnected => DisconnectReason::Closed,
            MqttError::Timeout => DisconnectReason::ConnectTimeout,
        }
    }
}

/// A user-originated command that was refused before any publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Item-level commands need a bound student.
    Unbound,
    /// A student id was required but the roster entry had none.
    EmptyStudentId,
    /// The item is not part of the current homework snapshot.
    UnknownItem,
    /// The requested action does not match the item's current phase.
    PhaseMismatch,
    /// The item is in a phase that accepts no user request.
    ReadOnly,
    /// Another card tap was accepted too recently.
    Debounced,
    /// No broker session is up, so the command would be lost.
    Offline,
    /// A logout is in progress and the device is about to restart.
    RestartPending,
    /// A student or item id does not fit in a command topic.
    TooLong,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CommandError::Unbound => "no student is bound to this device",
            CommandError::EmptyStudentId => "student id is empty",
            CommandError::UnknownItem => "homework item is not in the current list",
            CommandError::PhaseMismatch => "action does not match the item's phase",
            CommandError::ReadOnly => "item is waiting for review",
            CommandError::Debounced => "tap ignored, too soon after the previous one",
            CommandError::Offline => "broker is not connected",
            CommandError::RestartPending => "device is restarting",
            CommandError::TooLong => "identifier too long",
        };
        f.write_str(msg)
    }
}

/// A payload that did not match its topic's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The payload is not valid JSON or does not have the expected shape.
    Json { line: usize, column: usize },
    /// A homework phase outside `1..=4`.
    InvalidPhase(u8),
    /// The payload is not UTF-8.
    NotUtf8,
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json {
            line: err.line(),
            column: err.column(),
        }
    }
}
