//! Common types for mqtt311.

use serde::{Deserialize, Serialize};

/// Largest value a remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Longest possible fixed header: type byte plus a 4-byte remaining length.
pub const MAX_FIXED_HEADER_LEN: usize = 5;

/// Control packet type bytes (high nibble of the first header byte).
pub mod packet_type {
    pub const CONNECT: u8 = 0x10;
    pub const CONNACK: u8 = 0x20;
    pub const PUBLISH: u8 = 0x30;
    pub const PUBACK: u8 = 0x40;
    pub const PUBREC: u8 = 0x50;
    pub const PUBREL: u8 = 0x60;
    pub const PUBCOMP: u8 = 0x70;
    pub const SUBSCRIBE: u8 = 0x80;
    pub const SUBACK: u8 = 0x90;
    pub const UNSUBSCRIBE: u8 = 0xa0;
    pub const UNSUBACK: u8 = 0xb0;
    pub const PINGREQ: u8 = 0xc0;
    pub const PINGRESP: u8 = 0xd0;
    pub const DISCONNECT: u8 = 0xe0;
}

/// Decoded fixed header of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Packet type in the high nibble, flags in the low nibble.
    pub first_byte: u8,
    /// Number of payload bytes following the header.
    pub remaining_length: u32,
}

impl FixedHeader {
    pub fn new(first_byte: u8, remaining_length: u32) -> Self {
        Self {
            first_byte,
            remaining_length,
        }
    }

    /// Packet type with the flag nibble masked off.
    pub fn packet_type(&self) -> u8 {
        self.first_byte & 0xf0
    }

    /// Flag nibble.
    pub fn flags(&self) -> u8 {
        self.first_byte & 0x0f
    }
}

/// Quality of Service level.
///
/// Publishing is QoS 0 only; the other levels are accepted for the will.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    SocketConnecting,
    Handshaking,
    Connected,
    Disconnected,
}

/// Notification delivered to the connection observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    InitiatingSocketConnection,
    SocketConnected,
    HandshakeSuccessful,
    SocketDisconnected,
}
