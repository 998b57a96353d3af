//! CONNECT packet encoding.

use bytes::Bytes;
use std::time::Duration;

use crate::codec;
use crate::error::{Error, ProtocolError, Result};
use crate::types::QoS;

/// Protocol name and level for MQTT 3.1.1.
const PROTOCOL_HEADER: &[u8] = b"\x00\x04MQTT\x04";

/// Size of the variable header: protocol name, level, flags and keep-alive.
const VARIABLE_HEADER_LEN: usize = PROTOCOL_HEADER.len() + 1 + 2;

/// Last-will message published by the broker on an unclean disconnect.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Will {
    pub topic: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
}

impl Will {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// The CONNECT payload sent at the start of every connection.
///
/// Credentials are only written when the username is non-empty; in that case
/// both the username and password flags are set and a missing password is
/// encoded as an empty field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectMessage {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    pub keep_alive: Duration,
    pub clean_session: bool,
}

impl Default for ConnectMessage {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            will: None,
            keep_alive: Duration::ZERO,
            clean_session: true,
        }
    }
}

impl ConnectMessage {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    fn credentials(&self) -> Option<(&str, &[u8])> {
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => Some((user, self.password.as_deref().unwrap_or_default())),
            _ => None,
        }
    }

    /// The connect-flags byte.
    pub fn flag_byte(&self) -> u8 {
        let mut flags = 0u8;
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
        if self.credentials().is_some() {
            flags |= 0x40 | 0x80;
        }
        flags
    }

    /// Exact encoded length of the CONNECT payload (without fixed header).
    pub fn wire_size(&self) -> usize {
        let mut size = VARIABLE_HEADER_LEN + 2 + self.client_id.len();
        if let Some(will) = &self.will {
            size += 2 + will.topic.len() + 2 + will.payload.len();
        }
        if let Some((user, pass)) = self.credentials() {
            size += 2 + user.len() + 2 + pass.len();
        }
        size
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.wire_size();
        if buf.len() < size {
            return Err(Error::BufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }

        let keep_alive = self.keep_alive.as_secs();
        let keep_alive =
            u16::try_from(keep_alive).map_err(|_| ProtocolError::KeepAliveTooLarge(keep_alive))?;

        let mut pos = 0;
        buf[..PROTOCOL_HEADER.len()].copy_from_slice(PROTOCOL_HEADER);
        pos += PROTOCOL_HEADER.len();
        buf[pos] = self.flag_byte();
        pos += 1;
        pos += codec::write_u16(&mut buf[pos..], keep_alive)?;
        pos += codec::write_string(&mut buf[pos..], &self.client_id)?;

        if let Some(will) = &self.will {
            pos += codec::write_string(&mut buf[pos..], &will.topic)?;
            pos += codec::write_binary(&mut buf[pos..], &will.payload)?;
        }

        if let Some((user, pass)) = self.credentials() {
            pos += codec::write_string(&mut buf[pos..], user)?;
            pos += codec::write_binary(&mut buf[pos..], pass)?;
        }

        Ok(pos)
    }

    /// Encode into a freshly allocated buffer of exactly [`Self::wire_size`] bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.wire_size()];
        let n = self.write_to(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }
}
