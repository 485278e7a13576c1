//! MQTT 3.1 / 3.1.1 packet layout.
//!
//! Only what the stub needs: the fixed header fields, the CONNECT variable
//! header and payload, and the handful of replies it sends.

use crate::error::MqttError;
use bytes::Bytes;

pub const CONNECT: u8 = 1;
pub const CONNACK: u8 = 2;
pub const PUBLISH: u8 = 3;
pub const SUBSCRIBE: u8 = 8;
pub const PINGREQ: u8 = 12;
pub const PINGRESP: u8 = 13;
pub const DISCONNECT: u8 = 14;

/// CONNACK, session not present, connection accepted.
pub const CONNACK_ACCEPTED: &[u8] = &[CONNACK << 4, 0x02, 0x00, 0x00];
pub const PINGRESP_PACKET: &[u8] = &[PINGRESP << 4, 0x00];

/// Remaining length takes at most four bytes.
pub const MAX_LENGTH_BYTES: u8 = 4;

const FLAG_WILL: u8 = 0x04;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Accepted protocol name and level pairs.
const PROTOCOLS: [(&[u8], u8); 2] = [(b"MQTT", 4), (b"MQIsdp", 3)];

pub fn packet_name(packet_type: u8) -> &'static str {
    match packet_type {
        CONNECT => "CONNECT",
        CONNACK => "CONNACK",
        PUBLISH => "PUBLISH",
        4 => "PUBACK",
        5 => "PUBREC",
        6 => "PUBREL",
        7 => "PUBCOMP",
        SUBSCRIBE => "SUBSCRIBE",
        9 => "SUBACK",
        10 => "UNSUBSCRIBE",
        11 => "UNSUBACK",
        PINGREQ => "PINGREQ",
        PINGRESP => "PINGRESP",
        DISCONNECT => "DISCONNECT",
        _ => "RESERVED",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Bytes,
}

/// A decoded CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_level: u8,
    pub flags: u8,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    /// Decodes the variable header and payload of a CONNECT packet.
    ///
    /// # Errors
    ///
    /// [`MqttError::UnsupportedProtocol`] for anything but `MQTT`/4 and
    /// `MQIsdp`/3, [`MqttError::Malformed`] when a field runs past the end
    /// of the packet.
    pub fn parse(body: Bytes) -> Result<Self, MqttError> {
        let mut r = Reader { buf: body };
        let name = r.field()?;
        let protocol_level = r.u8()?;
        if !PROTOCOLS.iter().any(|(n, level)| *n == &name[..] && *level == protocol_level) {
            return Err(MqttError::unsupported_protocol(&name, protocol_level));
        }

        let flags = r.u8()?;
        let keep_alive = r.u16()?;
        let client_id = r.string()?;
        let will = if flags & FLAG_WILL == 0 { None } else { Some(Will { topic: r.string()?, message: r.field()? }) };
        let username = if flags & FLAG_USERNAME == 0 { None } else { Some(r.string()?) };
        let password = if flags & FLAG_PASSWORD == 0 { None } else { Some(r.field()?) };

        Ok(Self { protocol_level, flags, keep_alive, client_id, will, username, password })
    }
}

/// Cursor over a packet body.
struct Reader {
    buf: Bytes,
}

impl Reader {
    fn take(&mut self, n: usize) -> Result<Bytes, MqttError> {
        if self.buf.len() < n {
            return Err(MqttError::malformed(format!("need {n} bytes, {} left", self.buf.len())));
        }
        Ok(self.buf.split_to(n))
    }

    fn u8(&mut self) -> Result<u8, MqttError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MqttError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// A length prefixed byte field.
    fn field(&mut self) -> Result<Bytes, MqttError> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    fn string(&mut self) -> Result<String, MqttError> {
        let field = self.field()?;
        String::from_utf8(field.to_vec()).map_err(MqttError::malformed)
    }
}
