//! A minimal MQTT protocol.
//!
//! Enough of MQTT 3.1/3.1.1 to let clients connect and stay connected:
//! CONNECT is validated and answered with CONNACK, PINGREQ with PINGRESP,
//! DISCONNECT half-closes. Every other packet is parsed and dropped.
//!
//! Packets are framed incrementally, like WebSocket frames:
//!
//! ```text
//! FixedCtrl -> FixedLength -> VarHdrPayload -> Complete
//! ```

mod packet;

pub use packet::{Connect, Will};

use crate::bucket::BucketChain;
use crate::connection::ConnCtx;
use crate::error::{MqttError, ProtocolError};
use crate::net::{SendStatus, Transport, send_chain};
use crate::protocol::{Protocol, WriteStatus};
use bytes::BytesMut;
use packet::{CONNACK_ACCEPTED, CONNECT, DISCONNECT, MAX_LENGTH_BYTES, PINGREQ, PINGRESP_PACKET, packet_name};
use tracing::{debug, trace};

/// Largest remaining length accepted by default.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct MqttProtocol {
    max_packet_size: usize,
}

impl Default for MqttProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttProtocol {
    pub fn new() -> Self {
        Self { max_packet_size: DEFAULT_MAX_PACKET_SIZE }
    }

    #[must_use]
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    FixedCtrl,
    FixedLength,
    VarHdrPayload,
    Complete,
}

/// Per-connection MQTT state.
#[derive(Debug)]
pub struct MqttSession {
    state: ParseState,
    /// first byte of the fixed header
    ctrl: u8,
    remaining: usize,
    multiplier: usize,
    length_bytes: u8,
    body: BytesMut,
    connect: Option<Connect>,
    disconnecting: bool,
    out: BucketChain,
}

impl MqttSession {
    fn new() -> Self {
        Self {
            state: ParseState::FixedCtrl,
            ctrl: 0,
            remaining: 0,
            multiplier: 1,
            length_bytes: 0,
            body: BytesMut::new(),
            connect: None,
            disconnecting: false,
            out: BucketChain::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connect.is_some()
    }

    /// The CONNECT packet this session was opened with.
    pub fn connect(&self) -> Option<&Connect> {
        self.connect.as_ref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.connect.as_ref().map(|c| c.client_id.as_str())
    }

    fn packet_type(&self) -> u8 {
        self.ctrl >> 4
    }

    fn reset(&mut self) {
        self.state = ParseState::FixedCtrl;
        self.ctrl = 0;
        self.remaining = 0;
        self.multiplier = 1;
        self.length_bytes = 0;
    }

    /// Consumes a prefix of `buf`, stopping at the end of a packet.
    fn parse(&mut self, buf: &[u8], max_packet_size: usize) -> Result<usize, MqttError> {
        let mut offset = 0;
        while offset < buf.len() && self.state != ParseState::Complete {
            match self.state {
                ParseState::FixedCtrl => {
                    self.ctrl = buf[offset];
                    offset += 1;
                    self.state = ParseState::FixedLength;
                }
                ParseState::FixedLength => {
                    let b = buf[offset];
                    offset += 1;
                    self.remaining += usize::from(b & 0x7f) * self.multiplier;
                    self.length_bytes += 1;
                    if b & 0x80 != 0 {
                        if self.length_bytes == MAX_LENGTH_BYTES {
                            return Err(MqttError::MalformedLength);
                        }
                        self.multiplier *= 128;
                        continue;
                    }
                    if self.remaining > max_packet_size {
                        return Err(MqttError::too_large(self.remaining, max_packet_size));
                    }
                    trace!(packet = packet_name(self.packet_type()), len = self.remaining, "mqtt fixed header");
                    self.body.reserve(self.remaining);
                    self.state = if self.remaining == 0 { ParseState::Complete } else { ParseState::VarHdrPayload };
                }
                ParseState::VarHdrPayload => {
                    let n = (self.remaining - self.body.len()).min(buf.len() - offset);
                    self.body.extend_from_slice(&buf[offset..offset + n]);
                    offset += n;
                    if self.body.len() == self.remaining {
                        self.state = ParseState::Complete;
                    }
                }
                ParseState::Complete => {}
            }
        }
        Ok(offset)
    }
}

impl MqttProtocol {
    fn arm(ctx: &mut ConnCtx, s: &MqttSession) {
        if s.out.total_length() > 0 {
            ctx.enable_tx();
        } else if s.disconnecting {
            ctx.shutdown();
        }
    }

    fn complete(s: &mut MqttSession) -> Result<(), MqttError> {
        let packet_type = s.packet_type();
        let body = s.body.split().freeze();

        match packet_type {
            CONNECT if s.connect.is_some() => return Err(MqttError::malformed("second CONNECT")),
            CONNECT => {
                let connect = Connect::parse(body)?;
                debug!(client_id = %connect.client_id, level = connect.protocol_level, keep_alive = connect.keep_alive, "mqtt connect");
                s.connect = Some(connect);
                s.out.push(CONNACK_ACCEPTED);
            }
            _ if s.connect.is_none() => return Err(MqttError::NotConnected { packet_type }),
            PINGREQ => s.out.push(PINGRESP_PACKET),
            DISCONNECT => {
                debug!(client_id = s.client_id().unwrap_or_default(), "mqtt disconnect");
                s.disconnecting = true;
            }
            _ => trace!(packet = packet_name(packet_type), len = body.len(), "ignoring packet"),
        }
        Ok(())
    }
}

impl Protocol for MqttProtocol {
    type Session = MqttSession;

    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn conn_init(&self, ctx: &mut ConnCtx) -> Result<MqttSession, ProtocolError> {
        ctx.enable_rx();
        Ok(MqttSession::new())
    }

    fn read(&self, ctx: &mut ConnCtx, s: &mut MqttSession, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut offset = 0;
        while offset < buf.len() && !s.disconnecting {
            offset += s.parse(&buf[offset..], self.max_packet_size)?;
            if s.state == ParseState::Complete {
                Self::complete(s)?;
                s.reset();
            }
        }
        if s.disconnecting && offset < buf.len() {
            trace!(len = buf.len() - offset, "discarding input after DISCONNECT");
        }

        Self::arm(ctx, s);
        Ok(buf.len())
    }

    fn write(&self, ctx: &mut ConnCtx, s: &mut MqttSession, io: &mut dyn Transport) -> Result<WriteStatus, ProtocolError> {
        match send_chain(io, &mut s.out, ctx.max_iovec())? {
            SendStatus::Pending => Ok(WriteStatus::Pending),
            SendStatus::Drained => {
                if s.disconnecting {
                    ctx.shutdown();
                }
                Ok(WriteStatus::Flushed)
            }
        }
    }

    fn stop(&self, ctx: &mut ConnCtx, s: &mut MqttSession) {
        s.disconnecting = true;
        Self::arm(ctx, s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::MockTransport;
    use super::packet::tests::connect_body;

    struct Harness {
        proto: MqttProtocol,
        ctx: ConnCtx,
        session: MqttSession,
        io: MockTransport,
    }

    impl Harness {
        fn new(proto: MqttProtocol) -> Self {
            let mut ctx = ConnCtx::detached();
            let session = proto.conn_init(&mut ctx).unwrap();
            Self { proto, ctx, session, io: MockTransport::new() }
        }

        fn feed(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
            let mut data = bytes.to_vec();
            self.proto.read(&mut self.ctx, &mut self.session, &mut data)
        }

        fn flush(&mut self) -> Vec<u8> {
            while self.ctx.tx_enabled() {
                match self.proto.write(&mut self.ctx, &mut self.session, &mut self.io).unwrap() {
                    WriteStatus::Flushed => self.ctx.disable_tx(),
                    WriteStatus::Pending => {}
                }
            }
            self.io.take_written()
        }
    }

    fn packet(ctrl: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![ctrl];
        let mut len = body.len();
        loop {
            let mut b = u8::try_from(len % 128).unwrap();
            len /= 128;
            if len > 0 {
                b |= 0x80;
            }
            out.push(b);
            if len == 0 {
                break;
            }
        }
        out.extend_from_slice(body);
        out
    }

    fn connect() -> Vec<u8> {
        packet(0x10, &connect_body(b"MQTT", 4, 0x02, &[b"sensor-7"]))
    }

    #[test]
    fn connect_is_acknowledged() {
        let mut h = Harness::new(MqttProtocol::new());
        h.feed(&connect()).unwrap();
        assert_eq!(h.flush(), [0x20, 0x02, 0x00, 0x00]);
        assert!(h.session.is_connected());
        assert_eq!(h.session.client_id(), Some("sensor-7"));
    }

    #[test]
    fn ping_and_ignored_packets() {
        let mut h = Harness::new(MqttProtocol::new());
        let mut input = connect();
        input.extend(packet(0x30, b"\x00\x01tpayload"));
        input.extend(packet(0xc0, b""));
        h.feed(&input).unwrap();
        assert_eq!(h.flush(), [0x20, 0x02, 0x00, 0x00, 0xd0, 0x00]);
    }

    #[test]
    fn packets_split_at_every_byte() {
        let mut h = Harness::new(MqttProtocol::new());
        let mut input = connect();
        input.extend(packet(0xc0, b""));
        for b in &input {
            h.feed(std::slice::from_ref(b)).unwrap();
        }
        assert_eq!(h.flush(), [0x20, 0x02, 0x00, 0x00, 0xd0, 0x00]);
    }

    #[test]
    fn multi_byte_remaining_length() {
        let mut h = Harness::new(MqttProtocol::new());
        h.feed(&connect()).unwrap();
        h.flush();
        // 200 bytes needs a two byte length
        let publish = packet(0x30, &[0u8; 200]);
        assert_eq!(&publish[1..3], [0xc8, 0x01]);
        h.feed(&publish).unwrap();
        assert!(h.flush().is_empty());
        assert_eq!(h.session.state, ParseState::FixedCtrl);
    }

    #[test]
    fn disconnect_half_closes() {
        let mut h = Harness::new(MqttProtocol::new());
        let mut input = connect();
        input.extend(packet(0xe0, b""));
        input.extend(packet(0xc0, b""));
        h.feed(&input).unwrap();
        assert!(!h.ctx.shutdown_requested());
        // the PINGREQ after DISCONNECT is not answered
        assert_eq!(h.flush(), [0x20, 0x02, 0x00, 0x00]);
        assert!(h.ctx.shutdown_requested());
    }

    #[test]
    fn packets_before_connect_are_rejected() {
        let mut h = Harness::new(MqttProtocol::new());
        let err = h.feed(&packet(0xc0, b"")).unwrap_err();
        assert!(matches!(err, ProtocolError::Mqtt { source: MqttError::NotConnected { packet_type: 12 } }));
    }

    #[test]
    fn unsupported_protocol_is_an_error() {
        let mut h = Harness::new(MqttProtocol::new());
        let input = packet(0x10, &connect_body(b"MQTT", 5, 0x02, &[b"c"]));
        let err = h.feed(&input).unwrap_err();
        assert!(matches!(err, ProtocolError::Mqtt { source: MqttError::UnsupportedProtocol { level: 5, .. } }));
    }

    #[test]
    fn length_limits() {
        let mut h = Harness::new(MqttProtocol::new());
        let err = h.feed(&[0x10, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ProtocolError::Mqtt { source: MqttError::MalformedLength }));

        let mut h = Harness::new(MqttProtocol::new().with_max_packet_size(16));
        let err = h.feed(&[0x10, 0x20]).unwrap_err();
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn stop_flushes_then_shuts_down() {
        let mut h = Harness::new(MqttProtocol::new());
        h.feed(&connect()).unwrap();
        h.proto.stop(&mut h.ctx, &mut h.session);
        assert!(!h.ctx.shutdown_requested());
        assert_eq!(h.flush().len(), 4);
        assert!(h.ctx.shutdown_requested());
    }
}
