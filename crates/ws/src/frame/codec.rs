//! [`tokio_util::codec`] adapter over the frame parser and header encoder.
//!
//! The server's protocol engine drives [`FrameParser`] directly against its
//! shared receive buffer. This codec is for stream based peers, such as a
//! client wrapped in `Framed`, and for tests.

use crate::error::WsError;
use crate::flags::FrameFlags;
use crate::frame::header::{FrameHeader, len_to_u64};
use crate::frame::parser::FrameParser;
use crate::{Opcode, apply_mask, close};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// One decoded or to-be-encoded frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self { flags: FrameFlags::new(fin, opcode), payload: payload.into() }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    pub fn close(code: u16, reason: &[u8]) -> Self {
        Self::new(true, Opcode::Close, close::close_payload(code, reason))
    }

    pub fn fin(&self) -> bool {
        self.flags.fin()
    }

    /// The frame's opcode; frames built through the constructors or the
    /// decoder always carry a known one.
    pub fn opcode(&self) -> Option<Opcode> {
        self.flags.opcode()
    }

    /// Status code of a CLOSE frame, `None` when it carries none.
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode(), &self.payload[..]) {
            (Some(Opcode::Close), [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Which side of the connection the codec speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects masked frames, sends unmasked ones.
    Server,
    /// Expects unmasked frames, masks outgoing ones with the given key.
    Client { key: [u8; 4] },
}

#[derive(Debug)]
pub struct WsCodec {
    role: Role,
    parser: FrameParser,
}

impl WsCodec {
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn client(key: [u8; 4]) -> Self {
        Self::new(Role::Client { key })
    }

    pub fn new(role: Role) -> Self {
        let parser = FrameParser::new().with_require_mask(role == Role::Server);
        Self { role, parser }
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u64) -> Self {
        self.parser = self.parser.with_max_frame_size(max_frame_size);
        self
    }
}

impl Decoder for WsCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let consumed = self.parser.parse(src)?;
        src.advance(consumed);

        if !self.parser.is_complete() {
            return Ok(None);
        }

        let frame = Frame { flags: self.parser.flags(), payload: Bytes::copy_from_slice(self.parser.payload()) };
        self.parser.reset();
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for WsCodec {
    type Error = WsError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let key = match self.role {
            Role::Server => None,
            Role::Client { key } => Some(key),
        };

        let header = FrameHeader::new(item.flags, len_to_u64(item.payload.len()), key);
        dst.reserve(header.len() + item.payload.len());
        dst.put_slice(header.as_bytes());

        let start = dst.len();
        dst.put_slice(&item.payload);
        if let Some(key) = key {
            apply_mask(&mut dst[start..], key);
        }
        Ok(())
    }
}
