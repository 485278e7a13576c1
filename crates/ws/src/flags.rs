//! Bit-level view of the first byte of a WebSocket frame.
//!
//! The first byte packs `FIN(1) RSV1(1) RSV2(1) RSV3(1) OPCODE(4)`; the
//! second byte packs `MASK(1) PAYLOAD_LEN(7)`. Both are handled with explicit
//! masks rather than a struct layout.

use crate::Opcode;
use std::fmt;

pub const FLAG_FIN: u8 = 0x80;
pub const FLAG_RSV1: u8 = 0x40;
pub const FLAG_RSV2: u8 = 0x20;
pub const FLAG_RSV3: u8 = 0x10;
pub const MASK_RESERVED: u8 = FLAG_RSV1 | FLAG_RSV2 | FLAG_RSV3;
pub const MASK_OPCODE: u8 = 0x0F;

/// Second header byte: set when the payload is masked.
pub const FLAG_MASKED: u8 = 0x80;
/// Second header byte: the 7-bit payload length code.
pub const MASK_LEN: u8 = 0x7F;

/// The packed first byte of a frame.
///
/// `FrameFlags` is what receive callbacks are handed alongside the payload,
/// so applications can inspect FIN and the opcode of the frame that produced
/// the data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Builds the first byte for an outbound frame.
    #[inline]
    pub const fn new(fin: bool, opcode: Opcode) -> Self {
        let fin_bit = if fin { FLAG_FIN } else { 0 };
        Self(fin_bit | opcode as u8)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn fin(self) -> bool {
        self.0 & FLAG_FIN != 0
    }

    /// The three reserved bits, still in their wire positions.
    #[inline]
    pub const fn reserved(self) -> u8 {
        self.0 & MASK_RESERVED
    }

    #[inline]
    pub const fn raw_opcode(self) -> u8 {
        self.0 & MASK_OPCODE
    }

    /// Decodes the opcode nibble, `None` if it is a reserved value.
    #[inline]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8(self.raw_opcode())
    }

    /// Returns a copy with the opcode nibble replaced.
    #[inline]
    #[must_use]
    pub const fn with_opcode(self, opcode: Opcode) -> Self {
        Self((self.0 & !MASK_OPCODE) | opcode as u8)
    }

    #[inline]
    #[must_use]
    pub const fn with_fin(self, fin: bool) -> Self {
        if fin { Self(self.0 | FLAG_FIN) } else { Self(self.0 & !FLAG_FIN) }
    }
}

impl From<u8> for FrameFlags {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameFlags")
            .field("fin", &self.fin())
            .field("reserved", &(self.reserved() >> 4))
            .field("opcode", &self.raw_opcode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_text_fin() {
        let flags = FrameFlags::from_bits(0x81);
        assert!(flags.fin());
        assert_eq!(flags.reserved(), 0);
        assert_eq!(flags.opcode(), Some(Opcode::Text));
    }

    #[test]
    fn unpack_reserved_bits() {
        let flags = FrameFlags::from_bits(0x72);
        assert!(!flags.fin());
        assert_eq!(flags.reserved(), 0x70);
        assert_eq!(flags.opcode(), Some(Opcode::Binary));
    }

    #[test]
    fn ping_becomes_pong_keeping_fin() {
        let ping = FrameFlags::new(true, Opcode::Ping);
        let pong = ping.with_opcode(Opcode::Pong);
        assert_eq!(pong.bits(), 0x8A);
    }

    #[test]
    fn toggle_fin() {
        let flags = FrameFlags::new(false, Opcode::Text);
        assert_eq!(flags.bits(), 0x01);
        assert_eq!(flags.with_fin(true).bits(), 0x81);
        assert_eq!(flags.with_fin(true).with_fin(false).bits(), 0x01);
    }
}
