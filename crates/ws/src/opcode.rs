//! WebSocket frame opcodes as defined in
//! [RFC 6455 Section 5.2](https://www.rfc-editor.org/rfc/rfc6455#section-5.2).

use std::fmt;

/// The 4-bit opcode carried in the low nibble of a frame's first byte.
///
/// Data opcodes (`Continuation`, `Text`, `Binary`) may be fragmented across
/// several frames; control opcodes (`Close`, `Ping`, `Pong`) must always be
/// sent in a single frame with FIN set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Converts a raw nibble into an `Opcode`, returning `None` for the
    /// reserved values `0x3..=0x7` and `0xB..=0xF`.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for `Close`, `Ping` and `Pong`.
    ///
    /// Control opcodes all have the high bit of the nibble set.
    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) & 0x08 != 0
    }

    /// Returns true for `Continuation`, `Text` and `Binary`.
    #[inline]
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "CONTINUATION",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_opcodes_are_rejected() {
        for raw in (0x3..=0x7).chain(0xB..=0xF) {
            assert_eq!(Opcode::from_u8(raw), None, "0x{raw:x} should be reserved");
        }
    }

    #[test]
    fn control_and_data_split() {
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());

        assert!(Opcode::Continuation.is_data());
        assert!(Opcode::Text.is_data());
        assert!(Opcode::Binary.is_data());
    }

    #[test]
    fn raw_value_is_preserved() {
        for op in [Opcode::Continuation, Opcode::Text, Opcode::Binary, Opcode::Close, Opcode::Ping, Opcode::Pong] {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
    }
}
