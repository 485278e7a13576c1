use crate::close;
use std::io;
use thiserror::Error;

/// Everything that can go wrong while decoding frames from a peer.
///
/// Each variant is fatal to the session. [`WsError::close_code`] gives the
/// status code to put in the best-effort CLOSE frame sent before teardown.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("reserved bits set without a negotiated extension: {bits:#04x}")]
    ReservedBits { bits: u8 },

    #[error("unsupported opcode: {opcode:#x}")]
    InvalidOpcode { opcode: u8 },

    #[error("control frame without FIN")]
    FragmentedControl,

    #[error("continuation frame without an open fragmented message")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is still open")]
    ExpectedContinuation,

    #[error("client frame is not masked")]
    Unmasked,

    #[error("control frame payload exceeds 125 bytes")]
    ControlTooLong,

    #[error("invalid extended payload length")]
    InvalidLength,

    #[error("frame size {size} exceed the limit {max_size}")]
    FrameTooLarge { size: u64, max_size: u64 },

    #[error("message size {size} exceed the limit {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("invalid utf-8 in text payload")]
    InvalidUtf8,

    #[error("close payload of a single byte")]
    InvalidClosePayload,

    #[error("invalid close code: {code}")]
    InvalidCloseCode { code: u16 },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl WsError {
    pub fn reserved_bits(bits: u8) -> Self {
        Self::ReservedBits { bits }
    }

    pub fn invalid_opcode(opcode: u8) -> Self {
        Self::InvalidOpcode { opcode }
    }

    pub fn frame_too_large(size: u64, max_size: u64) -> Self {
        Self::FrameTooLarge { size, max_size }
    }

    pub fn message_too_large(size: usize, max_size: usize) -> Self {
        Self::MessageTooLarge { size, max_size }
    }

    pub fn invalid_close_code(code: u16) -> Self {
        Self::InvalidCloseCode { code }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status code announced to the peer when this error ends a session.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidOpcode { .. } => close::UNSUPPORTED_DATA,
            Self::InvalidUtf8 => close::INVALID_PAYLOAD,
            Self::FrameTooLarge { .. } | Self::MessageTooLarge { .. } => close::MESSAGE_TOO_BIG,
            Self::Io { .. } => close::INTERNAL_ERROR,
            _ => close::PROTOCOL_ERROR,
        }
    }

    /// True for size limits being hit rather than malformed input.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. } | Self::MessageTooLarge { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_mapping() {
        assert_eq!(WsError::FragmentedControl.close_code(), 1002);
        assert_eq!(WsError::Unmasked.close_code(), 1002);
        assert_eq!(WsError::invalid_opcode(0x3).close_code(), 1003);
        assert_eq!(WsError::InvalidUtf8.close_code(), 1007);
        assert_eq!(WsError::frame_too_large(1 << 30, 1 << 24).close_code(), 1009);
        assert_eq!(WsError::message_too_large(5000, 4096).close_code(), 1009);
        assert_eq!(WsError::invalid_close_code(1005).close_code(), 1002);
    }

    #[test]
    fn exhaustion_is_distinguishable() {
        assert!(WsError::message_too_large(5000, 4096).is_resource_exhaustion());
        assert!(!WsError::InvalidLength.is_resource_exhaustion());
    }
}
