//! Outbound frame headers.
//!
//! Server frames are never masked, so a header is 2, 4 or 10 bytes. The
//! masked form (up to 14 bytes) exists for client side encoders.

use crate::flags::{FLAG_MASKED, FrameFlags};
use bytes::{BufMut, Bytes};

const MAX_HEADER_LEN: usize = 14;

/// Buffer lengths always fit the 64-bit length field.
pub(crate) fn len_to_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// A frame header serialized into a fixed stack buffer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    buf: [u8; MAX_HEADER_LEN],
    len: u8,
}

impl FrameHeader {
    /// Encodes the header for a payload of `payload_len` bytes.
    ///
    /// The length code follows the same rule the parser enforces: up to 125
    /// literally, 126 plus a 16-bit extension up to `u16::MAX`, 127 plus a
    /// 64-bit extension beyond.
    pub fn new(flags: FrameFlags, payload_len: u64, mask: Option<[u8; 4]>) -> Self {
        let mut buf = [0u8; MAX_HEADER_LEN];
        let mut w = &mut buf[..];
        let mask_bit = if mask.is_some() { FLAG_MASKED } else { 0 };

        w.put_u8(flags.bits());
        if let Ok(len @ 0..=125) = u8::try_from(payload_len) {
            w.put_u8(mask_bit | len);
        } else if let Ok(len) = u16::try_from(payload_len) {
            w.put_u8(mask_bit | 126);
            w.put_u16(len);
        } else {
            w.put_u8(mask_bit | 127);
            w.put_u64(payload_len);
        }
        if let Some(key) = mask {
            w.put_slice(&key);
        }

        let remaining = w.len();
        #[expect(clippy::cast_possible_truncation, reason = "a header is at most 14 bytes")]
        let len = (MAX_HEADER_LEN - remaining) as u8;
        Self { buf, len }
    }

    /// Header of an unmasked server frame.
    pub fn server(flags: FrameFlags, payload_len: usize) -> Self {
        Self::new(flags, len_to_u64(payload_len), None)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FrameHeader").field(&self.as_bytes()).finish()
    }
}

/// Length of the unmasked header for a payload of `payload_len` bytes.
pub fn header_len(payload_len: usize) -> usize {
    match payload_len {
        0..=125 => 2,
        126..=0xFFFF => 4,
        _ => 10,
    }
}
