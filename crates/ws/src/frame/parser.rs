//! Incremental frame parser.
//!
//! [`FrameParser::parse`] consumes as much of the given input as it can and
//! reports how many bytes it used. A frame may be split across any number of
//! calls; the parser only stops early once a frame is complete, at which
//! point the caller reads the frame and calls [`FrameParser::reset`] before
//! feeding the remaining input.
//!
//! ```text
//! OP -> LEN -> [LEN_EXTENDED] -> [MASKING_KEY] -> PAYLOAD -> COMPLETE
//! ```

use crate::error::WsError;
use crate::flags::{FLAG_MASKED, FrameFlags, MASK_LEN};
use crate::frame::header::len_to_u64;
use crate::mask::Mask;
use crate::utf8::{self, Utf8Validator};
use crate::ensure;
use crate::{Opcode, WS_FRAME_MIN};
use bytes::BytesMut;
use tracing::trace;

/// Default upper bound for a single frame payload.
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

const MAX_CONTROL_PAYLOAD: u8 = 125;
const LEN_CODE_16: u8 = 126;
const LEN_CODE_64: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Op,
    Len,
    LenExtended,
    MaskingKey,
    Payload,
    Complete,
}

/// Per-connection frame parser.
///
/// Besides the frame being parsed it tracks the fragmented message that is
/// currently open, so the fragmentation rules and UTF-8 validation of TEXT
/// messages carry across frame boundaries.
#[derive(Debug)]
pub struct FrameParser {
    state: ParseState,
    flags: FrameFlags,
    opcode: Opcode,
    masked: bool,
    len: u64,
    len_needed: usize,
    len_idx: usize,
    key: [u8; 4],
    key_idx: usize,
    mask: Mask,
    parsed: u64,
    payload: BytesMut,

    /// data opcode (TEXT or BINARY) of the open message
    message: Option<Opcode>,
    utf8: Utf8Validator,

    max_frame_size: u64,
    require_mask: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// A server side parser: client frames must be masked.
    pub fn new() -> Self {
        Self {
            state: ParseState::Op,
            flags: FrameFlags::default(),
            opcode: Opcode::Continuation,
            masked: false,
            len: 0,
            len_needed: 0,
            len_idx: 0,
            key: [0; 4],
            key_idx: 0,
            mask: Mask::default(),
            parsed: 0,
            payload: BytesMut::with_capacity(WS_FRAME_MIN),
            message: None,
            utf8: Utf8Validator::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            require_mask: true,
        }
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u64) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Whether unmasked frames are a protocol error. Servers require masking,
    /// clients must accept unmasked frames.
    #[must_use]
    pub fn with_require_mask(mut self, require_mask: bool) -> Self {
        self.require_mask = require_mask;
        self
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// Flags of the current frame; meaningful once past the OP state.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The opcode of the message the current data frame belongs to.
    ///
    /// For a CONTINUATION frame this is the TEXT or BINARY opcode of the
    /// frame that opened the message.
    pub fn message_opcode(&self) -> Option<Opcode> {
        if self.opcode.is_data() { self.message } else { None }
    }

    pub fn payload_len(&self) -> u64 {
        self.len
    }

    /// Unmasked payload bytes received so far.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    /// Prepares for the next frame, keeping the scratch allocation.
    ///
    /// A completed data frame with FIN set also closes the open message.
    pub fn reset(&mut self) {
        if self.state == ParseState::Complete && self.opcode.is_data() && self.flags.fin() {
            self.message = None;
            self.utf8.reset();
        }
        self.state = ParseState::Op;
        self.len = 0;
        self.len_needed = 0;
        self.len_idx = 0;
        self.key_idx = 0;
        self.parsed = 0;
        self.payload.clear();
    }

    /// Parses as much of `src` as possible.
    ///
    /// Returns the number of bytes consumed. Consumption stops once a frame is
    /// complete; input left after that belongs to the next frame.
    ///
    /// # Errors
    ///
    /// Any [`WsError`] is a protocol violation and the session has to be
    /// closed with [`WsError::close_code`].
    pub fn parse(&mut self, src: &[u8]) -> Result<usize, WsError> {
        let mut pos = 0;
        loop {
            let rest = &src[pos..];
            match self.state {
                ParseState::Complete => return Ok(pos),
                // payload states can finish without input when the length is zero
                ParseState::Payload => pos += self.parse_payload(rest)?,
                _ if rest.is_empty() => return Ok(pos),
                ParseState::Op => {
                    self.parse_op(rest[0])?;
                    pos += 1;
                }
                ParseState::Len => {
                    self.parse_len(rest[0])?;
                    pos += 1;
                }
                ParseState::LenExtended => pos += self.parse_len_extended(rest)?,
                ParseState::MaskingKey => pos += self.parse_masking_key(rest),
            }

            if self.state == ParseState::Payload && self.parsed < self.len && pos == src.len() {
                return Ok(pos);
            }
        }
    }

    fn parse_op(&mut self, byte: u8) -> Result<(), WsError> {
        let flags = FrameFlags::from_bits(byte);
        ensure!(flags.reserved() == 0, WsError::reserved_bits(flags.reserved()));

        let opcode = flags.opcode().ok_or_else(|| WsError::invalid_opcode(flags.raw_opcode()))?;
        match opcode {
            op if op.is_control() => ensure!(flags.fin(), WsError::FragmentedControl),
            Opcode::Continuation => ensure!(self.message.is_some(), WsError::UnexpectedContinuation),
            _ => {
                ensure!(self.message.is_none(), WsError::ExpectedContinuation);
                self.message = Some(opcode);
            }
        }

        trace!(fin = flags.fin(), %opcode, "ws frame op");
        self.flags = flags;
        self.opcode = opcode;
        self.state = ParseState::Len;
        Ok(())
    }

    fn parse_len(&mut self, byte: u8) -> Result<(), WsError> {
        self.masked = byte & FLAG_MASKED != 0;
        ensure!(self.masked || !self.require_mask, WsError::Unmasked);

        let code = byte & MASK_LEN;
        if self.opcode.is_control() {
            ensure!(code <= MAX_CONTROL_PAYLOAD, WsError::ControlTooLong);
        }

        match code {
            LEN_CODE_16 => self.begin_extended(2),
            LEN_CODE_64 => self.begin_extended(8),
            literal => {
                self.len = u64::from(literal);
                self.check_len()?;
                self.after_len();
            }
        }
        Ok(())
    }

    fn begin_extended(&mut self, bytes: usize) {
        self.len = 0;
        self.len_needed = bytes;
        self.len_idx = 0;
        self.state = ParseState::LenExtended;
    }

    fn parse_len_extended(&mut self, src: &[u8]) -> Result<usize, WsError> {
        let take = (self.len_needed - self.len_idx).min(src.len());
        for &b in &src[..take] {
            self.len = (self.len << 8) | u64::from(b);
        }
        self.len_idx += take;

        if self.len_idx == self.len_needed {
            ensure!(self.len >> 63 == 0, WsError::InvalidLength);
            self.check_len()?;
            self.after_len();
        }
        Ok(take)
    }

    fn check_len(&self) -> Result<(), WsError> {
        ensure!(self.len <= self.max_frame_size, WsError::frame_too_large(self.len, self.max_frame_size));
        Ok(())
    }

    fn after_len(&mut self) {
        trace!(len = self.len, masked = self.masked, "ws frame length");
        if self.masked {
            self.key_idx = 0;
            self.state = ParseState::MaskingKey;
        } else {
            self.mask = Mask::new([0; 4]);
            self.state = ParseState::Payload;
        }
    }

    fn parse_masking_key(&mut self, src: &[u8]) -> usize {
        let take = (4 - self.key_idx).min(src.len());
        self.key[self.key_idx..self.key_idx + take].copy_from_slice(&src[..take]);
        self.key_idx += take;

        if self.key_idx == 4 {
            self.mask = Mask::new(self.key);
            self.state = ParseState::Payload;
        }
        take
    }

    fn parse_payload(&mut self, src: &[u8]) -> Result<usize, WsError> {
        let remaining = self.len - self.parsed;
        let take = usize::try_from(remaining).map_or(src.len(), |r| r.min(src.len()));

        if take > 0 {
            let start = self.payload.len();
            self.payload.extend_from_slice(&src[..take]);
            let chunk = &mut self.payload[start..];
            if self.masked {
                self.mask.apply(chunk);
            }
            if self.message == Some(Opcode::Text) && self.opcode.is_data() {
                self.utf8.feed(chunk)?;
            }
            self.parsed += len_to_u64(take);
        }

        if self.parsed == self.len {
            self.complete()?;
        }
        Ok(take)
    }

    fn complete(&mut self) -> Result<(), WsError> {
        if self.opcode.is_data() && self.message == Some(Opcode::Text) {
            self.utf8.finish(self.flags.fin())?;
        }
        if self.opcode == Opcode::Close && self.payload.len() > 2 {
            utf8::validate(&self.payload[2..])?;
        }
        trace!(opcode = %self.opcode, len = self.len, "ws frame complete");
        self.state = ParseState::Complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::FrameHeader;

    fn client_frame(fin: bool, opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let header = FrameHeader::new(FrameFlags::new(fin, opcode), payload.len() as u64, Some(key));
        let mut out = header.as_bytes().to_vec();
        let mut body = payload.to_vec();
        crate::apply_mask(&mut body, key);
        out.extend_from_slice(&body);
        out
    }

    fn parse_all(parser: &mut FrameParser, src: &[u8]) -> Result<Vec<(Opcode, bool, Vec<u8>)>, WsError> {
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < src.len() {
            pos += parser.parse(&src[pos..])?;
            if parser.is_complete() {
                frames.push((parser.opcode(), parser.flags().fin(), parser.payload().to_vec()));
                parser.reset();
            }
        }
        Ok(frames)
    }

    #[test]
    fn masked_text_with_zero_key() {
        let mut parser = FrameParser::new();
        let src = [0x81, 0x82, 0, 0, 0, 0, b'h', b'i'];
        assert_eq!(parser.parse(&src).unwrap(), src.len());
        assert!(parser.is_complete());
        assert_eq!(parser.opcode(), Opcode::Text);
        assert!(parser.flags().fin());
        assert_eq!(parser.payload(), b"hi");
    }

    #[test]
    fn byte_at_a_time() {
        let src = client_frame(true, Opcode::Binary, &[7u8; 300], [9, 8, 7, 6]);
        let mut parser = FrameParser::new();
        for (i, b) in src.iter().enumerate() {
            let used = parser.parse(std::slice::from_ref(b)).unwrap();
            assert_eq!(used, 1, "byte {i}");
        }
        assert!(parser.is_complete());
        assert_eq!(parser.payload_len(), 300);
        assert_eq!(parser.payload(), &[7u8; 300][..]);
    }

    #[test]
    fn stops_after_complete_frame() {
        let mut src = client_frame(true, Opcode::Ping, b"p", [1, 2, 3, 4]);
        let first = src.len();
        src.extend(client_frame(true, Opcode::Text, b"next", [5, 6, 7, 8]));

        let mut parser = FrameParser::new();
        assert_eq!(parser.parse(&src).unwrap(), first);
        assert_eq!(parser.opcode(), Opcode::Ping);
        assert_eq!(parser.parse(&src[first..]).unwrap(), 0);

        parser.reset();
        assert_eq!(parser.parse(&src[first..]).unwrap(), src.len() - first);
        assert_eq!(parser.payload(), b"next");
    }

    #[test]
    fn zero_length_frame_completes() {
        let src = client_frame(true, Opcode::Text, b"", [1, 2, 3, 4]);
        let mut parser = FrameParser::new();
        assert_eq!(parser.parse(&src).unwrap(), 6);
        assert!(parser.is_complete());
        assert!(parser.payload().is_empty());
    }

    #[test]
    fn extended_16_bit_length() {
        let payload = vec![0xAB; 130];
        let src = client_frame(true, Opcode::Binary, &payload, [1, 1, 1, 1]);
        assert_eq!(&src[..4], &[0x82, 0xfe, 0x00, 0x82]);

        let frames = parse_all(&mut FrameParser::new(), &src).unwrap();
        assert_eq!(frames, vec![(Opcode::Binary, true, payload)]);
    }

    #[test]
    fn extended_64_bit_length() {
        let payload = vec![1u8; 70_000];
        let src = client_frame(true, Opcode::Binary, &payload, [3, 1, 4, 1]);
        assert_eq!(src[1], 0xff);
        let frames = parse_all(&mut FrameParser::new(), &src).unwrap();
        assert_eq!(frames[0].2.len(), 70_000);
    }

    #[test]
    fn fragmented_text_message() {
        let text = "héllo wörld".as_bytes();
        // split inside the two byte 'é'
        let mut src = client_frame(false, Opcode::Text, &text[..2], [1, 2, 3, 4]);
        src.extend(client_frame(true, Opcode::Ping, b"", [1, 2, 3, 4]));
        src.extend(client_frame(true, Opcode::Continuation, &text[2..], [4, 3, 2, 1]));

        let mut parser = FrameParser::new();
        let mut pos = parser.parse(&src).unwrap();
        assert_eq!(parser.message_opcode(), Some(Opcode::Text));
        parser.reset();

        pos += parser.parse(&src[pos..]).unwrap();
        assert_eq!(parser.opcode(), Opcode::Ping);
        assert_eq!(parser.message_opcode(), None);
        parser.reset();

        parser.parse(&src[pos..]).unwrap();
        assert_eq!(parser.opcode(), Opcode::Continuation);
        assert_eq!(parser.message_opcode(), Some(Opcode::Text));
        assert_eq!(parser.payload(), &text[2..]);
        parser.reset();
        assert_eq!(parser.message_opcode(), None);
    }

    #[test]
    fn fragmentation_rules() {
        let continuation = client_frame(true, Opcode::Continuation, b"x", [0; 4]);
        assert!(matches!(parse_all(&mut FrameParser::new(), &continuation), Err(WsError::UnexpectedContinuation)));

        let mut src = client_frame(false, Opcode::Binary, b"a", [0; 4]);
        src.extend(client_frame(true, Opcode::Text, b"b", [0; 4]));
        assert!(matches!(parse_all(&mut FrameParser::new(), &src), Err(WsError::ExpectedContinuation)));

        let ping = client_frame(false, Opcode::Ping, b"", [0; 4]);
        assert!(matches!(parse_all(&mut FrameParser::new(), &ping), Err(WsError::FragmentedControl)));
    }

    #[test]
    fn header_violations() {
        let mut parser = FrameParser::new();
        assert!(matches!(parser.parse(&[0xC1]), Err(WsError::ReservedBits { bits: 0x40 })));

        let mut parser = FrameParser::new();
        assert!(matches!(parser.parse(&[0x83]), Err(WsError::InvalidOpcode { opcode: 3 })));

        let mut parser = FrameParser::new();
        assert!(matches!(parser.parse(&[0x81, 0x02, b'h', b'i']), Err(WsError::Unmasked)));

        let mut parser = FrameParser::new();
        assert!(matches!(parser.parse(&[0x89, 0xfe, 0x00, 0x80]), Err(WsError::ControlTooLong)));

        let mut parser = FrameParser::new();
        let huge = [0x82, 0xff, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parser.parse(&huge), Err(WsError::InvalidLength)));
    }

    #[test]
    fn frame_size_limit() {
        let mut parser = FrameParser::new().with_max_frame_size(100);
        let src = client_frame(true, Opcode::Binary, &[0; 101], [0; 4]);
        assert!(matches!(parser.parse(&src), Err(WsError::FrameTooLarge { size: 101, max_size: 100 })));
    }

    #[test]
    fn invalid_utf8_text() {
        let src = client_frame(true, Opcode::Text, b"\xed\xa0\x80", [5, 5, 5, 5]);
        assert!(matches!(FrameParser::new().parse(&src), Err(WsError::InvalidUtf8)));

        let truncated = client_frame(true, Opcode::Text, b"ok\xe2\x82", [5, 5, 5, 5]);
        assert!(matches!(FrameParser::new().parse(&truncated), Err(WsError::InvalidUtf8)));

        let open = client_frame(false, Opcode::Text, b"ok\xe2\x82", [5, 5, 5, 5]);
        assert!(FrameParser::new().parse(&open).is_ok());
    }

    #[test]
    fn binary_is_not_validated() {
        let src = client_frame(true, Opcode::Binary, b"\xff\xfe", [5, 5, 5, 5]);
        assert_eq!(parse_all(&mut FrameParser::new(), &src).unwrap()[0].2, b"\xff\xfe");
    }

    #[test]
    fn close_reason_must_be_utf8() {
        let src = client_frame(true, Opcode::Close, b"\x03\xe8\xff", [0; 4]);
        assert!(matches!(FrameParser::new().parse(&src), Err(WsError::InvalidUtf8)));

        let src = client_frame(true, Opcode::Close, b"\x03\xe8bye", [0; 4]);
        assert!(FrameParser::new().parse(&src).is_ok());
    }

    #[test]
    fn unmasked_allowed_for_client_role() {
        let mut parser = FrameParser::new().with_require_mask(false);
        parser.parse(&[0x81, 0x02, b'h', b'i']).unwrap();
        assert_eq!(parser.payload(), b"hi");
    }

    #[test]
    fn scratch_is_reused() {
        let mut parser = FrameParser::new();
        let src = client_frame(true, Opcode::Binary, &[1; 1000], [0; 4]);
        parser.parse(&src).unwrap();
        let cap = parser.payload_mut().capacity();
        parser.reset();
        assert!(parser.payload().is_empty());
        assert_eq!(parser.payload_mut().capacity(), cap);
        assert!(cap >= WS_FRAME_MIN);
    }
}
