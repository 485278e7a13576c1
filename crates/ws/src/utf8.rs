//! Incremental UTF-8 validation.
//!
//! TEXT payloads arrive in pieces: a frame may span many reads and a message
//! may span many frames, so a multi-byte sequence can be cut anywhere. The
//! validator keeps the number of continuation bytes still owed and the legal
//! range of the *next* byte, which is enough to reject overlong encodings,
//! surrogates and code points above U+10FFFF without ever buffering input.

use crate::error::WsError;

const CONT_LOW: u8 = 0x80;
const CONT_HIGH: u8 = 0xBF;

/// Validation state carried between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Validator {
    /// continuation bytes still expected for the current sequence
    need: u8,
    lower: u8,
    upper: u8,
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Utf8Validator {
    pub const fn new() -> Self {
        Self { need: 0, lower: CONT_LOW, upper: CONT_HIGH }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True when the bytes seen so far end on a code point boundary.
    pub fn is_complete(&self) -> bool {
        self.need == 0
    }

    /// Feeds the next chunk of the message.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidUtf8`] as soon as a byte is seen that can't
    /// continue a valid encoding.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), WsError> {
        let mut i = 0;
        while i < bytes.len() {
            if self.need == 0 {
                // fast path over runs of ASCII
                let rest = &bytes[i..];
                let ascii = rest.iter().position(|b| !b.is_ascii()).unwrap_or(rest.len());
                i += ascii;
                if i == bytes.len() {
                    break;
                }
                self.lead(bytes[i])?;
            } else {
                self.continuation(bytes[i])?;
            }
            i += 1;
        }
        Ok(())
    }

    /// Checks the state at the end of a frame.
    ///
    /// A sequence cut at the end of a non-final frame is fine: the rest is
    /// expected in the next frame of the message. At the end of the message
    /// it is an error.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidUtf8`] when `end_of_message` is set and a
    /// multi-byte sequence is incomplete.
    pub fn finish(&self, end_of_message: bool) -> Result<(), WsError> {
        if end_of_message && self.need != 0 {
            return Err(WsError::InvalidUtf8);
        }
        Ok(())
    }

    #[inline]
    fn lead(&mut self, b: u8) -> Result<(), WsError> {
        let (need, lower, upper) = match b {
            0xC2..=0xDF => (1, CONT_LOW, CONT_HIGH),
            // overlong three byte forms
            0xE0 => (2, 0xA0, CONT_HIGH),
            // surrogates U+D800..U+DFFF
            0xED => (2, CONT_LOW, 0x9F),
            0xE1..=0xEC | 0xEE..=0xEF => (2, CONT_LOW, CONT_HIGH),
            // overlong four byte forms
            0xF0 => (3, 0x90, CONT_HIGH),
            0xF1..=0xF3 => (3, CONT_LOW, CONT_HIGH),
            // above U+10FFFF
            0xF4 => (3, CONT_LOW, 0x8F),
            // orphan continuation, overlong C0/C1, F5..FF
            _ => return Err(WsError::InvalidUtf8),
        };
        self.need = need;
        self.lower = lower;
        self.upper = upper;
        Ok(())
    }

    #[inline]
    fn continuation(&mut self, b: u8) -> Result<(), WsError> {
        if b < self.lower || b > self.upper {
            return Err(WsError::InvalidUtf8);
        }
        self.need -= 1;
        self.lower = CONT_LOW;
        self.upper = CONT_HIGH;
        Ok(())
    }
}

/// Validates a complete message in one call.
///
/// # Errors
///
/// Returns [`WsError::InvalidUtf8`] if `bytes` is not well formed UTF-8.
pub fn validate(bytes: &[u8]) -> Result<(), WsError> {
    let mut v = Utf8Validator::new();
    v.feed(bytes)?;
    v.finish(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(bytes: &[u8], done: bool) -> bool {
        let mut v = Utf8Validator::new();
        v.feed(bytes).is_ok() && v.finish(done).is_ok()
    }

    #[test]
    fn accepts_valid_text() {
        assert!(check(b"Hello-\xc2\xb5@\xc3\x9f\xc3\xb6\xc3\xa4\xc3\xbc\xc3\xa0\xc3\xa1-UTF-8!!", true));
        assert!(check("κόσμε 𝄞 €".as_bytes(), true));
        assert!(check(b"", true));
        assert!(check(b"\xf4\x8f\xbf\xbf", true));
        assert!(check(b"\xed\x9f\xbf", true));
    }

    #[test]
    fn truncated_sequence_depends_on_fin() {
        assert!(check(b"\xf4\x8f", false));
        assert!(!check(b"\xf4\x8f", true));
        assert!(check(b"abc\xe2\x82", false));
        assert!(!check(b"abc\xe2\x82", true));
    }

    #[test]
    fn rejects_invalid_sequences() {
        let cases: &[&[u8]] = &[
            b"\xff",
            b"\xc0",
            b"\xc1",
            b"\x80",
            b"a\xbf",
            b"\xdf\xc0",
            b"\xe0\xc0\xc0",
            b"\xf0\xc0\xc0\xc0",
            // surrogate U+D840
            b"\xed\xa1",
            // overlong 3 and 4 byte
            b"\xe0\x9f\x80",
            b"\xf0\x8f\x80\x80",
            b"\xf4\x8f\xbf\xc0",
            // above U+10FFFF
            b"\xf4\x90\x80\x80",
            b"\xf5\x80\x80\x80",
        ];
        for case in cases {
            assert!(!check(case, false), "{case:x?} should be rejected");
        }
    }

    #[test]
    fn state_survives_split_points() {
        let text = "ab€𝄞ü".as_bytes();
        for split in 0..=text.len() {
            let mut v = Utf8Validator::new();
            v.feed(&text[..split]).unwrap();
            v.finish(false).unwrap();
            v.feed(&text[split..]).unwrap();
            v.finish(true).unwrap();
        }
    }

    #[test]
    fn reset_clears_partial_sequence() {
        let mut v = Utf8Validator::new();
        v.feed(b"\xe2").unwrap();
        assert!(!v.is_complete());
        v.reset();
        assert!(v.is_complete());
        v.feed(b"plain").unwrap();
    }
}
