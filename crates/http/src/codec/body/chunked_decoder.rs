//! Decoder for `Transfer-Encoding: chunked` bodies,
//! [RFC 9112 Section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1).
//!
//! ```text
//! chunk      = chunk-size [ chunk-ext ] CRLF chunk-data CRLF
//! last-chunk = 1*("0") [ chunk-ext ] CRLF
//! trailer    = *( field-line CRLF ) CRLF
//! ```
//!
//! Extensions and trailer fields are skipped.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    SizeWs,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    /// start of a trailer line, or the final CRLF
    TrailerStart,
    Trailer,
    TrailerLf,
    EndLf,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    size: u64,
    size_digits: u8,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, size: 0, size_digits: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::End
    }

    fn step(&mut self, b: u8) -> Result<State, ParseError> {
        use State::*;
        let next = match (self.state, b) {
            (Size, _) if b.is_ascii_hexdigit() => {
                let digit = u64::from(char::from(b).to_digit(16).unwrap_or_default());
                self.size = self
                    .size
                    .checked_mul(16)
                    .and_then(|s| s.checked_add(digit))
                    .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))?;
                self.size_digits = self.size_digits.saturating_add(1);
                Size
            }
            (Size, _) if self.size_digits == 0 => return Err(ParseError::invalid_body("missing chunk size")),
            (Size | SizeWs, b' ' | b'\t') => SizeWs,
            (Size | SizeWs, b';') => Extension,
            (Size | SizeWs | Extension, b'\r') => SizeLf,
            (Extension, b'\n') => return Err(ParseError::invalid_body("bare LF in chunk extension")),
            (Extension, _) => Extension,
            (SizeLf, b'\n') => {
                if self.size == 0 {
                    TrailerStart
                } else {
                    Data
                }
            }
            (DataCr, b'\r') => DataLf,
            (DataLf, b'\n') => {
                self.size_digits = 0;
                Size
            }
            (TrailerStart, b'\r') => EndLf,
            (TrailerStart | Trailer, b'\n') => return Err(ParseError::invalid_body("bare LF in trailer")),
            (Trailer, b'\r') => TrailerLf,
            (TrailerStart | Trailer, _) => Trailer,
            (TrailerLf, b'\n') => TrailerStart,
            (EndLf, b'\n') => End,
            (state, b) => return Err(ParseError::invalid_body(format!("unexpected byte {b:#04x} in chunked state {state:?}"))),
        };
        Ok(next)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Returns the next data piece, `Eof` after the last chunk and its
    /// trailer, or `None` when more input is needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                _ if src.is_empty() => return Ok(None),
                State::Data => {
                    let len = usize::try_from(self.size).map_or(src.len(), |size| size.min(src.len()));
                    let bytes = src.split_to(len).freeze();
                    self.size -= len as u64;
                    if self.size == 0 {
                        self.state = State::DataCr;
                    }
                    trace!(len, "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                _ => {
                    let b = src.get_u8();
                    self.state = self.step(b)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode_all(decoder: &mut ChunkedDecoder, buf: &mut BytesMut) -> Result<(Vec<u8>, bool), ParseError> {
        let mut body = Vec::new();
        while let Some(item) = decoder.decode(buf)? {
            match item {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => return Ok((body, true)),
            }
        }
        Ok((body, false))
    }

    #[test]
    fn simple_body() {
        let mut buf = BytesMut::from("4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\nNEXT");
        let (body, eof) = decode_all(&mut ChunkedDecoder::new(), &mut buf).unwrap();
        assert!(eof);
        assert_eq!(body, b"Wikipedia in\r\n\r\nchunks.");
        assert_eq!(&buf[..], b"NEXT");
    }

    #[test]
    fn extensions_and_trailers() {
        let mut buf = BytesMut::from("3;name=value\r\nabc\r\n0 ; last\r\nExpires: never\r\nX-A: b\r\n\r\n");
        let (body, eof) = decode_all(&mut ChunkedDecoder::new(), &mut buf).unwrap();
        assert!(eof);
        assert_eq!(body, b"abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn split_input() {
        let wire = b"a\r\n0123456789\r\n1F\r\nabcdefghijklmnopqrstuvwxyz01234\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::new();
        let mut body = Vec::new();
        let mut eof = false;
        for b in wire {
            buf.extend_from_slice(&[*b]);
            while let Some(item) = decoder.decode(&mut buf).unwrap() {
                match item {
                    PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                    PayloadItem::Eof => {
                        eof = true;
                        break;
                    }
                }
            }
        }
        assert!(eof);
        assert_eq!(Bytes::from(body), Bytes::from_static(b"0123456789abcdefghijklmnopqrstuvwxyz01234"));
    }

    #[test]
    fn invalid_input() {
        for wire in ["x\r\n", "\r\n", "3\r\nabcX", "3;ext\n", "ffffffffffffffffff\r\n", "0\r\nbad\n"] {
            let mut buf = BytesMut::from(wire);
            assert!(decode_all(&mut ChunkedDecoder::new(), &mut buf).is_err(), "{wire:?}");
        }
    }
}
