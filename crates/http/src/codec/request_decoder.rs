//! Streaming request decoder.
//!
//! Yields the head of a request first, then its body as a sequence of
//! payload items ending with [`PayloadItem::Eof`]. Once the body is done the
//! decoder is ready for the next pipelined request.
//!
//! ```no_run
//! use micro_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("GET / HTTP/1.1\r\nHost: a\r\n\r\n");
//! let head = decoder.decode(&mut buffer);
//! ```

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Default limit on a request body, fixed or chunked.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 1024 * 1024;

/// A decoder for HTTP requests that handles both head and payload.
///
/// - `payload_decoder == None`: parsing a head
/// - `payload_decoder == Some(_)`: parsing the body of the last head
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    max_body_size: u64,
    body_size: u64,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: u64) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// True while a request body is being decoded.
    pub fn in_body(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None, max_body_size: DEFAULT_MAX_BODY_SIZE, body_size: 0 }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    /// # Errors
    ///
    /// Besides malformed input, a body announced or grown beyond the
    /// configured maximum is rejected with [`ParseError::TooLargeBody`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    self.body_size += bytes.len() as u64;
                    ensure!(self.body_size <= self.max_body_size, ParseError::too_large_body(self.body_size, self.max_body_size));
                    Some(Message::Payload(PayloadItem::Chunk(bytes)))
                }
                Some(PayloadItem::Eof) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(PayloadItem::Eof))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                if let PayloadSize::Length(n) = payload_size {
                    ensure!(n <= self.max_body_size, ParseError::too_large_body(n, self.max_body_size));
                }
                self.body_size = 0;
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn head_then_body_then_next_request() {
        let str = indoc! {"
            POST /upload HTTP/1.1\r
            Content-Length: 5\r
            \r
            helloGET /next HTTP/1.1\r
            \r
        "};
        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();

        let Some(Message::Header((head, size))) = decoder.decode(&mut buf).unwrap() else { panic!("expect head") };
        assert_eq!(head.uri().path(), "/upload");
        assert_eq!(size, PayloadSize::Length(5));
        assert!(decoder.in_body());

        let item = decoder.decode(&mut buf).unwrap().unwrap().into_payload_item().unwrap();
        assert_eq!(item.into_bytes().unwrap(), "hello");
        assert!(decoder.decode(&mut buf).unwrap().unwrap().into_payload_item().unwrap().is_eof());
        assert!(!decoder.in_body());

        let Some(Message::Header((head, _))) = decoder.decode(&mut buf).unwrap() else { panic!("expect head") };
        assert_eq!(head.uri().path(), "/next");
        assert!(decoder.decode(&mut buf).unwrap().unwrap().into_payload_item().unwrap().is_eof());
        assert!(buf.is_empty());
    }

    #[test]
    fn announced_body_over_limit() {
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n");
        let mut decoder = RequestDecoder::new().with_max_body_size(10);
        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooLargeBody { size: 100, max_size: 10 })));
    }

    #[test]
    fn chunked_body_over_limit() {
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n8\r\n12345678\r\n8\r\n12345678\r\n0\r\n\r\n");
        let mut decoder = RequestDecoder::new().with_max_body_size(10);
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_header());
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_payload());
        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooLargeBody { size: 16, max_size: 10 })));
    }
}
