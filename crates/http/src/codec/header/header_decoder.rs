//! Request head decoding.
//!
//! Parses the request line and header fields with `httparse`, then builds an
//! `http::Request<()>` whose header values share the received bytes instead of
//! copying them. The body framing ([`PayloadSize`]) is derived from
//! `Content-Length` / `Transfer-Encoding` as RFC 9112 section 6.3 describes.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Shortest possible request, `GET / HTTP/1.1\r\n\r\n` without the path.
const MIN_REQUEST_BYTES: usize = 14;

/// Decoder for HTTP request heads.
///
/// On success the head is split off `src`; whatever follows (body bytes, a
/// pipelined request, or the first bytes of an upgraded protocol) stays in the
/// buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_REQUEST_BYTES {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let body_offset = match req.parse(src) {
            Ok(Status::Complete(body_offset)) => body_offset,
            Ok(Status::Partial) => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
            Err(Error::TooManyHeaders) => return Err(ParseError::too_many_headers(MAX_HEADER_NUM)),
            Err(Error::Version) => return Err(ParseError::InvalidVersion(None)),
            Err(e) => return Err(ParseError::invalid_header(e)),
        };
        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let uri = Uri::try_from(req.path.ok_or(ParseError::InvalidUri)?).map_err(|_| ParseError::InvalidUri)?;

        let header_count = req.headers.len();
        let mut ranges = [HeaderRange::EMPTY; MAX_HEADER_NUM];
        HeaderRange::record(src, req.headers, &mut ranges);

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;

        let head_bytes = src.split_to(body_offset).freeze();
        let map = request.headers_mut();
        map.reserve(header_count);
        for range in &ranges[..header_count] {
            let name = HeaderName::from_bytes(&head_bytes[range.name.0..range.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(head_bytes.slice(range.value.0..range.value.1))
                .map_err(ParseError::invalid_header)?;
            map.append(name, value);
        }

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

/// Byte ranges of one header's name and value within the head.
#[derive(Clone, Copy)]
struct HeaderRange {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderRange {
    const EMPTY: Self = Self { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], ranges: &mut [HeaderRange]) {
        let base = bytes.as_ptr() as usize;
        for (header, range) in headers.iter().zip(ranges.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - base;
            range.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - base;
            range.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Determines the body framing from the request headers.
///
/// - `Transfer-Encoding` whose final coding is `chunked`: chunked body
/// - any other `Transfer-Encoding`: not supported
/// - `Content-Length`: fixed length body
/// - both present: rejected, a classic smuggling vector
/// - neither: no body
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::new_chunked())
            } else {
                Err(ParseError::unsupported_encoding(String::from_utf8_lossy(te_value.as_bytes())))
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            Ok(PayloadSize::new_length(length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// Whether `chunked` is the final transfer coding.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
