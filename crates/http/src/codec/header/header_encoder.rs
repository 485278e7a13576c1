//! Response head serialization.
//!
//! Writes the status line and header fields, and sets the framing header
//! (`Content-Length` or `Transfer-Encoding: chunked`) from the
//! [`PayloadSize`] the caller decided on. Statuses that never carry a body
//! get no framing header at all.

use crate::protocol::{PayloadSize, ResponseHead, SendError, status_allows_body};

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, Version, header};
use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size reserved for a response head
const INIT_HEADER_SIZE: usize = 512;

const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");

/// Encoder for HTTP response heads.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;
        let status = head.status();

        dst.reserve(INIT_HEADER_SIZE);
        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::UnsupportedVersion(v));
            }
        };
        write!(FastWrite(dst), "{version} {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or_default())?;

        let headers = head.headers_mut();
        if status_allows_body(status) {
            match payload_size {
                PayloadSize::Length(n) => {
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, n.into());
                }
                PayloadSize::Chunked => {
                    headers.remove(header::CONTENT_LENGTH);
                    headers.insert(header::TRANSFER_ENCODING, CHUNKED);
                }
                PayloadSize::Empty => {
                    headers.remove(header::TRANSFER_ENCODING);
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                }
            }
        } else {
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
        }

        for (header_name, header_value) in headers.iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// `io::Write` straight into a `BytesMut` that already has room reserved.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};
    use indoc::indoc;

    fn encode(head: ResponseHead, size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn fixed_length() {
        let head = Response::builder().status(StatusCode::OK).header("Content-Type", "text/plain").body(()).unwrap();
        let expected = indoc! {"
            HTTP/1.1 200 OK\r
            content-type: text/plain\r
            content-length: 12\r
            \r
        "};
        assert_eq!(encode(head, PayloadSize::Length(12)), expected);
    }

    #[test]
    fn chunked_replaces_length() {
        let head = Response::builder().header("Content-Length", "99").body(()).unwrap();
        let text = encode(head, PayloadSize::Chunked);
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn bodyless_status_has_no_framing() {
        let head = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .body(())
            .unwrap();
        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.1 101 Switching Protocols\r\nupgrade: websocket\r\nconnection: upgrade\r\n\r\n");

        let head = Response::builder().status(StatusCode::NO_CONTENT).body(()).unwrap();
        assert_eq!(encode(head, PayloadSize::Length(10)), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn http_10_and_empty_body() {
        let head = Response::builder().version(Version::HTTP_10).status(StatusCode::NOT_FOUND).body(()).unwrap();
        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.0 404 Not Found\r\ncontent-length: 0\r\n\r\n");
    }

    #[test]
    fn unsupported_version() {
        let head = Response::builder().version(Version::HTTP_2).body(()).unwrap();
        let mut dst = BytesMut::new();
        assert!(matches!(HeaderEncoder.encode((head, PayloadSize::Empty), &mut dst), Err(SendError::UnsupportedVersion(_))));
    }
}
