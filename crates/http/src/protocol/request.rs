//! HTTP request header handling.
//!
//! Wraps `http::Request<()>` and adds the connection level questions the
//! server keeps asking about a request: does the connection stay open, is
//! the client asking to switch protocols, does it wait for `100 Continue`.

use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version, header};

/// Represents an HTTP request header.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Determines if this request may carry a body based on its HTTP method.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether any `Connection` header lists `token`, ignoring case.
    pub fn connection_has(&self, token: &str) -> bool {
        self.headers().get_all(header::CONNECTION).iter().any(|value| has_token(value, token))
    }

    /// Whether the connection stays open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive unless the client sends
    /// `Connection: close`; HTTP/1.0 needs an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version() {
            Version::HTTP_11 => !self.connection_has("close"),
            Version::HTTP_10 => self.connection_has("keep-alive"),
            _ => false,
        }
    }

    /// The requested protocol when the client asks to upgrade.
    ///
    /// Both an `Upgrade` header and the `upgrade` connection option are
    /// required.
    pub fn upgrade(&self) -> Option<&HeaderValue> {
        let upgrade = self.headers().get(header::UPGRADE)?;
        self.connection_has("upgrade").then_some(upgrade)
    }

    /// Whether the client sent any `Expect` header.
    pub fn has_expect(&self) -> bool {
        self.headers().contains_key(header::EXPECT)
    }

    /// Whether the client waits for `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.headers().get(header::EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    /// Whether a chunked response body can be sent for this request.
    pub fn accepts_chunked(&self) -> bool {
        self.version() == Version::HTTP_11
    }
}

/// Case-insensitive token search in a header value list.
///
/// Tokens may be separated by spaces, commas, tabs or newlines.
pub fn has_token(value: &HeaderValue, token: &str) -> bool {
    value
        .as_bytes()
        .split(|b| matches!(b, b' ' | b',' | b'\t' | b'\n' | b'\r'))
        .any(|item| !item.is_empty() && item.eq_ignore_ascii_case(token.as_bytes()))
}

/// Converts request parts into a RequestHeader.
impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

/// Converts a bodyless request into a RequestHeader.
impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(version: Version, headers: &[(&str, &str)]) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn keep_alive_defaults() {
        assert!(request(Version::HTTP_11, &[]).keep_alive());
        assert!(!request(Version::HTTP_11, &[("Connection", "close")]).keep_alive());
        assert!(!request(Version::HTTP_10, &[]).keep_alive());
        assert!(request(Version::HTTP_10, &[("Connection", "Keep-Alive")]).keep_alive());
    }

    #[test]
    fn connection_tokens() {
        let req = request(Version::HTTP_11, &[("Connection", "keep-alive,\tUpgrade")]);
        assert!(req.connection_has("upgrade"));
        assert!(req.connection_has("keep-alive"));
        assert!(!req.connection_has("close"));
    }

    #[test]
    fn upgrade_needs_connection_option() {
        let req = request(Version::HTTP_11, &[("Upgrade", "websocket")]);
        assert_eq!(req.upgrade(), None);

        let req = request(Version::HTTP_11, &[("Upgrade", "websocket"), ("Connection", "keep-alive, Upgrade")]);
        assert_eq!(req.upgrade().unwrap(), "websocket");
    }

    #[test]
    fn expect_continue() {
        let req = request(Version::HTTP_11, &[("Expect", "100-Continue")]);
        assert!(req.has_expect());
        assert!(req.expects_continue());

        let req = request(Version::HTTP_11, &[("Expect", "something-else")]);
        assert!(req.has_expect());
        assert!(!req.expects_continue());
    }

    #[test]
    fn need_body_by_method() {
        let get = request(Version::HTTP_11, &[]);
        assert!(!get.need_body());

        let post: RequestHeader = Request::builder().method(Method::POST).uri("/").body(()).unwrap().into();
        assert!(post.need_body());
    }
}
