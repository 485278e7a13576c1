//! The `Upgrade` handler chain.
//!
//! Requests carrying an `Upgrade` header are offered to each registered
//! [`UpgradeHandler`] in turn. The first answer other than
//! [`UpgradeStatus::NoProto`] decides; when every handler declines the
//! request is answered with `501 Not Implemented`.

use crate::http::response::{Response, empty_response};
use crate::protocol::AnyProtocol;
use crate::ws::WsProtocol;
use http::header::{CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderValue, Method, StatusCode};
use micro_http::protocol::{RequestHeader, has_token};
use micro_ws::handshake::{WS_VERSION, accept_key};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A handler's answer to an upgrade request.
pub enum UpgradeStatus {
    /// Send `response` and switch the connection to `next` once it is out.
    Handled { response: Response, next: AnyProtocol },
    /// Serve the request as plain HTTP.
    Ignore,
    /// Not a protocol this handler speaks.
    NoProto,
    /// Refuse the upgrade with this status.
    Error(StatusCode),
}

impl fmt::Debug for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handled { response, next } => {
                f.debug_struct("Handled").field("status", &response.status()).field("next", &next.name()).finish()
            }
            Self::Ignore => f.write_str("Ignore"),
            Self::NoProto => f.write_str("NoProto"),
            Self::Error(status) => f.debug_tuple("Error").field(status).finish(),
        }
    }
}

pub trait UpgradeHandler {
    fn upgrade(&self, request: &RequestHeader) -> UpgradeStatus;
}

/// Answers `Upgrade: h2c` by serving the request as HTTP/1.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct H2cUpgrade;

impl UpgradeHandler for H2cUpgrade {
    fn upgrade(&self, request: &RequestHeader) -> UpgradeStatus {
        match request.headers().get(UPGRADE) {
            Some(value) if has_token(value, "h2c") => UpgradeStatus::Ignore,
            _ => UpgradeStatus::NoProto,
        }
    }
}

/// Switches to WebSocket after a valid opening handshake.
#[derive(Debug, Clone)]
pub struct WsUpgrade {
    protocol: Rc<WsProtocol>,
}

impl WsUpgrade {
    pub fn new(protocol: WsProtocol) -> Self {
        Self { protocol: Rc::new(protocol) }
    }

    /// Shares a protocol that is also served on its own.
    pub fn shared(protocol: Rc<WsProtocol>) -> Self {
        Self { protocol }
    }

    fn check(request: &RequestHeader) -> Result<HeaderValue, &'static str> {
        let headers = request.headers();
        if *request.method() != Method::GET {
            return Err("method is not GET");
        }
        if !headers.contains_key(HOST) {
            return Err("missing Host");
        }
        if !request.connection_has("upgrade") {
            return Err("connection options lack upgrade");
        }
        let key = headers.get(SEC_WEBSOCKET_KEY).ok_or("missing Sec-WebSocket-Key")?;
        match headers.get(SEC_WEBSOCKET_VERSION) {
            Some(version) if version.as_bytes() == WS_VERSION.as_bytes() => {}
            _ => return Err("unsupported Sec-WebSocket-Version"),
        }
        HeaderValue::try_from(accept_key(key.as_bytes())).ok().ok_or("accept key is not a header value")
    }
}

impl UpgradeHandler for WsUpgrade {
    fn upgrade(&self, request: &RequestHeader) -> UpgradeStatus {
        match request.headers().get(UPGRADE) {
            Some(value) if has_token(value, "websocket") => {}
            _ => return UpgradeStatus::NoProto,
        }

        match Self::check(request) {
            Ok(accept) => {
                let mut response = empty_response(StatusCode::SWITCHING_PROTOCOLS);
                let headers = response.headers_mut();
                headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
                headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
                headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
                UpgradeStatus::Handled { response, next: AnyProtocol::Ws(Rc::clone(&self.protocol)) }
            }
            Err(reason) => {
                debug!(reason, "websocket handshake rejected");
                UpgradeStatus::Error(StatusCode::UPGRADE_REQUIRED)
            }
        }
    }
}
