//! HTTP/1.1 protocol.
//!
//! Requests are decoded by [`micro_http`]'s [`RequestDecoder`] from a
//! per-connection buffer, so a request may arrive split over any number of
//! reads. Each complete request is handed to the [`HttpHandler`] together
//! with a [`Responder`]. Responses are queued per request and leave in
//! request order, whichever order the handler answers in.
//!
//! An `Upgrade` request runs through the [`UpgradeHandler`] chain; a
//! handled upgrade switches the connection to the next protocol once the
//! `101` response is out, passing it whatever input followed the request.
//!
//! [`RequestDecoder`]: micro_http::codec::RequestDecoder

mod response;
mod session;
mod upgrade;

pub use response::{Responder, Response, ResponsePart, empty_response, text_response};
pub use session::{HttpSession, HttpState};
pub use upgrade::{H2cUpgrade, UpgradeHandler, UpgradeStatus, WsUpgrade};

use crate::connection::{ConnCtx, Deferred};
use crate::error::{HandlerError, ProtocolError, ServerError};
use crate::net::{SendStatus, Transport, send_chain};
use crate::protocol::{Protocol, WriteStatus};
use crate::utils::catch_callback;
use crate::ws::WsProtocol;
use bytes::{Bytes, BytesMut};
use http::header::UPGRADE;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use micro_http::codec::DEFAULT_MAX_BODY_SIZE;
use micro_http::protocol::{Message, ParseError, PayloadItem, RequestHeader};
use response::PendingResponse;
use session::{AfterFlush, InFlight, head_has_expect};
use std::fmt;
use std::rc::Rc;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// A complete request: the head and the whole body.
#[derive(Debug)]
pub struct Request {
    head: RequestHeader,
    body: Bytes,
}

impl Request {
    pub fn head(&self) -> &RequestHeader {
        &self.head
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (RequestHeader, Bytes) {
        (self.head, self.body)
    }
}

/// Application entry point for requests.
pub trait HttpHandler {
    /// Answers `request` through `responder`, now or later.
    ///
    /// # Errors
    ///
    /// An error is answered with `500 Internal Server Error` unless a
    /// response was already sent.
    fn call(&self, request: Request, responder: Responder) -> Result<(), HandlerError>;
}

impl<F> HttpHandler for F
where
    F: Fn(Request, Responder) -> Result<(), HandlerError>,
{
    fn call(&self, request: Request, responder: Responder) -> Result<(), HandlerError> {
        self(request, responder)
    }
}

pub struct HttpProtocol {
    handler: Rc<dyn HttpHandler>,
    max_body_size: u64,
    upgrades: Vec<Box<dyn UpgradeHandler>>,
}

impl fmt::Debug for HttpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProtocol")
            .field("max_body_size", &self.max_body_size)
            .field("upgrades", &self.upgrades.len())
            .finish_non_exhaustive()
    }
}

impl HttpProtocol {
    pub fn builder() -> HttpProtocolBuilder {
        HttpProtocolBuilder::new()
    }

    /// Offers the request to each upgrade handler in turn.
    fn upgrade(&self, head: &RequestHeader) -> UpgradeStatus {
        for handler in &self.upgrades {
            match handler.upgrade(head) {
                UpgradeStatus::NoProto => {}
                status => return status,
            }
        }
        UpgradeStatus::NoProto
    }
}

pub struct HttpProtocolBuilder {
    handler: Option<Rc<dyn HttpHandler>>,
    max_body_size: u64,
    upgrades: Vec<Box<dyn UpgradeHandler>>,
}

impl fmt::Debug for HttpProtocolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProtocolBuilder")
            .field("has_handler", &self.handler.is_some())
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

impl HttpProtocolBuilder {
    fn new() -> Self {
        Self { handler: None, max_body_size: DEFAULT_MAX_BODY_SIZE, upgrades: Vec::new() }
    }

    #[must_use]
    pub fn handler(mut self, handler: impl HttpHandler + 'static) -> Self {
        self.handler = Some(Rc::new(handler));
        self
    }

    /// Same as [`HttpProtocolBuilder::handler`], with the closure's
    /// argument types inferred.
    #[must_use]
    pub fn handler_fn<F>(self, f: F) -> Self
    where
        F: Fn(Request, Responder) -> Result<(), HandlerError> + 'static,
    {
        self.handler(f)
    }

    #[must_use]
    pub fn max_body_size(mut self, max_body_size: u64) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Appends an upgrade handler; handlers are asked in the order added.
    #[must_use]
    pub fn upgrade(mut self, handler: impl UpgradeHandler + 'static) -> Self {
        self.upgrades.push(Box::new(handler));
        self
    }

    /// Accepts WebSocket upgrades, continuing the connection with
    /// `protocol`.
    #[must_use]
    pub fn websocket(self, protocol: WsProtocol) -> Self {
        self.upgrade(WsUpgrade::new(protocol))
    }

    /// # Errors
    ///
    /// [`ServerError::InvalidConfig`] without a handler or with a zero body
    /// limit.
    pub fn build(mut self) -> Result<HttpProtocol, ServerError> {
        let handler = self.handler.ok_or_else(|| ServerError::invalid_config("http handler must be set"))?;
        if self.max_body_size == 0 {
            return Err(ServerError::invalid_config("max_body_size must be positive"));
        }
        self.upgrades.push(Box::new(H2cUpgrade));
        Ok(HttpProtocol { handler, max_body_size: self.max_body_size, upgrades: self.upgrades })
    }
}

impl HttpProtocol {
    /// Arms write interest for queued output, or acts on the end of the
    /// exchange right away when nothing is left to send.
    fn arm(ctx: &mut ConnCtx, s: &mut HttpSession) {
        if s.out.total_length() > 0 {
            ctx.enable_tx();
        } else {
            Self::after_flush(ctx, s);
        }
    }

    fn after_flush(ctx: &mut ConnCtx, s: &mut HttpSession) {
        match s.after_flush.take() {
            Some(AfterFlush::Shutdown) => ctx.shutdown(),
            Some(AfterFlush::Transition(next)) => {
                debug!(next = next.name(), "switching protocols");
                ctx.transition(next);
            }
            None => {}
        }
    }

    /// Decodes and dispatches every complete request in the buffer.
    fn process(&self, ctx: &mut ConnCtx, s: &mut HttpSession) {
        while s.state == HttpState::Open && s.accepting {
            let expect = match &s.current {
                Some(current) => current.head.has_expect(),
                None => head_has_expect(&s.buf),
            };

            match s.decoder.decode(&mut s.buf) {
                Ok(Some(Message::Header((head, size)))) => {
                    trace!(method = %head.method(), uri = %head.uri(), "request head");
                    if head.expects_continue() && !size.is_empty() && s.pending.is_empty() {
                        s.out.push(CONTINUE);
                    }
                    s.current = Some(InFlight { head, body: BytesMut::new() });
                }
                Ok(Some(Message::Payload(PayloadItem::Chunk(bytes)))) => {
                    if let Some(current) = &mut s.current {
                        current.body.extend_from_slice(&bytes);
                    }
                }
                Ok(Some(Message::Payload(PayloadItem::Eof))) => {
                    if let Some(current) = s.current.take() {
                        self.dispatch(ctx, s, current);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let version = s.current.as_ref().map_or(Version::HTTP_11, |c| c.head.version());
                    let status = e.status_code(expect);
                    Self::fail(s, version, status, &e.into());
                }
            }
        }

        s.flush_ready();
        Self::arm(ctx, s);
    }

    fn dispatch(&self, ctx: &mut ConnCtx, s: &mut HttpSession, request: InFlight) {
        let InFlight { head, body } = request;
        let keep_alive = head.keep_alive() && !ctx.is_stopping();
        let slot = s.next_slot();
        let mut pending = PendingResponse::new(slot, &head, keep_alive);

        if head.headers().contains_key(UPGRADE) {
            match self.upgrade(&head) {
                UpgradeStatus::Handled { response, next } => {
                    if let Err(e) = pending.apply(ResponsePart::Full(response)) {
                        Self::fail(s, head.version(), StatusCode::INTERNAL_SERVER_ERROR, &e.into());
                        return;
                    }
                    pending.upgrade = Some(next);
                    s.pending.push_back(pending);
                    s.state = HttpState::Upgrading;
                    ctx.disable_rx();
                    return;
                }
                UpgradeStatus::Ignore => {}
                UpgradeStatus::NoProto => {
                    let cause = ProtocolError::from(ParseError::invalid_header("no upgrade handler"));
                    Self::fail(s, head.version(), StatusCode::NOT_IMPLEMENTED, &cause);
                    return;
                }
                UpgradeStatus::Error(status) => {
                    let cause = ProtocolError::from(ParseError::invalid_header("upgrade refused"));
                    Self::fail(s, head.version(), status, &cause);
                    return;
                }
            }
        }

        s.pending.push_back(pending);
        if !keep_alive {
            s.accepting = false;
            ctx.disable_rx();
        }

        let responder = Responder::new(ctx.handle().clone(), slot);
        let request = Request { head, body: body.freeze() };
        let result = catch_callback(|| self.handler.call(request, responder));

        // parts the handler sent before returning
        if let Some(items) = ctx.handle().take_outbox() {
            s.apply_deferred(items);
        }
        if let Err(e) = result {
            let cause = ProtocolError::callback(e);
            warn!(cause = %cause, slot, "http handler failed");
            s.apply(slot, ResponsePart::Abort);
        }
    }

    /// Queues an error response that ends the connection and ignores all
    /// further input.
    fn fail(s: &mut HttpSession, version: Version, status: StatusCode, cause: &ProtocolError) {
        if cause.is_resource_exhaustion() {
            warn!(cause = %cause, status = status.as_u16(), "http request rejected");
        } else {
            debug!(cause = %cause, status = status.as_u16(), "http request rejected");
        }

        let slot = s.next_slot();
        match PendingResponse::error(slot, version, status) {
            Ok(pending) => s.pending.push_back(pending),
            Err(e) => debug!(cause = %e, "error response not encodable"),
        }
        s.state = HttpState::Error;
        s.accepting = false;
        s.current = None;
        s.buf.clear();
    }
}

impl Protocol for HttpProtocol {
    type Session = HttpSession;

    fn name(&self) -> &'static str {
        "http"
    }

    fn conn_init(&self, ctx: &mut ConnCtx) -> Result<HttpSession, ProtocolError> {
        ctx.enable_rx();
        Ok(HttpSession::new(self.max_body_size))
    }

    fn conn_cleanup(&self, _ctx: &mut ConnCtx, s: &mut HttpSession) {
        trace!(state = ?s.state, in_flight = s.pending.len(), "http cleanup");
    }

    fn read(&self, ctx: &mut ConnCtx, s: &mut HttpSession, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        match s.state {
            HttpState::Open if s.accepting => {
                s.buf.extend_from_slice(buf);
                self.process(ctx, s);
            }
            HttpState::Upgrading => s.buf.extend_from_slice(buf),
            HttpState::Open | HttpState::Error => trace!(len = buf.len(), "discarding input"),
        }
        Ok(buf.len())
    }

    fn write(&self, ctx: &mut ConnCtx, s: &mut HttpSession, io: &mut dyn Transport) -> Result<WriteStatus, ProtocolError> {
        s.flush_ready();
        match send_chain(io, &mut s.out, ctx.max_iovec())? {
            SendStatus::Pending => Ok(WriteStatus::Pending),
            SendStatus::Drained => {
                Self::after_flush(ctx, s);
                Ok(WriteStatus::Flushed)
            }
        }
    }

    fn wakeup(&self, ctx: &mut ConnCtx, s: &mut HttpSession, items: Vec<Deferred>) -> Result<(), ProtocolError> {
        s.apply_deferred(items);
        s.flush_ready();
        Self::arm(ctx, s);
        Ok(())
    }

    /// Lets in-flight requests finish, then half-closes.
    fn stop(&self, ctx: &mut ConnCtx, s: &mut HttpSession) {
        if s.state == HttpState::Open && s.is_idle() {
            ctx.shutdown();
            return;
        }
        // a request still being read is answered with `Connection: close`
        if s.current.is_some() {
            return;
        }

        s.accepting = false;
        ctx.disable_rx();
        match s.pending.back_mut() {
            Some(last) => last.keep_alive = false,
            None if s.after_flush.is_none() => s.after_flush = Some(AfterFlush::Shutdown),
            None => {}
        }
        Self::arm(ctx, s);
    }

    fn take_leftover(&self, s: &mut HttpSession) -> Bytes {
        s.buf.split().freeze()
    }
}
