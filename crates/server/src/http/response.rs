//! Response building and delivery.
//!
//! A handler answers through a [`Responder`], either at once or later from
//! another thread. Every part it sends travels through the connection's
//! outbox as a [`ResponsePart`] and is applied on the reactor thread to the
//! [`PendingResponse`] of its request, which turns it into wire bytes.

use crate::bucket::BucketChain;
use crate::connection::{ConnHandle, Deferred};
use crate::error::SessionSendError;
use crate::protocol::AnyProtocol;
use crate::utils::ensure;
use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, StatusCode, Version};
use micro_http::codec::{CHUNK_SUFFIX, HeaderEncoder, LAST_CHUNK, chunk_prefix};
use micro_http::protocol::{PayloadSize, RequestHeader, ResponseHead, SendError, has_token, status_allows_body};
use tokio_util::codec::Encoder;
use tracing::trace;
use uuid::Uuid;

/// A complete response with its body.
pub type Response = http::Response<Bytes>;

/// `text/plain` response with the given status.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(mime::TEXT_PLAIN_UTF_8.as_ref()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

pub fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

/// One step of answering a request.
#[derive(Debug)]
pub enum ResponsePart {
    Full(Response),
    /// start of a streamed response
    Head(ResponseHead),
    Data(Bytes),
    End,
    /// the responder went away without finishing
    Abort,
}

/// Answers one request. `Send`, so it can be moved to a worker thread.
///
/// Dropping it before the response is finished answers the request with
/// `500 Internal Server Error`, or cuts a streamed response short and
/// closes the connection.
#[derive(Debug)]
pub struct Responder {
    handle: ConnHandle,
    slot: u64,
    started: bool,
    finished: bool,
}

impl Responder {
    pub(crate) fn new(handle: ConnHandle, slot: u64) -> Self {
        Self { handle, slot, started: false, finished: false }
    }

    /// Id of the connection the request came in on.
    pub fn conn_id(&self) -> Uuid {
        self.handle.id()
    }

    /// Sends a complete response.
    ///
    /// # Errors
    ///
    /// [`SessionSendError::NotAvailable`] after [`Responder::start`] and
    /// [`SessionSendError::Closed`] when the connection is gone.
    pub fn send(mut self, response: Response) -> Result<(), SessionSendError> {
        ensure!(!self.started, SessionSendError::NotAvailable);
        self.finished = true;
        self.post(ResponsePart::Full(response))
    }

    /// Starts a streamed response. The body is sent chunked when the
    /// client supports it and buffered until [`Responder::finish`]
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`SessionSendError::NotAvailable`] if already started and
    /// [`SessionSendError::Closed`] when the connection is gone.
    pub fn start(&mut self, head: ResponseHead) -> Result<(), SessionSendError> {
        ensure!(!self.started, SessionSendError::NotAvailable);
        self.started = true;
        self.post(ResponsePart::Head(head))
    }

    /// # Errors
    ///
    /// [`SessionSendError::NotAvailable`] before [`Responder::start`] and
    /// [`SessionSendError::Closed`] when the connection is gone.
    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<(), SessionSendError> {
        ensure!(self.started, SessionSendError::NotAvailable);
        self.post(ResponsePart::Data(data.into()))
    }

    /// # Errors
    ///
    /// [`SessionSendError::NotAvailable`] before [`Responder::start`] and
    /// [`SessionSendError::Closed`] when the connection is gone.
    pub fn finish(mut self) -> Result<(), SessionSendError> {
        ensure!(self.started, SessionSendError::NotAvailable);
        self.finished = true;
        self.post(ResponsePart::End)
    }

    fn post(&self, part: ResponsePart) -> Result<(), SessionSendError> {
        self.handle.post(Deferred::Http { slot: self.slot, part })?;
        Ok(())
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.finished && self.post(ResponsePart::Abort).is_err() {
            trace!(slot = self.slot, "responder dropped after connection closed");
        }
    }
}

/// The response to one request, in the order requests arrived.
#[derive(Debug)]
pub(crate) struct PendingResponse {
    pub(crate) slot: u64,
    version: Version,
    pub(crate) keep_alive: bool,
    chunked_ok: bool,
    head_request: bool,
    sends_body: bool,
    started: bool,
    chunked: bool,
    pub(crate) complete: bool,
    /// head of a streamed response waiting for its buffered body
    head: Option<ResponseHead>,
    body: BytesMut,
    /// encoded bytes ready to go out
    pub(crate) out: BucketChain,
    pub(crate) upgrade: Option<AnyProtocol>,
}

impl PendingResponse {
    pub(crate) fn new(slot: u64, request: &RequestHeader, keep_alive: bool) -> Self {
        Self {
            slot,
            version: request.version(),
            keep_alive,
            chunked_ok: request.accepts_chunked(),
            head_request: *request.method() == http::Method::HEAD,
            sends_body: true,
            started: false,
            chunked: false,
            complete: false,
            head: None,
            body: BytesMut::new(),
            out: BucketChain::new(),
            upgrade: None,
        }
    }

    /// A finished error response that ends the connection.
    pub(crate) fn error(slot: u64, version: Version, status: StatusCode) -> Result<Self, SendError> {
        let mut pending = Self {
            slot,
            version,
            keep_alive: false,
            chunked_ok: false,
            head_request: false,
            sends_body: true,
            started: false,
            chunked: false,
            complete: false,
            head: None,
            body: BytesMut::new(),
            out: BucketChain::new(),
            upgrade: None,
        };
        pending.apply(ResponsePart::Full(empty_response(status)))?;
        Ok(pending)
    }

    /// Turns `part` into output.
    ///
    /// # Errors
    ///
    /// Parts out of sequence, such as data before a head or anything after
    /// the end, are rejected and change nothing.
    pub(crate) fn apply(&mut self, part: ResponsePart) -> Result<(), SendError> {
        if self.complete {
            return Err(SendError::invalid_body("response already complete"));
        }

        match part {
            ResponsePart::Full(response) => {
                ensure!(!self.started, SendError::invalid_body("response already started"));
                let (parts, body) = response.into_parts();
                let head = ResponseHead::from_parts(parts, ());
                self.begin(&head);
                let size = PayloadSize::new_length(body.len() as u64);
                self.encode_head(head, size)?;
                if self.sends_body && !body.is_empty() {
                    self.out.push(body);
                }
                self.complete = true;
            }
            ResponsePart::Head(head) => {
                ensure!(!self.started, SendError::invalid_body("response already started"));
                self.begin(&head);
                if self.chunked_ok {
                    self.chunked = true;
                    self.encode_head(head, PayloadSize::new_chunked())?;
                } else {
                    self.head = Some(head);
                }
            }
            ResponsePart::Data(data) => {
                ensure!(self.started, SendError::invalid_body("body before response head"));
                if !self.sends_body || data.is_empty() {
                    return Ok(());
                }
                if self.chunked {
                    self.out.push(chunk_prefix(data.len()));
                    self.out.push(data);
                    self.out.push(CHUNK_SUFFIX);
                } else {
                    self.body.extend_from_slice(&data);
                }
            }
            ResponsePart::End => {
                ensure!(self.started, SendError::invalid_body("end before response head"));
                if let Some(head) = self.head.take() {
                    let body = self.body.split().freeze();
                    self.encode_head(head, PayloadSize::new_length(body.len() as u64))?;
                    if self.sends_body && !body.is_empty() {
                        self.out.push(body);
                    }
                } else if self.chunked && self.sends_body {
                    self.out.push(LAST_CHUNK);
                }
                self.complete = true;
            }
            ResponsePart::Abort => {
                self.keep_alive = false;
                // nothing of a buffered response is on the wire yet
                if !self.started || self.head.take().is_some() {
                    self.body.clear();
                    self.begin(&ResponseHead::default());
                    self.encode_head(empty_head(StatusCode::INTERNAL_SERVER_ERROR), PayloadSize::new_empty())?;
                }
                self.complete = true;
            }
        }
        Ok(())
    }

    fn begin(&mut self, head: &ResponseHead) {
        self.started = true;
        self.sends_body = !self.head_request && status_allows_body(head.status());
    }

    fn encode_head(&mut self, mut head: ResponseHead, size: PayloadSize) -> Result<(), SendError> {
        *head.version_mut() = self.version;
        if head.status() != StatusCode::SWITCHING_PROTOCOLS {
            if head.headers().get_all(CONNECTION).iter().any(|v| has_token(v, "close")) {
                self.keep_alive = false;
            }
            if !self.keep_alive {
                head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
            } else if self.version == Version::HTTP_10 {
                head.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            }
        }

        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, size), &mut dst)?;
        trace!(slot = self.slot, len = dst.len(), "response head encoded");
        self.out.push(dst.freeze());
        Ok(())
    }
}

fn empty_head(status: StatusCode) -> ResponseHead {
    let mut head = ResponseHead::default();
    *head.status_mut() = status;
    head
}
