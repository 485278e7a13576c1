//! WebSocket protocol.
//!
//! Frames are parsed straight out of the connection's receive buffer by a
//! [`FrameParser`] that may stop anywhere inside a frame and resume on the
//! next read. Completed frames are dispatched by opcode: data to the
//! [`WsHandler`], CLOSE to the close handshake, PING answered with PONG.
//!
//! A protocol violation queues a best-effort CLOSE with the matching status
//! code, moves the session to ERROR and half-closes once that frame is out.

mod handler;
mod session;

pub use handler::{EchoHandler, WsHandler};
pub use session::{WsSender, WsSession, WsState};

use crate::connection::{ConnCtx, Deferred};
use crate::error::{ProtocolError, ServerError};
use crate::net::{SendStatus, Transport, send_chain};
use crate::protocol::{Protocol, WriteStatus};
use crate::utils::catch_callback;
use bytes::{Bytes, BytesMut};
use micro_ws::{DEFAULT_MAX_FRAME_SIZE, FrameFlags, FrameParser, Opcode, WsError, close};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Largest message accumulated in buffered mode by default.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

pub struct WsProtocol {
    handler: Rc<dyn WsHandler>,
    max_frame_size: u64,
    buffered: bool,
    max_message_size: usize,
}

impl fmt::Debug for WsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsProtocol")
            .field("max_frame_size", &self.max_frame_size)
            .field("buffered", &self.buffered)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl WsProtocol {
    pub fn builder() -> WsProtocolBuilder {
        WsProtocolBuilder::new()
    }

    /// An unbuffered protocol with default limits.
    pub fn new(handler: impl WsHandler + 'static) -> Self {
        Self {
            handler: Rc::new(handler),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            buffered: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

pub struct WsProtocolBuilder {
    handler: Option<Rc<dyn WsHandler>>,
    max_frame_size: u64,
    buffered: bool,
    max_message_size: usize,
}

impl fmt::Debug for WsProtocolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsProtocolBuilder").field("has_handler", &self.handler.is_some()).finish_non_exhaustive()
    }
}

impl WsProtocolBuilder {
    fn new() -> Self {
        Self { handler: None, max_frame_size: DEFAULT_MAX_FRAME_SIZE, buffered: false, max_message_size: DEFAULT_MAX_MESSAGE_SIZE }
    }

    #[must_use]
    pub fn handler(mut self, handler: impl WsHandler + 'static) -> Self {
        self.handler = Some(Rc::new(handler));
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, max_frame_size: u64) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Deliver whole messages instead of individual frames.
    #[must_use]
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    #[must_use]
    pub fn max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// # Errors
    ///
    /// [`ServerError::InvalidConfig`] without a handler or with a zero
    /// size limit.
    pub fn build(self) -> Result<WsProtocol, ServerError> {
        let handler = self.handler.ok_or_else(|| ServerError::invalid_config("websocket handler must be set"))?;
        if self.max_frame_size == 0 || self.max_message_size == 0 {
            return Err(ServerError::invalid_config("websocket size limits must be positive"));
        }
        Ok(WsProtocol {
            handler,
            max_frame_size: self.max_frame_size,
            buffered: self.buffered,
            max_message_size: self.max_message_size,
        })
    }
}

/// Per-connection WebSocket state.
#[derive(Debug)]
pub struct WsConnection {
    parser: FrameParser,
    /// message being assembled in buffered mode
    message: BytesMut,
    session: WsSession,
}

impl WsConnection {
    pub fn session(&self) -> &WsSession {
        &self.session
    }
}

impl WsProtocol {
    /// Arms write interest for queued output, or half-closes right away
    /// when nothing is left to flush before doing so.
    fn arm(ctx: &mut ConnCtx, c: &WsConnection) {
        if c.session.out.total_length() > 0 {
            ctx.enable_tx();
        } else if c.session.shutdown_after_flush {
            ctx.shutdown();
        }
    }

    /// Ends the session after a violation or a failed callback.
    fn fail(ctx: &mut ConnCtx, c: &mut WsConnection, code: u16, cause: &ProtocolError) {
        if cause.is_resource_exhaustion() {
            warn!(cause = %cause, code, "websocket session failed");
        } else {
            debug!(cause = %cause, code, "websocket session failed");
        }
        if c.session.state() == WsState::Connected {
            c.session.queue_close(code);
        }
        c.session.set_state(WsState::Error);
        c.session.shutdown_after_flush = true;
        c.message.clear();
        Self::arm(ctx, c);
    }

    fn complete_frame(&self, ctx: &mut ConnCtx, c: &mut WsConnection) {
        let flags = c.parser.flags();
        match c.parser.opcode() {
            Opcode::Continuation | Opcode::Text | Opcode::Binary => self.deliver(ctx, c, flags),
            Opcode::Close => self.peer_close(ctx, c),
            Opcode::Ping => {
                if c.session.state() == WsState::Connected {
                    trace!(len = c.parser.payload().len(), "ping");
                    c.session.queue_frame(flags.with_opcode(Opcode::Pong), Bytes::copy_from_slice(c.parser.payload()));
                }
            }
            Opcode::Pong => trace!("pong"),
        }
    }

    fn deliver(&self, ctx: &mut ConnCtx, c: &mut WsConnection, flags: FrameFlags) {
        if c.session.state() != WsState::Connected {
            trace!(state = ?c.session.state(), "dropping data frame");
            return;
        }

        let result = if self.buffered {
            let size = c.message.len() + c.parser.payload().len();
            if size > self.max_message_size {
                let e = WsError::message_too_large(size, self.max_message_size);
                Self::fail(ctx, c, e.close_code(), &e.into());
                return;
            }
            c.message.extend_from_slice(c.parser.payload());
            if !flags.fin() {
                return;
            }
            let opcode = c.parser.message_opcode().unwrap_or(Opcode::Binary);
            let message = &c.message;
            let session = &mut c.session;
            let result = catch_callback(|| self.handler.on_message(session, FrameFlags::new(true, opcode), message));
            c.message.clear();
            result
        } else {
            let payload = c.parser.payload();
            let session = &mut c.session;
            catch_callback(|| self.handler.on_message(session, flags, payload))
        };

        if let Err(e) = result {
            Self::fail(ctx, c, close::INTERNAL_ERROR, &ProtocolError::callback(e));
        }
    }

    /// Runs the receiving half of the close handshake.
    ///
    /// If we closed first the handshake is complete and the connection is
    /// closed without echoing. Otherwise the status is validated and echoed
    /// (a malformed one is answered with its error code) and the connection
    /// half-closes once the echo is out.
    fn peer_close(&self, ctx: &mut ConnCtx, c: &mut WsConnection) {
        let code = match close::parse_close_payload(c.parser.payload()) {
            Ok(code) => code,
            Err(e) => {
                debug!(cause = %e, "invalid close payload");
                e.close_code()
            }
        };

        match c.session.state() {
            WsState::Connected => {
                debug!(code, "close received, echoing");
                c.session.queue_close(code);
                c.session.set_state(WsState::CloseReceived);
                c.session.shutdown_after_flush = true;
                self.handler.on_close(&mut c.session, code);
            }
            WsState::ExpectClose => {
                debug!(code, "close handshake complete");
                c.session.set_state(WsState::Closed);
                self.handler.on_close(&mut c.session, code);
                ctx.close();
            }
            state => trace!(?state, "ignoring close"),
        }
    }

    fn apply_deferred(c: &mut WsConnection, items: Vec<Deferred>) {
        for item in items {
            let result = match item {
                Deferred::WsSend { flags, payload } => c.session.send_frame(flags, payload),
                Deferred::WsClose { code } => c.session.close(code),
                Deferred::Http { slot, .. } => {
                    trace!(slot, "dropping http response part on websocket connection");
                    Ok(())
                }
            };
            if let Err(e) = result {
                debug!(cause = %e, "dropping deferred frame");
            }
        }
    }
}

impl Protocol for WsProtocol {
    type Session = WsConnection;

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn conn_init(&self, ctx: &mut ConnCtx) -> Result<WsConnection, ProtocolError> {
        ctx.enable_rx();
        Ok(WsConnection {
            parser: FrameParser::new().with_max_frame_size(self.max_frame_size),
            message: BytesMut::new(),
            session: WsSession::new(ctx.handle().clone()),
        })
    }

    fn conn_ready(&self, ctx: &mut ConnCtx, c: &mut WsConnection) -> Result<(), ProtocolError> {
        if let Err(e) = catch_callback(|| self.handler.on_connect(&mut c.session)) {
            Self::fail(ctx, c, close::INTERNAL_ERROR, &ProtocolError::callback(e));
        }
        // upgraded while the server is already stopping
        if ctx.is_stopping() {
            self.stop(ctx, c);
            return Ok(());
        }
        Self::arm(ctx, c);
        Ok(())
    }

    fn conn_cleanup(&self, _ctx: &mut ConnCtx, c: &mut WsConnection) {
        trace!(state = ?c.session.state(), unsent = c.session.queued(), "websocket cleanup");
    }

    fn read(&self, ctx: &mut ConnCtx, c: &mut WsConnection, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut offset = 0;
        while offset < buf.len() {
            if matches!(c.session.state(), WsState::Closed | WsState::Error) {
                trace!(len = buf.len() - offset, "discarding input");
                break;
            }

            match c.parser.parse(&buf[offset..]) {
                Ok(n) => offset += n,
                Err(e) => {
                    let code = e.close_code();
                    Self::fail(ctx, c, code, &e.into());
                    break;
                }
            }

            if c.parser.is_complete() {
                trace!(opcode = %c.parser.opcode(), len = c.parser.payload().len(), "frame complete");
                self.complete_frame(ctx, c);
                c.parser.reset();
            }
        }

        Self::arm(ctx, c);
        Ok(buf.len())
    }

    fn write(&self, ctx: &mut ConnCtx, c: &mut WsConnection, io: &mut dyn Transport) -> Result<WriteStatus, ProtocolError> {
        match send_chain(io, &mut c.session.out, ctx.max_iovec())? {
            SendStatus::Pending => Ok(WriteStatus::Pending),
            SendStatus::Drained => {
                if c.session.shutdown_after_flush {
                    ctx.shutdown();
                }
                Ok(WriteStatus::Flushed)
            }
        }
    }

    fn wakeup(&self, ctx: &mut ConnCtx, c: &mut WsConnection, items: Vec<Deferred>) -> Result<(), ProtocolError> {
        Self::apply_deferred(c, items);
        Self::arm(ctx, c);
        Ok(())
    }

    /// Starts the close handshake with 1001.
    fn stop(&self, ctx: &mut ConnCtx, c: &mut WsConnection) {
        if c.session.state() == WsState::Connected {
            c.session.queue_close(close::GOING_AWAY);
            c.session.set_state(WsState::ExpectClose);
        }
        Self::arm(ctx, c);
    }
}
