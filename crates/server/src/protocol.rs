//! The contract every wire protocol implements.
//!
//! A protocol is stateless with respect to connections: one instance is
//! shared by all connections speaking it, and everything per connection
//! lives in its [`Protocol::Session`]. The connection calls into the
//! protocol from the reactor thread only:
//!
//! ```text
//! conn_init -> conn_ready -> (read | write | wakeup)* -> conn_cleanup
//! ```
//!
//! `read` is handed the bytes of one receive and returns how many it
//! consumed; the connection keeps calling it with the rest. `write` performs
//! the actual send so headers and payloads never need to be copied into one
//! buffer first.

use crate::connection::{ConnCtx, Deferred};
use crate::error::{ProtocolError, ServerError};
use crate::http::{HttpProtocol, HttpSession};
use crate::mqtt::{MqttProtocol, MqttSession};
use crate::net::Transport;
use crate::ws::{WsConnection, WsProtocol};
use bytes::Bytes;
use std::rc::Rc;

/// Result of a [`Protocol::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// everything queued was sent, write interest can be dropped
    Flushed,
    /// output remains, keep write interest armed
    Pending,
}

pub trait Protocol {
    type Session;

    fn name(&self) -> &'static str;

    /// Called once when the server starts listening.
    ///
    /// # Errors
    ///
    /// A failure here aborts server startup.
    fn init(&self) -> Result<(), ServerError> {
        Ok(())
    }

    /// Called once after the server stopped.
    fn cleanup(&self) {}

    /// Allocates the per-connection state.
    ///
    /// # Errors
    ///
    /// The connection is closed without further callbacks.
    fn conn_init(&self, ctx: &mut ConnCtx) -> Result<Self::Session, ProtocolError>;

    /// The connection is ready to exchange data.
    ///
    /// # Errors
    ///
    /// The connection is closed.
    fn conn_ready(&self, _ctx: &mut ConnCtx, _session: &mut Self::Session) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn conn_cleanup(&self, _ctx: &mut ConnCtx, _session: &mut Self::Session) {}

    /// Consumes a prefix of `buf`.
    ///
    /// The buffer is shared by all connections and only valid during this
    /// call. Returning less than `buf.len()` is not an error; the caller
    /// offers the rest again.
    ///
    /// # Errors
    ///
    /// The connection is closed.
    fn read(&self, ctx: &mut ConnCtx, session: &mut Self::Session, buf: &mut [u8]) -> Result<usize, ProtocolError>;

    /// Sends queued output on `io`.
    ///
    /// # Errors
    ///
    /// The connection is closed.
    fn write(&self, ctx: &mut ConnCtx, session: &mut Self::Session, io: &mut dyn Transport) -> Result<WriteStatus, ProtocolError>;

    /// Applies output queued from other threads.
    ///
    /// # Errors
    ///
    /// The connection is closed.
    fn wakeup(&self, _ctx: &mut ConnCtx, _session: &mut Self::Session, _items: Vec<Deferred>) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// The server is stopping gracefully: finish what is in flight and
    /// wind the connection down.
    fn stop(&self, ctx: &mut ConnCtx, _session: &mut Self::Session) {
        ctx.shutdown();
    }

    /// Input that was read but belongs to the protocol the connection is
    /// transitioning to.
    fn take_leftover(&self, _session: &mut Self::Session) -> Bytes {
        Bytes::new()
    }
}

/// One of the protocols a connection can be bound to.
#[derive(Debug, Clone)]
pub enum AnyProtocol {
    Http(Rc<HttpProtocol>),
    Ws(Rc<WsProtocol>),
    Mqtt(Rc<MqttProtocol>),
}

impl AnyProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Http(p) => p.name(),
            Self::Ws(p) => p.name(),
            Self::Mqtt(p) => p.name(),
        }
    }

    pub(crate) fn init(&self) -> Result<(), ServerError> {
        match self {
            Self::Http(p) => p.init(),
            Self::Ws(p) => p.init(),
            Self::Mqtt(p) => p.init(),
        }
    }

    pub(crate) fn cleanup(&self) {
        match self {
            Self::Http(p) => p.cleanup(),
            Self::Ws(p) => p.cleanup(),
            Self::Mqtt(p) => p.cleanup(),
        }
    }

    /// Allocates a session and binds it to this protocol.
    pub(crate) fn bind(self, ctx: &mut ConnCtx) -> Result<Binding, ProtocolError> {
        Ok(match self {
            Self::Http(p) => {
                let session = p.conn_init(ctx)?;
                Binding::Http(p, session)
            }
            Self::Ws(p) => {
                let session = p.conn_init(ctx)?;
                Binding::Ws(p, session)
            }
            Self::Mqtt(p) => {
                let session = p.conn_init(ctx)?;
                Binding::Mqtt(p, session)
            }
        })
    }
}

impl From<HttpProtocol> for AnyProtocol {
    fn from(p: HttpProtocol) -> Self {
        Self::Http(Rc::new(p))
    }
}

impl From<WsProtocol> for AnyProtocol {
    fn from(p: WsProtocol) -> Self {
        Self::Ws(Rc::new(p))
    }
}

impl From<MqttProtocol> for AnyProtocol {
    fn from(p: MqttProtocol) -> Self {
        Self::Mqtt(Rc::new(p))
    }
}

/// The protocol a connection is currently bound to, with its session.
pub(crate) enum Binding {
    Http(Rc<HttpProtocol>, HttpSession),
    Ws(Rc<WsProtocol>, WsConnection),
    Mqtt(Rc<MqttProtocol>, MqttSession),
}

macro_rules! dispatch {
    ($binding:expr, $proto:ident, $session:ident => $call:expr) => {
        match $binding {
            Binding::Http($proto, $session) => $call,
            Binding::Ws($proto, $session) => $call,
            Binding::Mqtt($proto, $session) => $call,
        }
    };
}

impl Binding {
    pub(crate) fn name(&self) -> &'static str {
        dispatch!(self, p, _s => p.name())
    }

    pub(crate) fn conn_ready(&mut self, ctx: &mut ConnCtx) -> Result<(), ProtocolError> {
        dispatch!(self, p, s => p.conn_ready(ctx, s))
    }

    pub(crate) fn conn_cleanup(&mut self, ctx: &mut ConnCtx) {
        dispatch!(self, p, s => p.conn_cleanup(ctx, s));
    }

    pub(crate) fn read(&mut self, ctx: &mut ConnCtx, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        dispatch!(self, p, s => p.read(ctx, s, buf))
    }

    pub(crate) fn write(&mut self, ctx: &mut ConnCtx, io: &mut dyn Transport) -> Result<WriteStatus, ProtocolError> {
        dispatch!(self, p, s => p.write(ctx, s, io))
    }

    pub(crate) fn wakeup(&mut self, ctx: &mut ConnCtx, items: Vec<Deferred>) -> Result<(), ProtocolError> {
        dispatch!(self, p, s => p.wakeup(ctx, s, items))
    }

    pub(crate) fn stop(&mut self, ctx: &mut ConnCtx) {
        dispatch!(self, p, s => p.stop(ctx, s));
    }

    pub(crate) fn take_leftover(&mut self) -> Bytes {
        dispatch!(self, p, s => p.take_leftover(s))
    }
}
