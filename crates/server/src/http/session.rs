use crate::bucket::BucketChain;
use crate::connection::Deferred;
use crate::http::response::{PendingResponse, ResponsePart};
use crate::protocol::AnyProtocol;
use bytes::BytesMut;
use micro_http::codec::RequestDecoder;
use micro_http::protocol::RequestHeader;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    Open,
    /// a 101 response is queued, input is kept for the next protocol
    Upgrading,
    /// an error response is queued, input is ignored
    Error,
}

/// What happens once all queued output is sent.
pub(crate) enum AfterFlush {
    Shutdown,
    Transition(AnyProtocol),
}

impl fmt::Debug for AfterFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("Shutdown"),
            Self::Transition(next) => f.debug_tuple("Transition").field(&next.name()).finish(),
        }
    }
}

/// A request whose body is still being read.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) head: RequestHeader,
    pub(crate) body: BytesMut,
}

/// Per-connection HTTP state.
#[derive(Debug)]
pub struct HttpSession {
    /// received bytes not decoded yet
    pub(crate) buf: BytesMut,
    pub(crate) decoder: RequestDecoder,
    pub(crate) current: Option<InFlight>,
    /// responses in request order; only the front one may reach `out`
    pub(crate) pending: VecDeque<PendingResponse>,
    next_slot: u64,
    pub(crate) out: BucketChain,
    pub(crate) state: HttpState,
    /// false once a request ended keep-alive
    pub(crate) accepting: bool,
    pub(crate) after_flush: Option<AfterFlush>,
}

impl HttpSession {
    pub(crate) fn new(max_body_size: u64) -> Self {
        Self {
            buf: BytesMut::new(),
            decoder: RequestDecoder::new().with_max_body_size(max_body_size),
            current: None,
            pending: VecDeque::new(),
            next_slot: 0,
            out: BucketChain::new(),
            state: HttpState::Open,
            accepting: true,
            after_flush: None,
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    /// Requests whose responses have not been fully queued for sending.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn next_slot(&mut self) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.current.is_none() && self.out.is_empty() && self.after_flush.is_none()
    }

    /// Applies `part` to the response of request `slot`.
    pub(crate) fn apply(&mut self, slot: u64, part: ResponsePart) {
        let Some(pending) = self.pending.iter_mut().find(|p| p.slot == slot) else {
            trace!(slot, "no pending response for slot");
            return;
        };
        if let Err(e) = pending.apply(part) {
            debug!(slot, cause = %e, "response part rejected");
        }
    }

    pub(crate) fn apply_deferred(&mut self, items: Vec<Deferred>) {
        for item in items {
            match item {
                Deferred::Http { slot, part } => self.apply(slot, part),
                other => trace!(item = ?other, "dropping websocket item on http connection"),
            }
        }
    }

    /// Moves output of the responses at the front of the queue to `out`.
    ///
    /// Later responses wait until every earlier one is complete, so
    /// pipelined responses leave in request order. A completed response
    /// that ends the connection or switches protocols drops whatever
    /// follows it.
    pub(crate) fn flush_ready(&mut self) {
        while let Some(front) = self.pending.front_mut() {
            self.out.append(&mut front.out);
            if !front.complete {
                break;
            }

            let Some(done) = self.pending.pop_front() else { break };
            if let Some(next) = done.upgrade {
                self.after_flush = Some(AfterFlush::Transition(next));
            } else if !done.keep_alive {
                self.after_flush = Some(AfterFlush::Shutdown);
            } else {
                continue;
            }

            if !self.pending.is_empty() {
                debug!(dropped = self.pending.len(), "discarding responses after final one");
                self.pending.clear();
            }
            self.accepting = false;
            break;
        }
    }
}

/// Whether the request head at the start of `raw` has an `Expect` field.
///
/// Used when decoding the head failed and the parsed form is not
/// available.
pub(crate) fn head_has_expect(raw: &[u8]) -> bool {
    let end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(raw.len());
    raw[..end].split(|&b| b == b'\n').skip(1).any(|line| {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        line.len() > 7 && line[..7].eq_ignore_ascii_case(b"expect:")
    })
}
