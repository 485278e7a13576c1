//! Per-socket state machine.
//!
//! ```text
//! OPEN -> SHUTDOWN -> CLOSING -> CLOSED
//!   \___________________/^
//! ```
//!
//! A connection runs as one task on the reactor's local set. It waits for
//! whichever comes first: the socket becoming readable or writable (only
//! while the protocol asked for it), a wakeup from another thread, the
//! server's stop signal, or the idle deadline. Every event is handled
//! synchronously by calling into the bound protocol, then the requests the
//! protocol left in its [`ConnCtx`] are applied.
//!
//! Shutdown is a half-close: the write side is shut while reading goes on,
//! discarding input, until the peer closes or nothing more is pending. This
//! keeps clients that are still sending from seeing a reset.
//!
//! A panic in a protocol callback is caught at this boundary and handled
//! like any other callback failure: the connection is closed and the
//! server keeps running. The live count is kept by a guard, so even a task
//! that unwinds releases its slot.

mod ctx;
mod handle;

pub use ctx::ConnCtx;
pub use handle::{ConnGuard, ConnHandle, Deferred};

use crate::error::ProtocolError;
use crate::net::{Readiness, Transport};
use crate::protocol::{AnyProtocol, Binding, WriteStatus};
use crate::server::Shared;
use crate::utils::panic_message;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Open,
    /// write side shut, draining input
    Shutdown,
    Closing,
    Closed,
}

pub(crate) struct Connection<S> {
    io: S,
    ctx: ConnCtx,
    binding: Option<Binding>,
    state: ConnState,
    shared: Rc<Shared>,
    last_active: Instant,
}

impl<S: Transport + Readiness> Connection<S> {
    pub(crate) fn new(io: S, shared: Rc<Shared>) -> Self {
        let handle = ConnHandle::new(Uuid::now_v7());
        let ctx = ConnCtx::new(handle, shared.max_iovec);
        Self { io, ctx, binding: None, state: ConnState::Open, shared, last_active: Instant::now() }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.ctx.id()
    }

    /// Drives the connection until it is closed.
    pub(crate) async fn run(mut self, protocol: AnyProtocol) {
        let _live = LiveGuard { shared: Rc::clone(&self.shared), handle: self.ctx.handle().clone() };
        debug!(protocol = protocol.name(), "connection open");
        self.open(protocol);

        while self.state != ConnState::Closed {
            let deadline = self.last_active + self.shared.idle_timeout;
            let rx = self.ctx.rx_enabled();
            let tx = self.ctx.tx_enabled() && self.state == ConnState::Open;
            let watch_stop = !self.ctx.is_stopping();

            tokio::select! {
                biased;

                () = self.shared.stop.cancelled(), if watch_stop => self.on_stop(),
                () = self.ctx.handle().notified() => {
                    if !self.on_wakeup() {
                        // a worker holds the outbox, let it finish
                        tokio::task::yield_now().await;
                    }
                }
                ready = self.io.readable(), if rx => self.on_readable(ready),
                ready = self.io.writable(), if tx => self.on_writable(ready),
                () = time::sleep_until(deadline) => {
                    debug!(idle_timeout = ?self.shared.idle_timeout, "idle timeout");
                    self.close();
                }
            }
        }
    }

    fn open(&mut self, protocol: AnyProtocol) {
        if let Some(hook) = &self.shared.hooks.on_conn_init {
            hook(&self.ctx);
        }
        let ctx = &mut self.ctx;
        match guarded(|| protocol.bind(ctx)) {
            Ok(binding) => self.binding = Some(binding),
            Err(e) => {
                self.protocol_failed(&e);
                return;
            }
        }
        self.ready();
    }

    fn ready(&mut self) {
        let Some(binding) = self.binding.as_mut() else { return };
        let ctx = &mut self.ctx;
        match guarded(|| binding.conn_ready(ctx)) {
            Ok(()) => self.apply(),
            Err(e) => self.protocol_failed(&e),
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn on_readable(&mut self, ready: io::Result<()>) {
        if let Err(e) = ready {
            debug!(cause = %e, "read readiness failed");
            self.close();
            return;
        }
        self.touch();

        let shared = Rc::clone(&self.shared);
        let mut buf = shared.recv_buf.borrow_mut();

        if self.state == ConnState::Shutdown {
            self.drain_after_shutdown(&mut buf);
            return;
        }

        match self.io.recv(&mut buf) {
            Ok(0) => {
                debug!("peer closed");
                self.close();
            }
            Ok(n) => {
                trace!(len = n, "recv");
                self.dispatch_read(&mut buf[..n]);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                debug!(cause = %e, "recv failed");
                self.close();
            }
        }
    }

    /// Feeds `data` to the bound protocol until it is used up or the
    /// connection leaves the open state.
    fn dispatch_read(&mut self, data: &mut [u8]) {
        let mut offset = 0;
        while offset < data.len() && self.state == ConnState::Open {
            let Some(binding) = self.binding.as_mut() else { return };
            let protocol = binding.name();
            let (ctx, input) = (&mut self.ctx, &mut data[offset..]);
            match guarded(|| binding.read(ctx, input)) {
                Ok(n) => {
                    offset += n;
                    let switched = self.ctx.has_transition();
                    self.apply();
                    if n == 0 && !switched {
                        trace!(protocol, left = data.len() - offset, "protocol made no progress");
                        return;
                    }
                }
                Err(e) => {
                    self.protocol_failed(&e);
                    return;
                }
            }
        }
    }

    fn drain_after_shutdown(&mut self, buf: &mut [u8]) {
        loop {
            match self.io.recv(buf) {
                Ok(0) => {
                    debug!("peer finished after shutdown");
                    break;
                }
                Ok(n) => trace!(len = n, "discarding input after shutdown"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    trace!(cause = %e, "drain stopped");
                    break;
                }
            }
        }
        self.close();
    }

    fn on_writable(&mut self, ready: io::Result<()>) {
        if let Err(e) = ready {
            debug!(cause = %e, "write readiness failed");
            self.close();
            return;
        }
        self.touch();

        let Some(binding) = self.binding.as_mut() else {
            self.ctx.disable_tx();
            return;
        };
        let (ctx, io) = (&mut self.ctx, &mut self.io);
        match guarded(|| binding.write(ctx, io)) {
            Ok(WriteStatus::Flushed) => self.ctx.disable_tx(),
            Ok(WriteStatus::Pending) => {}
            Err(e) => {
                self.protocol_failed(&e);
                return;
            }
        }
        self.apply();
    }

    /// Applies items queued by other threads. Returns false when the
    /// outbox was locked by a worker and has to be retried.
    fn on_wakeup(&mut self) -> bool {
        let Some(items) = self.ctx.handle().take_outbox() else {
            trace!("outbox contended");
            return false;
        };
        if items.is_empty() {
            return true;
        }
        trace!(items = items.len(), "wakeup");
        let Some(binding) = self.binding.as_mut() else { return true };
        let ctx = &mut self.ctx;
        match guarded(|| binding.wakeup(ctx, items)) {
            Ok(()) => self.apply(),
            Err(e) => self.protocol_failed(&e),
        }
        true
    }

    fn on_stop(&mut self) {
        self.ctx.set_stopping();
        if self.state != ConnState::Open {
            return;
        }
        debug!("graceful stop");
        let Some(binding) = self.binding.as_mut() else { return };
        let ctx = &mut self.ctx;
        if let Err(e) = guarded(|| {
            binding.stop(ctx);
            Ok(())
        }) {
            self.protocol_failed(&e);
            return;
        }
        self.apply();
    }

    /// Carries out what the last callback asked for.
    fn apply(&mut self) {
        if self.ctx.close_requested() {
            self.close();
            return;
        }
        if let Some(next) = self.ctx.take_transition() {
            self.transition(next);
        }
        if self.ctx.take_shutdown() && self.state == ConnState::Open {
            self.shutdown();
        }
    }

    /// Swaps the bound protocol, handing over input the old one read ahead.
    fn transition(&mut self, next: AnyProtocol) {
        let Some(mut old) = self.binding.take() else { return };
        let leftover = old.take_leftover();
        let ctx = &mut self.ctx;
        if let Err(e) = guarded(|| {
            old.conn_cleanup(ctx);
            Ok(())
        }) {
            self.protocol_failed(&e);
            return;
        }
        debug!(from = old.name(), to = next.name(), leftover = leftover.len(), "protocol transition");
        drop(old);

        let ctx = &mut self.ctx;
        match guarded(|| next.bind(ctx)) {
            Ok(binding) => self.binding = Some(binding),
            Err(e) => {
                self.protocol_failed(&e);
                return;
            }
        }
        self.ready();

        if !leftover.is_empty() && self.state == ConnState::Open {
            let mut data = leftover.to_vec();
            self.dispatch_read(&mut data);
        }
    }

    fn shutdown(&mut self) {
        debug!("half-closing");
        if let Err(e) = self.io.shutdown_write() {
            debug!(cause = %e, "shutdown failed");
            self.close();
            return;
        }
        self.state = ConnState::Shutdown;
        self.ctx.disable_tx();
        self.ctx.enable_rx();
    }

    fn protocol_failed(&mut self, e: &ProtocolError) {
        if e.is_resource_exhaustion() {
            warn!(cause = %e, "closing connection, resource exhausted");
        } else {
            debug!(cause = %e, "closing connection");
        }
        self.close();
    }

    fn close(&mut self) {
        if matches!(self.state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        self.state = ConnState::Closing;
        self.ctx.handle().mark_closing();
        if let Some(mut binding) = self.binding.take() {
            let ctx = &mut self.ctx;
            if let Err(e) = guarded(|| {
                binding.conn_cleanup(ctx);
                Ok(())
            }) {
                warn!(cause = %e, "connection cleanup failed");
            }
        }
        if let Some(hook) = &self.shared.hooks.on_conn_cleanup {
            hook(&self.ctx);
        }
        self.state = ConnState::Closed;
        debug!("connection closed");
    }
}

/// Runs a protocol callback; a panic closes this connection only.
fn guarded<T>(f: impl FnOnce() -> Result<T, ProtocolError>) -> Result<T, ProtocolError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(ProtocolError::callback(panic_message(&*payload).into())))
}

/// Releases the connection's slot in the live count however the task ends.
struct LiveGuard {
    shared: Rc<Shared>,
    handle: ConnHandle,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.handle.mark_closing();
        let live = self.shared.live.get().saturating_sub(1);
        self.shared.live.set(live);
        if live == 0 {
            self.shared.drained.notify_one();
        }
    }
}
