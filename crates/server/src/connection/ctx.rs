use crate::connection::ConnHandle;
use crate::protocol::AnyProtocol;
use uuid::Uuid;

/// What a protocol callback may ask of its connection.
///
/// Requests are recorded and carried out by the connection once the
/// callback returns; nothing here performs I/O.
#[derive(Debug)]
pub struct ConnCtx {
    handle: ConnHandle,
    max_iovec: usize,
    rx: bool,
    tx: bool,
    shutdown: bool,
    close: bool,
    stopping: bool,
    transition: Option<AnyProtocol>,
}

impl ConnCtx {
    pub(crate) fn new(handle: ConnHandle, max_iovec: usize) -> Self {
        Self { handle, max_iovec, rx: true, tx: false, shutdown: false, close: false, stopping: false, transition: None }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new(ConnHandle::new(Uuid::now_v7()), 64)
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// A handle other threads can use to reach this connection.
    pub fn handle(&self) -> &ConnHandle {
        &self.handle
    }

    /// Upper bound on buckets per vectored send.
    pub fn max_iovec(&self) -> usize {
        self.max_iovec
    }

    pub fn enable_rx(&mut self) {
        self.rx = true;
    }

    pub fn disable_rx(&mut self) {
        self.rx = false;
    }

    pub fn enable_tx(&mut self) {
        self.tx = true;
    }

    pub fn disable_tx(&mut self) {
        self.tx = false;
    }

    pub fn rx_enabled(&self) -> bool {
        self.rx
    }

    pub fn tx_enabled(&self) -> bool {
        self.tx
    }

    /// Half-closes the connection. Input is still read and discarded until
    /// the peer closes its side.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Closes the connection right away.
    pub fn close(&mut self) {
        self.close = true;
    }

    /// Rebinds the connection to `next` once the callback returns.
    pub fn transition(&mut self, next: AnyProtocol) {
        self.transition = Some(next);
    }

    /// True once the server started a graceful stop.
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn close_requested(&self) -> bool {
        self.close
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    pub(crate) fn has_transition(&self) -> bool {
        self.transition.is_some()
    }

    pub(crate) fn take_transition(&mut self) -> Option<AnyProtocol> {
        self.transition.take()
    }

    pub(crate) fn take_shutdown(&mut self) -> bool {
        std::mem::take(&mut self.shutdown)
    }

    pub(crate) fn set_stopping(&mut self) {
        self.stopping = true;
    }
}
