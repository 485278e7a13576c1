use crate::bucket::BucketChain;
use crate::connection::{ConnHandle, Deferred};
use crate::error::SessionSendError;
use crate::utils::ensure;
use bytes::Bytes;
use micro_ws::{FrameFlags, FrameHeader, Opcode, close};
use std::any::Any;
use std::fmt;
use uuid::Uuid;

const MAX_CONTROL_PAYLOAD: usize = 125;

/// Close handshake progress of a session.
///
/// ```text
/// CONNECTED -> CLOSE_RECEIVED   peer closed first, we echoed
/// CONNECTED -> EXPECT_CLOSE     we closed first, waiting for the echo
///           -> CLOSED
/// any       -> ERROR            protocol violation or callback failure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Connected,
    CloseReceived,
    ExpectClose,
    Closed,
    Error,
}

/// The application's view of one WebSocket connection.
///
/// Frames queued here are sent once the current callback returns.
pub struct WsSession {
    handle: ConnHandle,
    state: WsState,
    pub(crate) out: BucketChain,
    pub(crate) shutdown_after_flush: bool,
    data: Option<Box<dyn Any>>,
}

impl fmt::Debug for WsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSession")
            .field("id", &self.handle.id())
            .field("state", &self.state)
            .field("queued", &self.out.total_length())
            .finish_non_exhaustive()
    }
}

impl WsSession {
    pub(crate) fn new(handle: ConnHandle) -> Self {
        Self { handle, state: WsState::Connected, out: BucketChain::new(), shutdown_after_flush: false, data: None }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: WsState) {
        self.state = state;
    }

    /// Bytes queued and not yet written.
    pub fn queued(&self) -> usize {
        self.out.total_length()
    }

    fn check_sendable(&self) -> Result<(), SessionSendError> {
        match self.state {
            WsState::Connected => Ok(()),
            WsState::CloseReceived | WsState::ExpectClose => Err(SessionSendError::NotAvailable),
            WsState::Closed => Err(SessionSendError::Closed),
            WsState::Error => Err(SessionSendError::Aborted),
        }
    }

    /// Queues a single unfragmented frame.
    ///
    /// # Errors
    ///
    /// See [`WsSession::send_frame`].
    pub fn send(&mut self, opcode: Opcode, payload: impl Into<Bytes>) -> Result<(), SessionSendError> {
        self.send_frame(FrameFlags::new(true, opcode), payload.into())
    }

    /// Queues one frame with explicit flags, for sending fragmented
    /// messages.
    ///
    /// # Errors
    ///
    /// Refused by state: [`SessionSendError::NotAvailable`] during a close
    /// handshake, [`SessionSendError::Closed`] after it and
    /// [`SessionSendError::Aborted`] after an error. CLOSE must go through
    /// [`WsSession::close`]; control frames must have FIN set and at most
    /// 125 bytes of payload.
    pub fn send_frame(&mut self, flags: FrameFlags, payload: Bytes) -> Result<(), SessionSendError> {
        self.check_sendable()?;
        let opcode = flags.opcode().ok_or(SessionSendError::InvalidOpcode)?;
        ensure!(opcode != Opcode::Close && flags.reserved() == 0, SessionSendError::InvalidOpcode);
        if opcode.is_control() {
            ensure!(flags.fin(), SessionSendError::InvalidOpcode);
            ensure!(payload.len() <= MAX_CONTROL_PAYLOAD, SessionSendError::ControlTooLong);
        }
        self.queue_frame(flags, payload);
        Ok(())
    }

    /// Starts the close handshake: queues CLOSE with `code` and waits for
    /// the peer's CLOSE.
    ///
    /// # Errors
    ///
    /// Refused by state like [`WsSession::send_frame`].
    pub fn close(&mut self, code: u16) -> Result<(), SessionSendError> {
        self.check_sendable()?;
        self.queue_close(code);
        self.state = WsState::ExpectClose;
        Ok(())
    }

    /// A `Send` handle for replying from other threads.
    pub fn sender(&self) -> WsSender {
        WsSender { handle: self.handle.clone() }
    }

    /// Attaches application data, replacing what was there.
    pub fn set_data<T: Any>(&mut self, data: T) {
        self.data = Some(Box::new(data));
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref()
    }

    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.as_mut()?.downcast_mut()
    }

    pub(crate) fn queue_frame(&mut self, flags: FrameFlags, payload: Bytes) {
        self.out.push(FrameHeader::server(flags, payload.len()).to_bytes());
        if !payload.is_empty() {
            self.out.push(payload);
        }
    }

    pub(crate) fn queue_close(&mut self, code: u16) {
        self.queue_frame(FrameFlags::new(true, Opcode::Close), Bytes::from(close::close_payload(code, b"")));
    }
}

/// Sends on a session from any thread.
///
/// Frames are handed to the reactor and queued there; state checks happen
/// when they are applied, so a frame posted while the session starts
/// closing is dropped.
#[derive(Debug, Clone)]
pub struct WsSender {
    handle: ConnHandle,
}

impl WsSender {
    /// # Errors
    ///
    /// [`SessionSendError::Closed`] once the connection is closing.
    pub fn send(&self, opcode: Opcode, payload: impl Into<Bytes>) -> Result<(), SessionSendError> {
        self.send_frame(FrameFlags::new(true, opcode), payload.into())
    }

    /// # Errors
    ///
    /// [`SessionSendError::Closed`] once the connection is closing.
    pub fn send_frame(&self, flags: FrameFlags, payload: Bytes) -> Result<(), SessionSendError> {
        self.handle.post(Deferred::WsSend { flags, payload })?;
        Ok(())
    }

    /// # Errors
    ///
    /// [`SessionSendError::Closed`] once the connection is closing.
    pub fn close(&self, code: u16) -> Result<(), SessionSendError> {
        self.handle.post(Deferred::WsClose { code })?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> WsSession {
        WsSession::new(ConnHandle::new(Uuid::now_v7()))
    }

    #[test]
    fn send_is_refused_by_state() {
        let mut s = session();
        s.send(Opcode::Text, "ok").unwrap();

        for (state, err) in [
            (WsState::CloseReceived, SessionSendError::NotAvailable),
            (WsState::ExpectClose, SessionSendError::NotAvailable),
            (WsState::Closed, SessionSendError::Closed),
            (WsState::Error, SessionSendError::Aborted),
        ] {
            s.set_state(state);
            assert_eq!(s.send(Opcode::Text, "late").unwrap_err(), err);
            assert_eq!(s.close(1000).unwrap_err(), err);
        }
    }

    #[test]
    fn invalid_frames_are_refused() {
        let mut s = session();
        assert_eq!(s.send(Opcode::Close, "").unwrap_err(), SessionSendError::InvalidOpcode);
        assert_eq!(
            s.send_frame(FrameFlags::new(false, Opcode::Ping), Bytes::new()).unwrap_err(),
            SessionSendError::InvalidOpcode
        );
        assert_eq!(s.send(Opcode::Ping, vec![0u8; 126]).unwrap_err(), SessionSendError::ControlTooLong);
        assert_eq!(s.send_frame(FrameFlags::from_bits(0x83), Bytes::new()).unwrap_err(), SessionSendError::InvalidOpcode);
        assert_eq!(s.send_frame(FrameFlags::from_bits(0xC1), Bytes::new()).unwrap_err(), SessionSendError::InvalidOpcode);
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn frames_are_queued_unmasked() {
        let mut s = session();
        s.send(Opcode::Text, "hi").unwrap();
        s.send(Opcode::Binary, Bytes::new()).unwrap();
        assert_eq!(s.out.to_vec(), [0x81, 0x02, b'h', b'i', 0x82, 0x00]);
    }

    #[test]
    fn close_enters_expect_close() {
        let mut s = session();
        s.close(close::GOING_AWAY).unwrap();
        assert_eq!(s.state(), WsState::ExpectClose);
        assert_eq!(s.out.to_vec(), [0x88, 0x02, 0x03, 0xe9]);
    }

    #[test]
    fn user_data_round_trip() {
        let mut s = session();
        assert!(s.data::<u32>().is_none());
        s.set_data(7u32);
        *s.data_mut::<u32>().unwrap() += 1;
        assert_eq!(s.data::<u32>(), Some(&8));
        assert!(s.data::<String>().is_none());
    }

    #[test]
    fn sender_posts_to_the_connection() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let s = WsSession::new(handle.clone());
        let sender = s.sender();
        std::thread::spawn(move || {
            sender.send(Opcode::Text, "from worker").unwrap();
            sender.close(1000).unwrap();
        })
        .join()
        .unwrap();

        let items = handle.take_outbox().unwrap();
        assert!(matches!(items[0], Deferred::WsSend { ref payload, .. } if payload == "from worker"));
        assert!(matches!(items[1], Deferred::WsClose { code: 1000 }));

        handle.mark_closing();
        assert!(s.sender().is_closed());
        assert_eq!(s.sender().send(Opcode::Text, "gone").unwrap_err(), SessionSendError::Closed);
    }
}
