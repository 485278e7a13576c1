use crate::error::HandlerError;
use crate::ws::WsSession;
use bytes::Bytes;
use micro_ws::FrameFlags;

/// Application callbacks of a WebSocket server.
///
/// All callbacks run on the reactor thread and must not block. Work that
/// takes longer belongs on another thread, replying through
/// [`WsSession::sender`].
pub trait WsHandler {
    /// The connection is ready, right after the handshake.
    ///
    /// # Errors
    ///
    /// The session is closed with status 1011.
    fn on_connect(&self, _session: &mut WsSession) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A data frame arrived, or a whole message in buffered mode.
    ///
    /// `flags` are those of the frame that carried `payload`: a fragment of
    /// an unbuffered message has FIN clear and, after the first, the
    /// CONTINUATION opcode. In buffered mode FIN is set and the opcode is
    /// the message's TEXT or BINARY.
    ///
    /// # Errors
    ///
    /// The session is closed with status 1011.
    fn on_message(&self, session: &mut WsSession, flags: FrameFlags, payload: &[u8]) -> Result<(), HandlerError>;

    /// The peer's CLOSE frame was processed; `code` is its status.
    fn on_close(&self, _session: &mut WsSession, _code: u16) {}
}

/// Sends every frame back the way it came.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl WsHandler for EchoHandler {
    fn on_message(&self, session: &mut WsSession, flags: FrameFlags, payload: &[u8]) -> Result<(), HandlerError> {
        session.send_frame(flags, Bytes::copy_from_slice(payload))?;
        Ok(())
    }
}
