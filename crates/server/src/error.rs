use micro_http::protocol::{HttpError, ParseError, SendError};
use micro_ws::WsError;
use std::error::Error;
use std::io;
use thiserror::Error;

/// What application callbacks return on failure.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Failures that end a single connection.
///
/// A protocol's `read` or `write` returning one of these makes the
/// connection close; other connections are never affected.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("http error: {source}")]
    Http {
        #[from]
        source: HttpError,
    },

    #[error("websocket error: {source}")]
    Ws {
        #[from]
        source: WsError,
    },

    #[error("mqtt error: {source}")]
    Mqtt {
        #[from]
        source: MqttError,
    },

    #[error("callback failed: {source}")]
    Callback { source: HandlerError },

    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },
}

impl ProtocolError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn callback(source: HandlerError) -> Self {
        Self::Callback { source }
    }

    pub fn resource_exhausted<S: ToString>(str: S) -> Self {
        Self::ResourceExhausted { reason: str.to_string() }
    }

    /// True when a size limit was hit rather than input being malformed.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Self::ResourceExhausted { .. } => true,
            Self::Ws { source } => source.is_resource_exhaustion(),
            Self::Mqtt { source } => matches!(source, MqttError::TooLarge { .. }),
            Self::Http { source: HttpError::RequestError { source: ParseError::TooLargeBody { .. } } } => true,
            _ => false,
        }
    }
}

impl From<ParseError> for ProtocolError {
    fn from(e: ParseError) -> Self {
        Self::Http { source: e.into() }
    }
}

impl From<SendError> for ProtocolError {
    fn from(e: SendError) -> Self {
        Self::Http { source: e.into() }
    }
}

/// Malformed MQTT input.
#[derive(Error, Debug)]
pub enum MqttError {
    #[error("remaining length uses more than 4 bytes")]
    MalformedLength,

    #[error("packet of {size} bytes exceed the limit {max_size}")]
    TooLarge { size: usize, max_size: usize },

    #[error("unsupported protocol {name:?} level {level}")]
    UnsupportedProtocol { name: String, level: u8 },

    #[error("malformed packet: {reason}")]
    Malformed { reason: String },

    #[error("packet type {packet_type} before CONNECT")]
    NotConnected { packet_type: u8 },
}

impl MqttError {
    pub fn too_large(size: usize, max_size: usize) -> Self {
        Self::TooLarge { size, max_size }
    }

    pub fn unsupported_protocol(name: &[u8], level: u8) -> Self {
        Self::UnsupportedProtocol { name: String::from_utf8_lossy(name).into_owned(), level }
    }

    pub fn malformed<S: ToString>(str: S) -> Self {
        Self::Malformed { reason: str.to_string() }
    }
}

/// Startup failures: the only errors that stop the process.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("operation not allowed in server state {state}")]
    InvalidState { state: &'static str },

    #[error("failed to initialize {component}: {reason}")]
    Runtime { component: &'static str, reason: String },
}

impl ServerError {
    pub fn bind<S: ToString>(address: S, source: io::Error) -> Self {
        Self::Bind { address: address.to_string(), source }
    }

    pub fn invalid_config<S: ToString>(str: S) -> Self {
        Self::InvalidConfig { reason: str.to_string() }
    }

    pub fn runtime<S: ToString>(component: &'static str, str: S) -> Self {
        Self::Runtime { component, reason: str.to_string() }
    }
}

/// Why a frame or response could not be queued on a session.
///
/// Each variant corresponds to an [`io::ErrorKind`] so callers bridging to
/// io based code can convert with `io::Error::from`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSendError {
    /// a close handshake is in progress
    #[error("session is closing")]
    NotAvailable,

    #[error("session is closed")]
    Closed,

    #[error("session aborted after an error")]
    Aborted,

    /// the connection lock stayed contended, try again later
    #[error("connection is busy")]
    Busy,

    #[error("opcode can't be sent through this call")]
    InvalidOpcode,

    #[error("control frame payload exceeds 125 bytes")]
    ControlTooLong,
}

impl SessionSendError {
    pub fn kind(self) -> io::ErrorKind {
        match self {
            Self::NotAvailable => io::ErrorKind::AddrNotAvailable,
            Self::Closed => io::ErrorKind::BrokenPipe,
            Self::Aborted => io::ErrorKind::ConnectionAborted,
            Self::Busy => io::ErrorKind::WouldBlock,
            Self::InvalidOpcode | Self::ControlTooLong => io::ErrorKind::InvalidInput,
        }
    }
}

impl From<SessionSendError> for io::Error {
    fn from(e: SessionSendError) -> Self {
        io::Error::new(e.kind(), e)
    }
}

impl From<TryLockError> for SessionSendError {
    fn from(e: TryLockError) -> Self {
        match e {
            TryLockError::WouldBlock => Self::Busy,
            TryLockError::Gone => Self::Closed,
        }
    }
}

/// Failure to take a connection's lock from outside the reactor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    /// another thread holds the lock right now
    #[error("connection lock is contended")]
    WouldBlock,

    /// the reactor is tearing the connection down, don't touch it
    #[error("connection is closing")]
    Gone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_errors_map_to_io_kinds() {
        assert_eq!(io::Error::from(SessionSendError::NotAvailable).kind(), io::ErrorKind::AddrNotAvailable);
        assert_eq!(io::Error::from(SessionSendError::Closed).kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(io::Error::from(SessionSendError::Aborted).kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(io::Error::from(SessionSendError::InvalidOpcode).kind(), io::ErrorKind::InvalidInput);
        assert_eq!(io::Error::from(SessionSendError::Busy).kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn lock_failures_keep_their_meaning() {
        assert_eq!(SessionSendError::from(TryLockError::WouldBlock), SessionSendError::Busy);
        assert_eq!(SessionSendError::from(TryLockError::Gone), SessionSendError::Closed);
    }

    #[test]
    fn exhaustion_is_reported_per_source() {
        assert!(ProtocolError::resource_exhausted("recv buffer").is_resource_exhaustion());
        assert!(ProtocolError::from(WsError::message_too_large(5000, 4096)).is_resource_exhaustion());
        assert!(ProtocolError::from(ParseError::too_large_body(10, 5)).is_resource_exhaustion());
        assert!(ProtocolError::from(MqttError::too_large(10, 5)).is_resource_exhaustion());

        assert!(!ProtocolError::from(WsError::InvalidUtf8).is_resource_exhaustion());
        assert!(!ProtocolError::from(ParseError::InvalidMethod).is_resource_exhaustion());
        assert!(!ProtocolError::callback("boom".into()).is_resource_exhaustion());
    }
}
