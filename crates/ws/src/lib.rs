//! RFC 6455 wire codec for the micro server.
//!
//! This crate only deals with bytes: it has no sockets and no session
//! state. It provides
//!
//! - [`FrameParser`]: an incremental parser that accepts input split at any
//!   byte boundary, unmasks payloads and validates TEXT messages as UTF-8
//!   across fragments
//! - [`FrameHeader`]: the outbound header encoder
//! - [`Mask`] / [`apply_mask`]: payload (un)masking with a word aligned
//!   fast path
//! - [`Utf8Validator`]: the incremental validator used by the parser
//! - [`close`]: close status codes and their validation
//! - [`handshake::accept_key`]: `Sec-WebSocket-Accept` derivation
//! - [`WsCodec`]: a `tokio_util` codec built from the above, for stream
//!   based peers

pub mod close;
mod error;
mod flags;
mod frame;
pub mod handshake;
mod mask;
mod opcode;
mod utf8;
mod utils;

pub use error::WsError;
pub use flags::{FLAG_FIN, FLAG_MASKED, FLAG_RSV1, FLAG_RSV2, FLAG_RSV3, FrameFlags, MASK_LEN, MASK_OPCODE, MASK_RESERVED};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, Frame, FrameHeader, FrameParser, ParseState, Role, WsCodec, header_len};
pub use mask::{Mask, apply_mask};
pub use opcode::Opcode;
pub use utf8::{Utf8Validator, validate as validate_utf8};

/// Initial capacity of a parser's payload scratch buffer.
pub const WS_FRAME_MIN: usize = 256;
