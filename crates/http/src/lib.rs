//! HTTP/1.x wire codec for the micro server.
//!
//! The crate turns bytes into request heads and bodies and response heads
//! into bytes; it performs no I/O and knows nothing about connections. The
//! server's HTTP protocol drives it from its receive path and assembles
//! responses as buffer chains around the encoded head.
//!
//! - [`codec`]: [`codec::RequestDecoder`], [`codec::HeaderEncoder`] and
//!   chunk framing helpers
//! - [`protocol`]: request/response head types and errors
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
