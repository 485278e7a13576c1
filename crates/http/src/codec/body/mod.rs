//! Request body decoding and response chunk framing.
//!
//! - [`PayloadDecoder`]: dispatches to the length or chunked decoder
//! - [`chunk_prefix`], [`CHUNK_SUFFIX`], [`LAST_CHUNK`]: framing for
//!   chunked responses

mod chunked;
mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use chunked::{CHUNK_SUFFIX, LAST_CHUNK, chunk_prefix};
pub use chunked_decoder::ChunkedDecoder;
pub use payload_decoder::PayloadDecoder;
