//! HTTP/1.x wire codec.
//!
//! - [`RequestDecoder`]: request heads plus length or chunked bodies
//! - [`HeaderEncoder`]: response heads with framing headers
//! - [`chunk_prefix`], [`CHUNK_SUFFIX`], [`LAST_CHUNK`]: chunked response
//!   framing around caller owned body buffers

mod body;
mod header;
mod request_decoder;

pub use body::{CHUNK_SUFFIX, ChunkedDecoder, LAST_CHUNK, PayloadDecoder, chunk_prefix};
pub use header::{HeaderDecoder, HeaderEncoder};
pub use request_decoder::{DEFAULT_MAX_BODY_SIZE, RequestDecoder};
