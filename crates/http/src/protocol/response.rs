//! HTTP response header handling.
//!
//! A response head is `http::Response<()>`: status, version and headers, with
//! the body supplied separately as a chain of buffers.

use http::{Response, StatusCode};

/// Type alias for HTTP response headers.
pub type ResponseHead = Response<()>;

/// Whether a response with this status may carry a body.
///
/// Informational responses, `204 No Content` and `304 Not Modified` never
/// do, so no framing headers are written for them.
pub fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}
