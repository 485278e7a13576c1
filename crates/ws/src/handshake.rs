//! Opening handshake key derivation,
//! [RFC 6455 Section 4.2.2](https://www.rfc-editor.org/rfc/rfc6455#section-4.2.2).

use base64::Engine;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Computes `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
///
/// The key is used as the opaque string it is; it is not decoded or
/// validated here.
pub fn accept_key(key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
