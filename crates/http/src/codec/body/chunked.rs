//! Chunked transfer coding on the sending side.
//!
//! Responses are written as buffer chains, so instead of an encoder that
//! copies every body piece into one buffer this module only produces the
//! framing around each piece: a size line before it and CRLF after it.

use bytes::Bytes;
use std::fmt::Write;

/// Terminates a chunk's data.
pub const CHUNK_SUFFIX: &[u8] = b"\r\n";

/// The zero sized last chunk with an empty trailer.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// The size line preceding a chunk of `len` bytes, in uppercase hex.
pub fn chunk_prefix(len: usize) -> Bytes {
    let mut line = String::with_capacity(18);
    // writing into a String can't fail
    let _ = write!(line, "{len:X}\r\n");
    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_hex() {
        assert_eq!(&chunk_prefix(5)[..], b"5\r\n");
        assert_eq!(&chunk_prefix(255)[..], b"FF\r\n");
        assert_eq!(&chunk_prefix(4096)[..], b"1000\r\n");
    }

    #[test]
    fn framed_pieces_decode() {
        use crate::codec::body::ChunkedDecoder;
        use crate::protocol::PayloadItem;
        use bytes::BytesMut;
        use tokio_util::codec::Decoder;

        let mut wire = BytesMut::new();
        for piece in [&b"hello "[..], &b"world"[..]] {
            wire.extend_from_slice(&chunk_prefix(piece.len()));
            wire.extend_from_slice(piece);
            wire.extend_from_slice(CHUNK_SUFFIX);
        }
        wire.extend_from_slice(LAST_CHUNK);

        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        loop {
            match decoder.decode(&mut wire).unwrap().unwrap() {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => break,
            }
        }
        assert_eq!(body, b"hello world");
    }
}
