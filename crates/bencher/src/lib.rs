//! Fixtures shared by the benchmarks.

use bytes::BytesMut;
use micro_ws::{Frame, Opcode, WsCodec};
use tokio_util::codec::Encoder;

pub const MASK_KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    file: TestFile,
}

impl TestCase {
    pub const fn new(name: &'static str, file: TestFile) -> Self {
        Self { name, file }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TestFile {
    file_name: &'static str,
    content: &'static str,
}

impl TestFile {
    pub const fn new(file_name: &'static str, content: &'static str) -> Self {
        Self { file_name, content }
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }
}

/// Mixed ASCII and multi-byte text of roughly `len` bytes.
pub fn text_payload(len: usize) -> Vec<u8> {
    "plain ascii, κόσμε, €uro, 𝄞 clef; ".bytes().cycle().take(len).collect()
}

/// `count` masked client frames of `opcode`, each carrying `payload`.
pub fn client_frames(opcode: Opcode, payload: &[u8], count: usize) -> BytesMut {
    let mut codec = WsCodec::client(MASK_KEY);
    let mut out = BytesMut::new();
    for _ in 0..count {
        let frame = Frame::new(true, opcode, payload.to_vec());
        if codec.encode(frame, &mut out).is_err() {
            break;
        }
    }
    out
}
