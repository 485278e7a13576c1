mod codec;
mod header;
mod parser;

pub use codec::{Frame, Role, WsCodec};
pub use header::{FrameHeader, header_len};
pub use parser::{DEFAULT_MAX_FRAME_SIZE, FrameParser, ParseState};
