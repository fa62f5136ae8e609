pub mod codec;
pub mod frame;
pub mod message;

pub use codec::FrameCodec;
pub use frame::{error_code, opcode, result_kind, FrameHeader, RawFrame, EVENT_STREAM_ID};
pub use message::EventKind;
