use bytes::{Buf, BufMut, Bytes, BytesMut};

/// CQL native protocol header size: version + flags + stream id + opcode + length
pub const HEADER_SIZE: usize = 9;
/// Maximum body length accepted before the connection is considered broken (256MB)
pub const MAX_BODY_LENGTH: u32 = 256 * 1024 * 1024;
/// Stream id reserved for server-initiated event frames
pub const EVENT_STREAM_ID: i16 = -1;
/// Direction bit in the version byte; set on responses
pub const RESPONSE_DIRECTION: u8 = 0x80;

/// CQL frame opcodes (native protocol v3/v4)
#[allow(dead_code)]
pub mod opcode {
    pub const ERROR: u8 = 0x00;
    pub const STARTUP: u8 = 0x01;
    pub const READY: u8 = 0x02;
    pub const AUTHENTICATE: u8 = 0x03;
    pub const OPTIONS: u8 = 0x05;
    pub const SUPPORTED: u8 = 0x06;
    pub const QUERY: u8 = 0x07;
    pub const RESULT: u8 = 0x08;
    pub const PREPARE: u8 = 0x09;
    pub const EXECUTE: u8 = 0x0A;
    pub const REGISTER: u8 = 0x0B;
    pub const EVENT: u8 = 0x0C;
    pub const BATCH: u8 = 0x0D;
    pub const AUTH_CHALLENGE: u8 = 0x0E;
    pub const AUTH_RESPONSE: u8 = 0x0F;
    pub const AUTH_SUCCESS: u8 = 0x10;
}

/// RESULT body kinds
pub mod result_kind {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

/// ERROR body codes the proxy distinguishes
pub mod error_code {
    pub const WRITE_TIMEOUT: i32 = 0x1100;
    pub const READ_TIMEOUT: i32 = 0x1200;
    pub const UNPREPARED: i32 = 0x2500;
}

/// CQL frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub stream_id: i16,
    pub opcode: u8,
    pub body_length: u32,
}

impl FrameHeader {
    /// Protocol version without the direction bit
    pub fn protocol_version(&self) -> u8 {
        self.version & !RESPONSE_DIRECTION
    }

    pub fn is_response(&self) -> bool {
        self.version & RESPONSE_DIRECTION != 0
    }
}

/// CQL wire protocol frame; the body is opaque to the proxy unless a
/// routing decision or a post-response side effect needs a peek at it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl RawFrame {
    /// Build a request frame (direction bit cleared)
    pub fn request(version: u8, stream_id: i16, opcode: u8, body: Bytes) -> Self {
        Self::with_version(version & !RESPONSE_DIRECTION, stream_id, opcode, body)
    }

    /// Build a response frame (direction bit set)
    pub fn response(version: u8, stream_id: i16, opcode: u8, body: Bytes) -> Self {
        Self::with_version(version | RESPONSE_DIRECTION, stream_id, opcode, body)
    }

    fn with_version(version: u8, stream_id: i16, opcode: u8, body: Bytes) -> Self {
        Self {
            header: FrameHeader {
                version,
                flags: 0,
                stream_id,
                opcode,
                body_length: body.len() as u32,
            },
            body,
        }
    }

    /// Encode frame to bytes (header + body)
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE + self.body.len());
        dst.put_u8(self.header.version);
        dst.put_u8(self.header.flags);
        dst.put_i16(self.header.stream_id);
        dst.put_u8(self.header.opcode);
        dst.put_u32(self.body.len() as u32);
        dst.extend_from_slice(&self.body);
    }

    /// Try to decode a frame from bytes, returns None if not enough data
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }

        let body_length = u32::from_be_bytes([src[5], src[6], src[7], src[8]]);
        let total_len = HEADER_SIZE + body_length as usize;
        if src.len() < total_len {
            return None;
        }

        let version = src[0];
        let flags = src[1];
        let stream_id = i16::from_be_bytes([src[2], src[3]]);
        let opcode = src[4];

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_length as usize).freeze();

        Some(Self {
            header: FrameHeader {
                version,
                flags,
                stream_id,
                opcode,
                body_length,
            },
            body,
        })
    }
}
