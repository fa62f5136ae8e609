//! Advisory views into CQL frame bodies.
//!
//! The proxy forwards bodies untouched; these helpers decode only the handful
//! of fields a routing decision or a post-response side effect depends on,
//! and encode the few messages the proxy originates itself (the SASL PLAIN
//! answer for the target handshake, the event REGISTER, and the synthesized
//! `Unprepared` error).

use std::fmt::Write as _;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::frame::{error_code, result_kind};

/// Server event kinds carried in EVENT frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::TopologyChange,
        EventKind::StatusChange,
        EventKind::SchemaChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TopologyChange => "TOPOLOGY_CHANGE",
            EventKind::StatusChange => "STATUS_CHANGE",
            EventKind::SchemaChange => "SCHEMA_CHANGE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "TOPOLOGY_CHANGE" => Some(EventKind::TopologyChange),
            "STATUS_CHANGE" => Some(EventKind::StatusChange),
            "SCHEMA_CHANGE" => Some(EventKind::SchemaChange),
            _ => None,
        }
    }
}

/// Read a `[string]` (u16 length + utf8 bytes)
fn get_string(buf: &mut &[u8]) -> Option<String> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return None;
    }
    let s = String::from_utf8(buf[..len].to_vec()).ok()?;
    buf.advance(len);
    Some(s)
}

/// Read a `[long string]` (i32 length + utf8 bytes)
fn get_long_string(buf: &mut &[u8]) -> Option<String> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_i32();
    if len < 0 || buf.remaining() < len as usize {
        return None;
    }
    let s = String::from_utf8(buf[..len as usize].to_vec()).ok()?;
    buf.advance(len as usize);
    Some(s)
}

/// Read a `[short bytes]` (u16 length + bytes)
fn get_short_bytes(buf: &mut &[u8]) -> Option<Bytes> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return None;
    }
    let b = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Some(b)
}

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u16(s.len() as u16);
    dst.extend_from_slice(s.as_bytes());
}

/// RESULT body kind, the leading i32
pub fn result_body_kind(body: &[u8]) -> Option<i32> {
    let mut buf = body;
    if buf.remaining() < 4 {
        return None;
    }
    Some(buf.get_i32())
}

/// Prepared statement id from a RESULT/Prepared body
pub fn prepared_id(body: &[u8]) -> Option<Bytes> {
    let mut buf = body;
    if buf.remaining() < 4 || buf.get_i32() != result_kind::PREPARED {
        return None;
    }
    get_short_bytes(&mut buf)
}

/// Keyspace name from a RESULT/SetKeyspace body
pub fn set_keyspace(body: &[u8]) -> Option<String> {
    let mut buf = body;
    if buf.remaining() < 4 || buf.get_i32() != result_kind::SET_KEYSPACE {
        return None;
    }
    get_string(&mut buf)
}

/// Error code from an ERROR body
pub fn error_body_code(body: &[u8]) -> Option<i32> {
    let mut buf = body;
    if buf.remaining() < 4 {
        return None;
    }
    Some(buf.get_i32())
}

/// Error message from an ERROR body
pub fn error_body_message(body: &[u8]) -> Option<String> {
    let mut buf = body;
    if buf.remaining() < 4 {
        return None;
    }
    buf.advance(4);
    get_string(&mut buf)
}

/// Prepared statement id from an EXECUTE request body
pub fn execute_prepared_id(body: &[u8]) -> Option<Bytes> {
    let mut buf = body;
    get_short_bytes(&mut buf)
}

/// Query text from a QUERY or PREPARE request body
pub fn query_string(body: &[u8]) -> Option<String> {
    let mut buf = body;
    get_long_string(&mut buf)
}

/// Event kind from an EVENT body
pub fn event_kind(body: &[u8]) -> Option<EventKind> {
    let mut buf = body;
    let kind = get_string(&mut buf)?;
    EventKind::parse(&kind)
}

/// SASL PLAIN token for an AUTH_RESPONSE body: `[bytes]` of `\0user\0password`
pub fn auth_response_body(username: &str, password: &str) -> Bytes {
    let token_len = 2 + username.len() + password.len();
    let mut dst = BytesMut::with_capacity(4 + token_len);
    dst.put_i32(token_len as i32);
    dst.put_u8(0);
    dst.extend_from_slice(username.as_bytes());
    dst.put_u8(0);
    dst.extend_from_slice(password.as_bytes());
    dst.freeze()
}

/// REGISTER body: `[string list]` of event type names
pub fn register_body(kinds: &[EventKind]) -> Bytes {
    let mut dst = BytesMut::new();
    dst.put_u16(kinds.len() as u16);
    for kind in kinds {
        put_string(&mut dst, kind.as_str());
    }
    dst.freeze()
}

/// ERROR/Unprepared body carrying the missing prepared statement id
pub fn unprepared_body(id: &[u8]) -> Bytes {
    let message = format!(
        "Prepared query with ID {} not found (the statement was never prepared \
         through this proxy, or it was evicted from the prepared statement cache)",
        hex(id)
    );
    let mut dst = BytesMut::with_capacity(4 + 2 + message.len() + 2 + id.len());
    dst.put_i32(error_code::UNPREPARED);
    put_string(&mut dst, &message);
    dst.put_u16(id.len() as u16);
    dst.extend_from_slice(id);
    dst.freeze()
}

pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
