//! Per-request routing: which cluster(s) a client frame is forwarded to.

mod statement;

pub use statement::{classify, StatementKind};

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::PreparedStatementCache;
use crate::protocol::{message, opcode, RawFrame};

/// Routing outcome for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Reads and control requests
    Origin,
    /// Target-only traffic (never produced by inspection today, kept for the
    /// dispatch path's completeness)
    Target,
    /// Writes and keyspace changes
    Both,
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    /// EXECUTE whose prepared id the proxy has never seen; the caller
    /// answers the client directly with a synthesized Unprepared error
    #[error("execute request on stream {stream_id} with unknown prepared id")]
    UnpreparedExecute {
        id: Bytes,
        stream_id: i16,
        version: u8,
    },

    #[error("malformed request body for opcode {opcode:#04x}")]
    MalformedRequest { opcode: u8 },
}

/// Classifies client frames into forward decisions. Holds the shared
/// prepared statement cache (for EXECUTE lookups and PREPARE tracking) and
/// the connection's keyspace as set by USE.
pub struct RequestInspector {
    cache: Arc<PreparedStatementCache>,
    keyspace: Arc<RwLock<Option<String>>>,
}

impl RequestInspector {
    pub fn new(cache: Arc<PreparedStatementCache>, keyspace: Arc<RwLock<Option<String>>>) -> Self {
        Self { cache, keyspace }
    }

    /// Decide where a post-handshake request goes. Reads route to Origin,
    /// writes and USE to both clusters; REGISTER stays on Origin because the
    /// proxy filters events itself. All other opcodes route to Origin.
    pub fn inspect(&self, frame: &RawFrame) -> Result<ForwardDecision, InspectError> {
        let header = &frame.header;
        match header.opcode {
            opcode::QUERY => {
                let query = message::query_string(&frame.body)
                    .ok_or(InspectError::MalformedRequest { opcode: header.opcode })?;
                Ok(self.decide(&query, header.stream_id))
            }
            opcode::PREPARE => {
                let query = message::query_string(&frame.body)
                    .ok_or(InspectError::MalformedRequest { opcode: header.opcode })?;
                // remember the prepare so the eventual Result/Prepared can be
                // bound to its id
                self.cache.note_pending(header.stream_id, frame.clone());
                Ok(self.decide(&query, header.stream_id))
            }
            opcode::EXECUTE => {
                let id = message::execute_prepared_id(&frame.body)
                    .ok_or(InspectError::MalformedRequest { opcode: header.opcode })?;
                match self.cache.lookup(&id) {
                    Some(prepare) => {
                        let query = message::query_string(&prepare.body)
                            .ok_or(InspectError::MalformedRequest { opcode: opcode::PREPARE })?;
                        Ok(self.decide(&query, header.stream_id))
                    }
                    None => Err(InspectError::UnpreparedExecute {
                        id,
                        stream_id: header.stream_id,
                        version: header.protocol_version(),
                    }),
                }
            }
            opcode::BATCH => Ok(ForwardDecision::Both),
            // the proxy filters events itself; only Origin sees client REGISTERs
            opcode::REGISTER => Ok(ForwardDecision::Origin),
            _ => Ok(ForwardDecision::Origin),
        }
    }

    fn decide(&self, query: &str, stream_id: i16) -> ForwardDecision {
        let kind = classify(query);
        let decision = match kind {
            StatementKind::Read => ForwardDecision::Origin,
            StatementKind::Write | StatementKind::UseKeyspace => ForwardDecision::Both,
        };
        debug!(
            stream_id,
            ?kind,
            ?decision,
            keyspace = self.keyspace.read().as_deref(),
            "classified request"
        );
        decision
    }
}
