//! Process-wide prepared statement cache.
//!
//! A PREPARE passing through the proxy is noted under its stream id until the
//! matching RESULT/Prepared flows back, at which point the entry is re-keyed
//! by the prepared id the cluster assigned. EXECUTE requests look the id up
//! to recover the originating prepare; a miss means the statement was never
//! prepared through this proxy or was evicted, and the caller answers the
//! client with a synthesized `Unprepared` error.

use bytes::Bytes;
use dashmap::DashMap;
use moka::sync::Cache;
use tracing::debug;

use crate::protocol::RawFrame;

/// Default bound on cached prepared statements
pub const DEFAULT_MAX_ENTRIES: u64 = 5000;

/// Shared cache mapping prepared ids to their originating PREPARE request.
/// Bounded with LRU-style eviction; eviction is correctness-safe because a
/// missing id only ever produces an `Unprepared` error the driver recovers
/// from by re-preparing.
pub struct PreparedStatementCache {
    /// In-flight prepares keyed by stream id, at most one per stream
    pending: DashMap<i16, RawFrame>,
    /// Completed prepares keyed by the prepared id from the cluster response
    prepared: Cache<Bytes, RawFrame>,
}

impl PreparedStatementCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            pending: DashMap::new(),
            prepared: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    /// Note a PREPARE request in flight on the given stream. A second prepare
    /// on the same stream replaces the first; the client protocol guarantees
    /// at most one outstanding request per stream id.
    pub fn note_pending(&self, stream_id: i16, prepare: RawFrame) {
        self.pending.insert(stream_id, prepare);
    }

    /// Bind the prepared id from a RESULT/Prepared response to the pending
    /// prepare on its stream. Idempotent for a given id; a bind with no
    /// pending prepare is ignored.
    pub fn bind(&self, stream_id: i16, id: Bytes) {
        match self.pending.remove(&stream_id) {
            Some((_, prepare)) => {
                self.prepared.insert(id, prepare);
            }
            None => {
                debug!(stream_id, "prepared result with no pending prepare");
            }
        }
    }

    /// Originating PREPARE request for a prepared id, if the proxy saw it
    pub fn lookup(&self, id: &[u8]) -> Option<RawFrame> {
        self.prepared.get(id)
    }

    #[cfg(test)]
    fn entry_count(&self) -> u64 {
        self.prepared.run_pending_tasks();
        self.prepared.entry_count()
    }
}
