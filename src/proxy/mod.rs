//! The per-client-connection core: one client connection, one connection to
//! each upstream cluster, and the handler that coordinates them.

mod client;
mod cluster;
mod handler;

pub use client::ClientConnection;
pub use cluster::{Cluster, ClusterConnection};
pub use handler::{ClientHandler, HandlerError};

/// Client frames waiting for the request loop
pub(crate) const REQUEST_CHANNEL_CAPACITY: usize = 64;
/// Responses waiting for the client writer
pub(crate) const RESPONSE_CHANNEL_CAPACITY: usize = 64;
/// Frames waiting for a cluster writer
pub(crate) const WRITE_CHANNEL_CAPACITY: usize = 64;
/// Server events waiting for the merger; events are advisory and drop on overflow
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 16;
