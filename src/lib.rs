//! Janus is a dual-write CQL proxy for migrating traffic between two
//! Cassandra-compatible clusters without client-side changes.
//!
//! For every client connection the proxy opens one connection to the Origin
//! cluster and one to the Target cluster. Reads are served by Origin, writes
//! go to both clusters concurrently, and the two responses are aggregated
//! into the single frame the client sees. Server events from both clusters
//! are filtered so the client receives schema changes from Origin and
//! status/topology changes from Target only.
//!
//! Module overview:
//!
//! - [`protocol`]: CQL frame types, framing codec, and the advisory body views
//! - [`proxy`]: the per-connection core (client/cluster connections, handler)
//! - [`router`]: request inspection and forward decisions
//! - [`cache`]: the process-wide prepared statement cache
//! - [`config`]: TOML configuration with environment overrides
//! - [`metrics`]: Prometheus metrics and the scrape endpoint

pub mod cache;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod proxy;
pub mod router;
