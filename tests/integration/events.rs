//! Event de-duplication between the two clusters

use std::time::Duration;

use janus::protocol::{message, opcode, EventKind, EVENT_STREAM_ID};

use crate::support::*;

const GRACE: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_schema_change_forwarded_from_origin_only() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;
    proxy.handshake().await;

    origin.inject(event("SCHEMA_CHANGE")).await;
    let frame = proxy.recv().await;
    assert_eq!(frame.header.opcode, opcode::EVENT);
    assert_eq!(frame.header.stream_id, EVENT_STREAM_ID);
    assert_eq!(
        message::event_kind(&frame.body),
        Some(EventKind::SchemaChange)
    );

    // target's schema changes are expected echoes of the migration
    target.inject(event("SCHEMA_CHANGE")).await;
    proxy.expect_no_frame(GRACE).await;
}

#[tokio::test]
async fn test_status_and_topology_forwarded_from_target_only() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;
    proxy.handshake().await;

    target.inject(event("STATUS_CHANGE")).await;
    let frame = proxy.recv().await;
    assert_eq!(
        message::event_kind(&frame.body),
        Some(EventKind::StatusChange)
    );

    target.inject(event("TOPOLOGY_CHANGE")).await;
    let frame = proxy.recv().await;
    assert_eq!(
        message::event_kind(&frame.body),
        Some(EventKind::TopologyChange)
    );

    origin.inject(event("STATUS_CHANGE")).await;
    origin.inject(event("TOPOLOGY_CHANGE")).await;
    proxy.expect_no_frame(GRACE).await;
}

#[tokio::test]
async fn test_unknown_event_kinds_are_dropped() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;
    proxy.handshake().await;

    target.inject(event("FUTURE_EVENT")).await;
    proxy.expect_no_frame(GRACE).await;
}
