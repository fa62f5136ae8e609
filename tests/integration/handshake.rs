//! Handshake gating across the two clusters

use std::time::Duration;

use janus::protocol::opcode;

use crate::support::*;

#[tokio::test]
async fn test_clean_handshake() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;

    proxy.send(startup(0)).await;
    let response = proxy.recv().await;

    assert_eq!(response.header.opcode, opcode::READY);
    assert_eq!(response.header.stream_id, 0);

    // both clusters saw the startup; target was also auto-registered for events
    assert_eq!(origin.received_opcodes(), vec![opcode::STARTUP]);
    assert_eq!(
        target.received_opcodes(),
        vec![opcode::STARTUP, opcode::REGISTER]
    );
}

#[tokio::test]
async fn test_authenticated_handshake() {
    let origin = spawn_cluster(|frame| {
        let stream_id = frame.header.stream_id;
        match frame.header.opcode {
            opcode::STARTUP => Some(authenticate(stream_id)),
            opcode::AUTH_RESPONSE => Some(auth_success(stream_id)),
            opcode::REGISTER => Some(ready(stream_id)),
            _ => None,
        }
    })
    .await;
    let target = spawn_cluster(|frame| {
        let stream_id = frame.header.stream_id;
        match frame.header.opcode {
            opcode::STARTUP => Some(authenticate(stream_id)),
            opcode::AUTH_RESPONSE => Some(auth_success(stream_id)),
            opcode::REGISTER => Some(ready(stream_id)),
            _ => None,
        }
    })
    .await;
    let mut proxy = start_proxy_with_creds(&origin, &target, "migrator", "hunter2").await;

    proxy.send(startup(0)).await;
    let challenge = proxy.recv().await;
    assert_eq!(challenge.header.opcode, opcode::AUTHENTICATE);

    proxy.send(auth_response(0, b"\0client\0clientpw")).await;
    let response = proxy.recv().await;
    assert_eq!(response.header.opcode, opcode::AUTH_SUCCESS);
    assert_eq!(response.header.stream_id, 0);

    // exactly one AUTH_SUCCESS reaches the client
    proxy.expect_no_frame(Duration::from_millis(200)).await;

    // the proxy answered target's challenge with the configured credentials,
    // never with the client's
    let target_auth = target
        .received
        .lock()
        .iter()
        .find(|f| f.header.opcode == opcode::AUTH_RESPONSE)
        .cloned()
        .expect("target never saw an AUTH_RESPONSE");
    assert_eq!(&target_auth.body[4..], b"\0migrator\0hunter2");
}

#[tokio::test]
async fn test_target_handshake_failure_tears_down_without_reply() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(|frame| {
        let stream_id = frame.header.stream_id;
        match frame.header.opcode {
            opcode::STARTUP => Some(error_response(stream_id, 0x0100, "bad credentials")),
            _ => None,
        }
    })
    .await;
    let mut proxy = start_proxy(&origin, &target).await;

    proxy.send(startup(0)).await;
    proxy.expect_closed().await;

    let result = proxy.handle.await.unwrap();
    assert!(result.is_err(), "handshake failure should surface an error");
}

#[tokio::test]
async fn test_request_before_startup_is_a_protocol_violation() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;

    proxy.send(query(1, "SELECT * FROM t")).await;
    proxy.expect_closed().await;

    // nothing leaked upstream
    assert!(origin.received_opcodes().is_empty());
    assert!(target.received_opcodes().is_empty());
}

#[tokio::test]
async fn test_parent_shutdown_closes_the_session() {
    let origin = spawn_cluster(plain_behavior).await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;
    proxy.handshake().await;

    proxy.shutdown.cancel();
    proxy.expect_closed().await;

    // a shutdown is a clean teardown, not an error
    assert!(proxy.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_origin_authenticate_is_relayed_before_target_handshake_starts() {
    let origin = spawn_cluster(|frame| {
        let stream_id = frame.header.stream_id;
        match frame.header.opcode {
            opcode::STARTUP => Some(authenticate(stream_id)),
            opcode::AUTH_RESPONSE => Some(auth_success(stream_id)),
            _ => None,
        }
    })
    .await;
    let target = spawn_cluster(plain_behavior).await;
    let mut proxy = start_proxy(&origin, &target).await;

    proxy.send(startup(0)).await;
    let challenge = proxy.recv().await;
    assert_eq!(challenge.header.opcode, opcode::AUTHENTICATE);

    // target must not have been touched while origin is mid-authentication
    assert!(target.received_opcodes().is_empty());

    proxy.send(auth_response(0, b"\0u\0p")).await;
    let response = proxy.recv().await;
    assert_eq!(response.header.opcode, opcode::AUTH_SUCCESS);
    assert_eq!(
        target.received_opcodes(),
        vec![opcode::STARTUP, opcode::REGISTER]
    );
}
