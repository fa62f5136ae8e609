//! Scripted clusters and a client harness for driving a ClientHandler

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use janus::cache::PreparedStatementCache;
use janus::config::Config;
use janus::protocol::{opcode, result_kind, FrameCodec, RawFrame, EVENT_STREAM_ID};
use janus::proxy::{ClientHandler, HandlerError};

pub const V4: u8 = 4;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ---- frame builders -------------------------------------------------------

fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u16(s.len() as u16);
    dst.extend_from_slice(s.as_bytes());
}

pub fn startup(stream_id: i16) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_u16(1);
    put_string(&mut body, "CQL_VERSION");
    put_string(&mut body, "3.0.0");
    RawFrame::request(V4, stream_id, opcode::STARTUP, body.freeze())
}

pub fn query(stream_id: i16, cql: &str) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(cql.len() as i32);
    body.extend_from_slice(cql.as_bytes());
    body.put_u16(0x0001); // consistency ONE
    body.put_u8(0); // flags
    RawFrame::request(V4, stream_id, opcode::QUERY, body.freeze())
}

pub fn prepare(stream_id: i16, cql: &str) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(cql.len() as i32);
    body.extend_from_slice(cql.as_bytes());
    RawFrame::request(V4, stream_id, opcode::PREPARE, body.freeze())
}

pub fn execute(stream_id: i16, id: &[u8]) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_u16(id.len() as u16);
    body.extend_from_slice(id);
    body.put_u16(0x0001);
    body.put_u8(0);
    RawFrame::request(V4, stream_id, opcode::EXECUTE, body.freeze())
}

pub fn auth_response(stream_id: i16, token: &[u8]) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(token.len() as i32);
    body.extend_from_slice(token);
    RawFrame::request(V4, stream_id, opcode::AUTH_RESPONSE, body.freeze())
}

pub fn ready(stream_id: i16) -> RawFrame {
    RawFrame::response(V4, stream_id, opcode::READY, BytesMut::new().freeze())
}

pub fn authenticate(stream_id: i16) -> RawFrame {
    let mut body = BytesMut::new();
    put_string(&mut body, "org.apache.cassandra.auth.PasswordAuthenticator");
    RawFrame::response(V4, stream_id, opcode::AUTHENTICATE, body.freeze())
}

pub fn auth_success(stream_id: i16) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(-1); // null token
    RawFrame::response(V4, stream_id, opcode::AUTH_SUCCESS, body.freeze())
}

pub fn void_result(stream_id: i16) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(result_kind::VOID);
    RawFrame::response(V4, stream_id, opcode::RESULT, body.freeze())
}

pub fn rows_result(stream_id: i16) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(result_kind::ROWS);
    body.put_i32(0x0001); // metadata flags
    body.put_i32(0); // column count
    body.put_i32(0); // row count
    RawFrame::response(V4, stream_id, opcode::RESULT, body.freeze())
}

pub fn prepared_result(stream_id: i16, id: &[u8]) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(result_kind::PREPARED);
    body.put_u16(id.len() as u16);
    body.extend_from_slice(id);
    body.put_i32(0x0000); // metadata flags
    body.put_i32(0); // column count
    RawFrame::response(V4, stream_id, opcode::RESULT, body.freeze())
}

pub fn set_keyspace_result(stream_id: i16, keyspace: &str) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(result_kind::SET_KEYSPACE);
    put_string(&mut body, keyspace);
    RawFrame::response(V4, stream_id, opcode::RESULT, body.freeze())
}

pub fn error_response(stream_id: i16, code: i32, msg: &str) -> RawFrame {
    let mut body = BytesMut::new();
    body.put_i32(code);
    put_string(&mut body, msg);
    RawFrame::response(V4, stream_id, opcode::ERROR, body.freeze())
}

pub fn event(kind: &str) -> RawFrame {
    let mut body = BytesMut::new();
    put_string(&mut body, kind);
    put_string(&mut body, "NEW_NODE");
    RawFrame::response(V4, EVENT_STREAM_ID, opcode::EVENT, body.freeze())
}

// ---- scripted cluster -----------------------------------------------------

/// A fake cluster on an ephemeral port: records everything it receives and
/// answers with whatever the behavior closure returns. Frames pushed through
/// `inject` go to the connection unsolicited, like real server events.
pub struct FakeCluster {
    pub addr: String,
    pub received: Arc<Mutex<Vec<RawFrame>>>,
    inject_tx: mpsc::Sender<RawFrame>,
}

impl FakeCluster {
    pub fn received_opcodes(&self) -> Vec<u8> {
        self.received.lock().iter().map(|f| f.header.opcode).collect()
    }

    /// Push an unsolicited frame (an event) to the connected proxy
    pub async fn inject(&self, frame: RawFrame) {
        self.inject_tx.send(frame).await.expect("cluster task gone");
    }
}

pub async fn spawn_cluster<F>(mut behavior: F) -> FakeCluster
where
    F: FnMut(&RawFrame) -> Option<RawFrame> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let received = Arc::new(Mutex::new(Vec::new()));
    let (inject_tx, mut inject_rx) = mpsc::channel::<RawFrame>(16);

    let log = received.clone();
    tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut framed = Framed::new(stream, FrameCodec);
        loop {
            tokio::select! {
                maybe = inject_rx.recv() => match maybe {
                    Some(frame) => {
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                item = framed.next() => match item {
                    Some(Ok(frame)) => {
                        log.lock().push(frame.clone());
                        if let Some(response) = behavior(&frame) {
                            if framed.send(response).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => break,
                },
            }
        }
    });

    FakeCluster {
        addr,
        received,
        inject_tx,
    }
}

/// Handshake-capable cluster that answers queries with Void results
pub fn plain_behavior(frame: &RawFrame) -> Option<RawFrame> {
    let stream_id = frame.header.stream_id;
    match frame.header.opcode {
        opcode::STARTUP | opcode::REGISTER => Some(ready(stream_id)),
        opcode::QUERY | opcode::EXECUTE | opcode::BATCH => Some(void_result(stream_id)),
        opcode::PREPARE => Some(prepared_result(stream_id, &[0x0F])),
        _ => None,
    }
}

// ---- proxy under test -----------------------------------------------------

pub struct TestProxy {
    pub client: Framed<DuplexStream, FrameCodec>,
    pub handle: JoinHandle<Result<(), HandlerError>>,
    pub shutdown: CancellationToken,
}

pub async fn start_proxy(origin: &FakeCluster, target: &FakeCluster) -> TestProxy {
    start_proxy_with_creds(origin, target, "", "").await
}

pub async fn start_proxy_with_creds(
    origin: &FakeCluster,
    target: &FakeCluster,
    username: &str,
    password: &str,
) -> TestProxy {
    let mut config = Config::default();
    config.origin = cluster_config(&origin.addr, "", "");
    config.target = cluster_config(&target.addr, username, password);

    let (client_io, proxy_io) = tokio::io::duplex(64 * 1024);
    let shutdown = CancellationToken::new();
    let cache = Arc::new(PreparedStatementCache::new(64));

    let session_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        ClientHandler::run(1, proxy_io, &config, cache, &session_shutdown).await
    });

    TestProxy {
        client: Framed::new(client_io, FrameCodec),
        handle,
        shutdown,
    }
}

fn cluster_config(addr: &str, username: &str, password: &str) -> janus::config::ClusterConfig {
    let (host, port) = addr.rsplit_once(':').unwrap();
    janus::config::ClusterConfig {
        contact_point: host.to_string(),
        port: port.parse().unwrap(),
        username: username.to_string(),
        password: password.to_string(),
    }
}

impl TestProxy {
    pub async fn send(&mut self, frame: RawFrame) {
        self.client.send(frame).await.expect("send to proxy");
    }

    pub async fn recv(&mut self) -> RawFrame {
        timeout(RECV_TIMEOUT, self.client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("proxy closed the connection")
            .expect("frame decode error")
    }

    /// Complete a clean handshake on stream 0
    pub async fn handshake(&mut self) {
        self.send(startup(0)).await;
        let response = self.recv().await;
        assert_eq!(response.header.opcode, opcode::READY);
        assert_eq!(response.header.stream_id, 0);
    }

    /// Assert no frame arrives within the grace period
    pub async fn expect_no_frame(&mut self, grace: Duration) {
        if let Ok(item) = timeout(grace, self.client.next()).await {
            panic!("unexpected frame or close: {item:?}");
        }
    }

    /// Assert the proxy tears the client connection down
    pub async fn expect_closed(&mut self) {
        let item = timeout(RECV_TIMEOUT, self.client.next())
            .await
            .expect("timed out waiting for the connection to close");
        assert!(
            item.is_none() || item.unwrap().is_err(),
            "expected the connection to close"
        );
    }
}
