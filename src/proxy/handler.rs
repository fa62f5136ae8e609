use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::PreparedStatementCache;
use crate::config::Config;
use crate::metrics::metrics;
use crate::protocol::{error_code, message, opcode, result_kind, EventKind, RawFrame};
use crate::router::{ForwardDecision, InspectError, RequestInspector};

use super::client::ClientConnection;
use super::cluster::{Cluster, ClusterConnection};

/// Handler errors
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to connect to {cluster}: {source}")]
    Connect {
        cluster: Cluster,
        source: std::io::Error,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("{0} connection closed")]
    ClusterClosed(Cluster),

    #[error("target handshake failed: {0}")]
    TargetHandshake(String),

    #[error(transparent)]
    Inspect(#[from] InspectError),
}

/// Coordinates one client connection against both clusters: gates the
/// double handshake, routes and dispatches requests, aggregates dual-write
/// responses, and multiplexes server events.
pub struct ClientHandler {
    session_id: u32,
    origin: ClusterConnection,
    target: ClusterConnection,
    inspector: RequestInspector,
    cache: Arc<PreparedStatementCache>,
    keyspace: Arc<RwLock<Option<String>>>,
    responses: mpsc::Sender<RawFrame>,
    target_username: String,
    target_password: String,
    cancel: CancellationToken,
}

impl ClientHandler {
    /// Run a client session to completion. Returns when any of the three
    /// connections closes, the handshake fails, or `shutdown` fires.
    pub async fn run<S>(
        session_id: u32,
        client_stream: S,
        config: &Config,
        cache: Arc<PreparedStatementCache>,
        shutdown: &CancellationToken,
    ) -> Result<(), HandlerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let cancel = shutdown.child_token();

        let (origin, origin_events) =
            match ClusterConnection::connect(Cluster::Origin, &config.origin.addr(), cancel.clone(), session_id)
                .await
            {
                Ok(v) => v,
                Err(source) => {
                    cancel.cancel();
                    return Err(HandlerError::Connect {
                        cluster: Cluster::Origin,
                        source,
                    });
                }
            };
        let (target, target_events) =
            match ClusterConnection::connect(Cluster::Target, &config.target.addr(), cancel.clone(), session_id)
                .await
            {
                Ok(v) => v,
                Err(source) => {
                    cancel.cancel();
                    return Err(HandlerError::Connect {
                        cluster: Cluster::Target,
                        source,
                    });
                }
            };

        let client = ClientConnection::spawn(client_stream, cancel.clone(), session_id);
        let ClientConnection {
            mut requests,
            responses,
            reader,
            writer,
        } = client;

        let keyspace = Arc::new(RwLock::new(None));
        let handler = Arc::new(Self {
            session_id,
            origin,
            target,
            inspector: RequestInspector::new(cache.clone(), keyspace.clone()),
            cache,
            keyspace,
            responses: responses.clone(),
            target_username: config.target.username.clone(),
            target_password: config.target.password.clone(),
            cancel: cancel.clone(),
        });

        let merger = tokio::spawn(Self::merge_events(
            origin_events,
            target_events,
            responses.clone(),
            cancel.clone(),
            session_id,
        ));

        // Request loop. The `ready` latch holds until both handshakes have
        // completed; while it is false every client frame is handshake
        // traffic and is handled inline, which also guarantees nothing else
        // reaches the target while its handshake reuses client stream ids.
        let mut ready = false;
        let mut startup_frame: Option<RawFrame> = None;
        let mut request_tasks = JoinSet::new();
        let mut result = Ok(());

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = requests.recv() => match maybe {
                    Some(frame) => frame,
                    None => break,
                },
            };

            debug!(
                session_id,
                stream_id = frame.header.stream_id,
                req_opcode = frame.header.opcode,
                "request received"
            );

            if !ready {
                match handler.handle_handshake_frame(frame, &mut startup_frame).await {
                    Ok(true) => {
                        ready = true;
                        info!(session_id, "handshake complete");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
                continue;
            }

            let handler = handler.clone();
            request_tasks.spawn(async move { handler.process(frame).await });
        }

        cancel.cancel();
        while request_tasks.join_next().await.is_some() {}
        let _ = merger.await;
        drop(handler);
        drop(responses);
        let _ = writer.await;
        let _ = reader.await;

        result
    }

    /// Handle one pre-ready frame. Returns `Ok(true)` once both handshakes
    /// are complete and the client has its READY/AUTH_SUCCESS.
    async fn handle_handshake_frame(
        &self,
        frame: RawFrame,
        startup_frame: &mut Option<RawFrame>,
    ) -> Result<bool, HandlerError> {
        match frame.header.opcode {
            opcode::QUERY | opcode::PREPARE | opcode::EXECUTE | opcode::BATCH | opcode::REGISTER => {
                return Err(HandlerError::Protocol(format!(
                    "request opcode {:#04x} before handshake completed",
                    frame.header.opcode
                )));
            }
            opcode::STARTUP => {
                *startup_frame = Some(frame.clone());
            }
            _ => {}
        }

        let response = self
            .origin
            .forward(frame)
            .await
            .await
            .map_err(|_| HandlerError::ClusterClosed(Cluster::Origin))?;

        let auth_done = matches!(
            response.header.opcode,
            opcode::READY | opcode::AUTH_SUCCESS
        );
        if auth_done {
            // The target handshake must finish within this request window so
            // no client stream id is in flight on target in the meantime.
            self.complete_target_handshake(startup_frame.as_ref()).await?;
        }

        self.responses
            .send(response)
            .await
            .map_err(|_| HandlerError::ClientDisconnected)?;

        Ok(auth_done)
    }

    /// Drive the target handshake to a terminal state: replay the captured
    /// STARTUP, answer an AUTHENTICATE challenge with the configured
    /// credentials, and register for the event kinds the proxy filters.
    /// Any unexpected reply is fatal to the whole session.
    async fn complete_target_handshake(
        &self,
        startup_frame: Option<&RawFrame>,
    ) -> Result<(), HandlerError> {
        let startup = startup_frame.ok_or_else(|| {
            HandlerError::Protocol("origin authenticated before a STARTUP was received".into())
        })?;
        let version = startup.header.protocol_version();
        let stream_id = startup.header.stream_id;

        let response = self
            .target
            .forward(startup.clone())
            .await
            .await
            .map_err(|_| HandlerError::ClusterClosed(Cluster::Target))?;

        match response.header.opcode {
            opcode::READY | opcode::AUTH_SUCCESS => {}
            opcode::AUTHENTICATE => {
                let body = message::auth_response_body(&self.target_username, &self.target_password);
                let auth = RawFrame::request(version, stream_id, opcode::AUTH_RESPONSE, body);
                let reply = self
                    .target
                    .forward(auth)
                    .await
                    .await
                    .map_err(|_| HandlerError::ClusterClosed(Cluster::Target))?;
                match reply.header.opcode {
                    opcode::READY | opcode::AUTH_SUCCESS => {}
                    other => {
                        return Err(HandlerError::TargetHandshake(format!(
                            "authentication answered with opcode {other:#04x}"
                        )));
                    }
                }
            }
            other => {
                return Err(HandlerError::TargetHandshake(format!(
                    "startup answered with opcode {other:#04x}"
                )));
            }
        }
        debug!(session_id = self.session_id, "target handshake complete");

        self.register_target_events(version, stream_id).await;
        Ok(())
    }

    /// Register on target for the full event set. Client REGISTERs only ever
    /// reach origin, so without this the target events channel would stay
    /// silent. Events are advisory; a refusal is logged, not fatal.
    async fn register_target_events(&self, version: u8, stream_id: i16) {
        let register = RawFrame::request(
            version,
            stream_id,
            opcode::REGISTER,
            message::register_body(&EventKind::ALL),
        );
        match self.target.forward(register).await.await {
            Ok(reply) if reply.header.opcode == opcode::READY => {
                debug!(session_id = self.session_id, "registered for target events");
            }
            Ok(reply) => {
                warn!(
                    session_id = self.session_id,
                    reply_opcode = reply.header.opcode,
                    "target refused event registration"
                );
            }
            Err(_) => {
                warn!(
                    session_id = self.session_id,
                    "target connection closed during event registration"
                );
            }
        }
    }

    /// Entry point of the per-request task spawned for every post-handshake
    /// frame. Request failures are logged and swallowed; they never tear the
    /// connection down.
    #[instrument(skip(self, frame), fields(session_id = self.session_id, stream_id = frame.header.stream_id))]
    async fn process(&self, frame: RawFrame) {
        let req_opcode = frame.header.opcode;
        let stream_id = frame.header.stream_id;
        match self.forward_request(frame).await {
            Ok(Some(response)) => {
                if self.responses.send(response).await.is_err() {
                    debug!(
                        session_id = self.session_id,
                        stream_id, "client gone before response delivery"
                    );
                }
            }
            Ok(None) => {}
            Err(e) if self.cancel.is_cancelled() => {
                info!(
                    session_id = self.session_id,
                    stream_id,
                    error = %e,
                    "request abandoned during shutdown"
                );
            }
            Err(e) => {
                warn!(
                    session_id = self.session_id,
                    req_opcode,
                    stream_id,
                    error = %e,
                    "request failed"
                );
            }
        }
    }

    /// Inspect, dispatch and post-process one request. Returns `None` when
    /// the request was already answered (the synthesized Unprepared path).
    async fn forward_request(&self, frame: RawFrame) -> Result<Option<RawFrame>, HandlerError> {
        let start = Instant::now();

        let decision = match self.inspector.inspect(&frame) {
            Ok(decision) => decision,
            Err(InspectError::UnpreparedExecute {
                id,
                stream_id,
                version,
            }) => {
                debug!(
                    session_id = self.session_id,
                    stream_id,
                    id = %message::hex(&id),
                    "prepared id miss, synthesizing unprepared error"
                );
                let response =
                    RawFrame::response(version, stream_id, opcode::ERROR, message::unprepared_body(&id));
                self.responses
                    .send(response)
                    .await
                    .map_err(|_| HandlerError::ClientDisconnected)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let _in_flight = InFlightGuard::new(decision, start);

        let response = self.dispatch(frame, decision).await?;

        // Post-response side effects; the decode is advisory and a failure
        // only skips the side effect.
        if response.header.opcode == opcode::RESULT {
            match message::result_body_kind(&response.body) {
                Some(result_kind::PREPARED) => match message::prepared_id(&response.body) {
                    Some(id) => self.cache.bind(response.header.stream_id, id),
                    None => warn!(session_id = self.session_id, "prepared result missing its id"),
                },
                Some(result_kind::SET_KEYSPACE) => match message::set_keyspace(&response.body) {
                    Some(ks) => {
                        debug!(session_id = self.session_id, keyspace = %ks, "keyspace changed");
                        *self.keyspace.write() = Some(ks);
                    }
                    None => warn!(
                        session_id = self.session_id,
                        "set-keyspace result missing its keyspace"
                    ),
                },
                _ => {}
            }
        }

        Ok(Some(response))
    }

    /// Execute the forward decision and wait for one or two responses,
    /// returning the frame that goes back to the client.
    async fn dispatch(
        &self,
        frame: RawFrame,
        decision: ForwardDecision,
    ) -> Result<RawFrame, HandlerError> {
        match decision {
            ForwardDecision::Origin => {
                let start = Instant::now();
                let response = self
                    .origin
                    .forward(frame)
                    .await
                    .await
                    .map_err(|_| HandlerError::ClusterClosed(Cluster::Origin))?;
                metrics().observe_cluster_latency(Cluster::Origin, "read", start);
                self.track_read_response(&response);
                Ok(response)
            }
            ForwardDecision::Target => {
                let start = Instant::now();
                let response = self
                    .target
                    .forward(frame)
                    .await
                    .await
                    .map_err(|_| HandlerError::ClusterClosed(Cluster::Target))?;
                metrics().observe_cluster_latency(Cluster::Target, "write", start);
                self.track_read_response(&response);
                Ok(response)
            }
            ForwardDecision::Both => {
                let start = Instant::now();
                // launch on both clusters before awaiting either response
                let origin_rx = self.origin.forward(frame.clone()).await;
                let target_rx = self.target.forward(frame).await;

                let origin_wait = async {
                    let response = origin_rx
                        .await
                        .map_err(|_| HandlerError::ClusterClosed(Cluster::Origin))?;
                    metrics().observe_cluster_latency(Cluster::Origin, "write", start);
                    Ok::<_, HandlerError>(response)
                };
                let target_wait = async {
                    let response = target_rx
                        .await
                        .map_err(|_| HandlerError::ClusterClosed(Cluster::Target))?;
                    metrics().observe_cluster_latency(Cluster::Target, "write", start);
                    Ok::<_, HandlerError>(response)
                };
                let (origin_response, target_response) = tokio::try_join!(origin_wait, target_wait)?;

                Ok(self.aggregate(origin_response, target_response))
            }
        }
    }

    /// Apply the aggregation rule to a dual-write pair and update the write
    /// metrics.
    fn aggregate(&self, origin_response: RawFrame, target_response: RawFrame) -> RawFrame {
        if !is_successful(&origin_response) {
            self.track_write_failure(&origin_response, Cluster::Origin);
        }
        if !is_successful(&target_response) {
            self.track_write_failure(&target_response, Cluster::Target);
        }

        let (response, outcome) = choose_response(origin_response, target_response);
        metrics().record_write_outcome(outcome);
        debug!(
            session_id = self.session_id,
            outcome,
            resp_opcode = response.header.opcode,
            "aggregated dual-write response"
        );
        response
    }

    /// Update the read counters from a single-cluster response
    fn track_read_response(&self, response: &RawFrame) {
        if is_successful(response) {
            metrics().record_read_outcome("success");
            return;
        }
        match message::error_body_code(&response.body) {
            Some(error_code::UNPREPARED) => metrics().record_read_outcome("unprepared"),
            Some(error_code::READ_TIMEOUT) => metrics().record_read_outcome("read_timeout"),
            Some(_) => metrics().record_read_outcome("failed"),
            None => warn!(session_id = self.session_id, "undecodable error response"),
        }
    }

    /// Track one cluster's failed write. Only unprepared and timed-out
    /// failures get their own series; general failures are covered by the
    /// aggregate outcome.
    fn track_write_failure(&self, response: &RawFrame, cluster: Cluster) {
        match message::error_body_code(&response.body) {
            Some(error_code::UNPREPARED) => metrics().record_write_failure(cluster, "unprepared"),
            Some(error_code::WRITE_TIMEOUT) => {
                metrics().record_write_failure(cluster, "write_timeout")
            }
            Some(_) => {}
            None => warn!(
                session_id = self.session_id,
                %cluster,
                "undecodable error response"
            ),
        }
    }

    /// Merge the two cluster event channels into the client outbox. Schema
    /// changes are authoritative on origin; status and topology changes on
    /// target. Everything else is dropped.
    async fn merge_events(
        mut origin_events: mpsc::Receiver<RawFrame>,
        mut target_events: mpsc::Receiver<RawFrame>,
        responses: mpsc::Sender<RawFrame>,
        cancel: CancellationToken,
        session_id: u32,
    ) {
        loop {
            let (frame, from) = tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = origin_events.recv() => match maybe {
                    Some(frame) => (frame, Cluster::Origin),
                    None => break,
                },
                maybe = target_events.recv() => match maybe {
                    Some(frame) => (frame, Cluster::Target),
                    None => break,
                },
            };

            let forward = match message::event_kind(&frame.body) {
                Some(EventKind::SchemaChange) => from == Cluster::Origin,
                Some(EventKind::StatusChange) | Some(EventKind::TopologyChange) => {
                    from == Cluster::Target
                }
                None => {
                    warn!(session_id, cluster = %from, "event with unrecognized kind, dropping");
                    metrics().record_event(from, "dropped");
                    continue;
                }
            };

            if forward {
                metrics().record_event(from, "forwarded");
                if responses.send(frame).await.is_err() {
                    break;
                }
            } else {
                debug!(
                    session_id,
                    cluster = %from,
                    "event withheld: the other cluster is authoritative for this kind"
                );
                metrics().record_event(from, "dropped");
            }
        }
        debug!(session_id, "event merger stopped");
    }
}

fn is_successful(frame: &RawFrame) -> bool {
    frame.header.opcode != opcode::ERROR
}

/// Aggregation rule for dual writes: under agreement (both success or both
/// failure) the client sees Origin's response; a single failure wins so the
/// client sees it eagerly.
fn choose_response(origin: RawFrame, target: RawFrame) -> (RawFrame, &'static str) {
    match (is_successful(&origin), is_successful(&target)) {
        (true, true) => (origin, "success_both"),
        (false, false) => (origin, "failed_both"),
        (false, true) => (origin, "failed_origin_only"),
        (true, false) => (target, "failed_target_only"),
    }
}

/// Mirrors the in-flight gauges and end-to-end latency around a dispatch,
/// whichever way the request ends.
struct InFlightGuard {
    read: bool,
    write: bool,
    start: Instant,
}

impl InFlightGuard {
    fn new(decision: ForwardDecision, start: Instant) -> Self {
        let read = matches!(decision, ForwardDecision::Origin | ForwardDecision::Both);
        let write = matches!(decision, ForwardDecision::Target | ForwardDecision::Both);
        if read {
            metrics().inc_in_flight("read");
        }
        if write {
            metrics().inc_in_flight("write");
        }
        Self { read, write, start }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.read {
            metrics().observe_proxy_latency("read", self.start);
            metrics().dec_in_flight("read");
        }
        if self.write {
            metrics().observe_proxy_latency("write", self.start);
            metrics().dec_in_flight("write");
        }
    }
}
