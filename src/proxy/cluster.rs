use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{FrameCodec, RawFrame, EVENT_STREAM_ID};

use super::{EVENT_CHANNEL_CAPACITY, WRITE_CHANNEL_CAPACITY};

/// Which upstream a connection or response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cluster {
    /// The cluster being migrated away from; serves all reads
    Origin,
    /// The migration destination; receives the write half of dual-writes
    Target,
}

impl Cluster {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cluster::Origin => "origin",
            Cluster::Target => "target",
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One TCP connection to one upstream cluster. Responses are demultiplexed
/// by stream id back to the `forward` call that sent the request; frames on
/// the event stream id go to a separate events channel.
pub struct ClusterConnection {
    cluster: Cluster,
    write_tx: mpsc::Sender<RawFrame>,
    pending: Arc<DashMap<i16, oneshot::Sender<RawFrame>>>,
    cancel: CancellationToken,
}

impl ClusterConnection {
    /// Connect and spawn the reader/writer tasks. Returns the connection and
    /// the receiving end of its events channel.
    pub async fn connect(
        cluster: Cluster,
        addr: &str,
        cancel: CancellationToken,
        session_id: u32,
    ) -> std::io::Result<(Self, mpsc::Receiver<RawFrame>)> {
        let stream = TcpStream::connect(addr).await?;
        debug!(session_id, %cluster, addr, "connected to cluster");

        let framed = Framed::new(stream, FrameCodec);
        let (mut sink, mut frames) = framed.split();

        let (write_tx, mut write_rx) = mpsc::channel::<RawFrame>(WRITE_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending: Arc<DashMap<i16, oneshot::Sender<RawFrame>>> = Arc::new(DashMap::new());

        let reader_pending = pending.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    item = frames.next() => match item {
                        Some(Ok(frame)) => {
                            if frame.header.stream_id == EVENT_STREAM_ID {
                                // events are advisory; a full channel drops them
                                if event_tx.try_send(frame).is_err() {
                                    warn!(session_id, %cluster, "events channel full, dropping event");
                                }
                            } else if let Some((_, reply)) =
                                reader_pending.remove(&frame.header.stream_id)
                            {
                                let _ = reply.send(frame);
                            } else {
                                warn!(
                                    session_id,
                                    %cluster,
                                    stream_id = frame.header.stream_id,
                                    "response with no in-flight request, dropping"
                                );
                            }
                        }
                        Some(Err(e)) => {
                            warn!(session_id, %cluster, error = %e, "cluster read error");
                            reader_cancel.cancel();
                            break;
                        }
                        None => {
                            info!(session_id, %cluster, "cluster closed the connection");
                            reader_cancel.cancel();
                            break;
                        }
                    },
                }
            }
            // close every waiting oneshot so callers observe the shutdown
            reader_pending.clear();
        });

        let writer_cancel = cancel.clone();
        let writer_cluster = cluster;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    maybe = write_rx.recv() => match maybe {
                        Some(frame) => {
                            if let Err(e) = sink.send(frame).await {
                                warn!(session_id, cluster = %writer_cluster, error = %e, "cluster write error");
                                writer_cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok((
            Self {
                cluster,
                write_tx,
                pending,
                cancel,
            },
            event_rx,
        ))
    }

    /// Ship a request to the cluster and return the channel its response
    /// will arrive on. A write failure or connection shutdown surfaces to
    /// the caller as the channel closing without a value.
    pub async fn forward(&self, frame: RawFrame) -> oneshot::Receiver<RawFrame> {
        let stream_id = frame.header.stream_id;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(stream_id, reply_tx);

        if self.write_tx.send(frame).await.is_err() || self.cancel.is_cancelled() {
            // the reader has already drained (or will never see) this entry
            self.pending.remove(&stream_id);
        }
        reply_rx
    }

    pub fn cluster(&self) -> Cluster {
        self.cluster
    }
}
