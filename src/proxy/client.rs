use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::protocol::{FrameCodec, RawFrame};

use super::{REQUEST_CHANNEL_CAPACITY, RESPONSE_CHANNEL_CAPACITY};

/// Framed I/O with the client, split into two independent tasks: a reader
/// publishing frames to the request inbox and a writer draining the response
/// outbox in arrival order. Either side failing cancels the whole connection.
pub struct ClientConnection {
    /// Frames read from the client
    pub requests: mpsc::Receiver<RawFrame>,
    /// Frames to write back to the client, FIFO
    pub responses: mpsc::Sender<RawFrame>,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl ClientConnection {
    pub fn spawn<S>(stream: S, cancel: CancellationToken, session_id: u32) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, FrameCodec);
        let (mut sink, mut frames) = framed.split();

        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (response_tx, mut response_rx) = mpsc::channel::<RawFrame>(RESPONSE_CHANNEL_CAPACITY);

        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    item = frames.next() => match item {
                        Some(Ok(frame)) => {
                            if request_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(session_id, error = %e, "client read error");
                            reader_cancel.cancel();
                            break;
                        }
                        None => {
                            info!(session_id, "client disconnected");
                            reader_cancel.cancel();
                            break;
                        }
                    },
                }
            }
        });

        // The writer drains the outbox until every sender is gone, so queued
        // responses still reach the client after the request loop stops.
        let writer_cancel = cancel;
        let writer = tokio::spawn(async move {
            while let Some(frame) = response_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!(session_id, error = %e, "client write error");
                    writer_cancel.cancel();
                    break;
                }
            }
        });

        Self {
            requests: request_rx,
            responses: response_tx,
            reader,
            writer,
        }
    }
}
