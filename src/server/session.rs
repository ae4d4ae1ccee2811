//! Connection sessions
//!
//! Each accepted connection registers with the client registry and then runs
//! two tasks: a read path that turns incoming lines into requests for the
//! request loop, and a write path that sends replies and broadcasts back.
//! Whichever path stops first cancels the other; once both have stopped the
//! session deregisters exactly once and closes the connection.
//!
//! ```text
//! Connecting → Registering → Active → Deregistering → Closed
//!                   └──refused──────────────────────────┘
//! ```

use std::fmt;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::protocol::{AckStatus, LineCodec, Message, ACK};
use crate::server::dispatch::Request;
use crate::server::registry::{ClientHandle, ClientId, RegistryHandle, BROADCAST_QUEUE_DEPTH};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registering,
    Active,
    Deregistering,
    Closed,
}

/// Handle a single client connection until it closes.
///
/// `peer` is only used for logging.
pub async fn handle_connection<S>(
    stream: S,
    peer: impl fmt::Display,
    registry: RegistryHandle,
    requests: mpsc::Sender<Request>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::new(peer.to_string(), registry, requests);
    session.run(stream).await;
}

struct Session {
    peer: String,
    client: ClientId,
    state: SessionState,
    registry: RegistryHandle,
    requests: mpsc::Sender<Request>,
}

impl Session {
    fn new(peer: String, registry: RegistryHandle, requests: mpsc::Sender<Request>) -> Self {
        Self {
            peer,
            client: ClientId::new(),
            state: SessionState::Connecting,
            registry,
            requests,
        }
    }

    fn transition(&mut self, state: SessionState) {
        tracing::debug!(client = %self.client, peer = %self.peer, "session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    async fn run<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // At most one request is in flight, so replies need no bound.
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Message>();
        let (broadcast_tx, broadcast_rx) = mpsc::channel::<Message>(BROADCAST_QUEUE_DEPTH);
        let disconnect = CancellationToken::new();
        let handle = ClientHandle::new(broadcast_tx, disconnect.clone());
        self.client = handle.id();

        // Tell the registry we've arrived, and how to contact us.
        self.transition(SessionState::Registering);
        if !self.registry.register(handle).await {
            tracing::warn!(client = %self.client, peer = %self.peer, "connection refused by client registry");
            self.transition(SessionState::Closed);
            return;
        }
        self.transition(SessionState::Active);
        tracing::info!(client = %self.client, peer = %self.peer, "client connected");

        let (reader, writer) = tokio::io::split(stream);
        let closing = CancellationToken::new();

        let read = tokio::spawn(read_path(
            FramedRead::new(reader, LineCodec::new()),
            self.requests.clone(),
            reply_tx,
            closing.clone(),
            self.client,
        ));
        let write = tokio::spawn(write_path(
            FramedWrite::new(writer, LineCodec::new()),
            Outbound {
                replies: reply_rx,
                broadcasts: broadcast_rx,
            },
            disconnect,
            closing,
            self.client,
        ));
        let (read, write) = tokio::join!(read, write);

        // Both paths have stopped: tell the registry we're off.
        self.transition(SessionState::Deregistering);
        if !self.registry.deregister(self.client).await {
            tracing::warn!(client = %self.client, "connection removal refused by client registry");
        }

        match (read, write) {
            (Ok(reader), Ok(writer)) => {
                let mut stream = reader.into_inner().unsplit(writer.into_inner());
                if let Err(e) = stream.shutdown().await {
                    tracing::debug!(client = %self.client, "couldn't close connection: {}", e);
                }
            }
            (read, write) => {
                for e in [read.err(), write.err()].into_iter().flatten() {
                    tracing::error!(client = %self.client, "connection task failed: {}", e);
                }
            }
        }
        self.transition(SessionState::Closed);
        tracing::info!(client = %self.client, peer = %self.peer, "client disconnected");
    }
}

/// Turn incoming lines into requests until end of stream, a read error, a
/// terminating request, or the write path closing.
async fn read_path<R>(
    mut frames: FramedRead<ReadHalf<R>, LineCodec>,
    requests: mpsc::Sender<Request>,
    reply: mpsc::UnboundedSender<Message>,
    closing: CancellationToken,
    client: ClientId,
) -> FramedRead<ReadHalf<R>, LineCodec>
where
    R: AsyncRead + AsyncWrite,
{
    loop {
        let frame = tokio::select! {
            _ = closing.cancelled() => break,
            frame = frames.next() => frame,
        };

        let message = match frame {
            Some(Ok(Ok(message))) => message,
            Some(Ok(Err(e))) => {
                tracing::warn!(%client, "discarding bad line: {}", e);
                let _ = reply.send(
                    Message::new(ACK)
                        .arg(AckStatus::Fail.as_str())
                        .arg(format!("bad line: {}", e)),
                );
                continue;
            }
            Some(Err(e)) => {
                tracing::warn!(%client, "connection read error: {}", e);
                break;
            }
            None => break,
        };
        tracing::debug!(%client, "request: {}", message);

        let (done, finished) = oneshot::channel();
        let request = Request {
            message,
            reply: reply.clone(),
            done,
        };
        tokio::select! {
            _ = closing.cancelled() => break,
            sent = requests.send(request) => {
                if sent.is_err() {
                    tracing::warn!(%client, "request loop has stopped");
                    break;
                }
            }
        }

        let terminate = tokio::select! {
            _ = closing.cancelled() => break,
            terminate = finished => terminate.unwrap_or(true),
        };
        if terminate {
            break;
        }
    }

    tracing::debug!(%client, "connection read side closing");
    closing.cancel();
    frames
}

/// What the write path sends: replies to this client's requests, and
/// broadcasts from the registry.
struct Outbound {
    replies: mpsc::UnboundedReceiver<Message>,
    broadcasts: mpsc::Receiver<Message>,
}

/// Send replies and broadcasts until the registry asks us to disconnect, the
/// socket fails, or the read path closes.
///
/// Messages already queued when the read path closes are still sent, so the
/// `ACK` of a terminating request reaches the client. Replies go before
/// broadcasts.
async fn write_path<W>(
    mut frames: FramedWrite<WriteHalf<W>, LineCodec>,
    mut outbound: Outbound,
    disconnect: CancellationToken,
    closing: CancellationToken,
    client: ClientId,
) -> FramedWrite<WriteHalf<W>, LineCodec>
where
    W: AsyncRead + AsyncWrite,
{
    loop {
        let message = tokio::select! {
            biased;

            message = outbound.replies.recv() => message,
            message = outbound.broadcasts.recv() => message,
            _ = disconnect.cancelled() => {
                tracing::info!(%client, "connection has disconnect signal");
                break;
            }
            _ = closing.cancelled() => break,
        };
        let Some(message) = message else { break };

        let sent = tokio::select! {
            biased;
            sent = frames.send(message) => sent,
            _ = disconnect.cancelled() => break,
        };
        if let Err(e) = sent {
            tracing::warn!(%client, "connection write error: {}", e);
            break;
        }
    }

    tracing::debug!(%client, "connection write side closing");
    closing.cancel();
    frames
}
