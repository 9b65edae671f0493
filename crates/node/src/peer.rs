//! Per-peer outbound RPC client.

use crate::codec::{encode_frame, WireRequest};
use crate::partition::PartitionFilter;
use consort_core::OutboundMessage;
use consort_types::{NodeId, Peer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// How many messages may queue behind a slow peer before we start
/// dropping. Protocol layers re-send on their own cadence, so drops here
/// are equivalent to packet loss.
const OUTBOUND_QUEUE: usize = 256;

/// One logical client per peer.
///
/// Messages are enqueued from the event loop and written by a dedicated
/// task holding a persistent connection (re-dialed on demand). Dropped,
/// timed out and transport-errored sends are all the same non-event: the
/// message is gone and the protocol will re-send when it cares to.
pub struct PeerClient {
    peer_id: NodeId,
    filter: Arc<PartitionFilter>,
    tx: mpsc::Sender<OutboundMessage>,
    task: JoinHandle<()>,
}

impl PeerClient {
    /// Spawn the writer task for `peer`.
    ///
    /// `deadline` bounds both the dial and each frame write.
    pub fn spawn(
        own_id: NodeId,
        peer: Peer,
        filter: Arc<PartitionFilter>,
        deadline: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let peer_id = peer.id;
        let task = tokio::spawn(writer_loop(own_id, peer, rx, deadline));
        Self {
            peer_id,
            filter,
            tx,
            task,
        }
    }

    /// Queue a message for this peer.
    ///
    /// The partition filter is consulted here, before anything touches the
    /// network; a blocked target silently swallows the message. A full
    /// queue also drops; backpressure at this layer is packet loss.
    pub fn send(&self, message: OutboundMessage) {
        if self.filter.is_blocked(self.peer_id) {
            trace!(peer = %self.peer_id, msg = message.type_name(), "dropped by partition filter");
            return;
        }
        if let Err(err) = self.tx.try_send(message) {
            trace!(peer = %self.peer_id, "outbound queue full, dropping: {err}");
        }
    }

    /// Peer this client dials.
    pub fn peer_id(&self) -> NodeId {
        self.peer_id
    }

    /// Stop the writer task.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn writer_loop(
    own_id: NodeId,
    peer: Peer,
    mut rx: mpsc::Receiver<OutboundMessage>,
    deadline: Duration,
) {
    let addr = peer.addr();
    let mut stream: Option<TcpStream> = None;

    while let Some(message) = rx.recv().await {
        let frame = match encode_frame(&WireRequest::Peer {
            from: own_id,
            message,
        }) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(peer = %peer.id, "failed to encode frame: {err}");
                continue;
            }
        };

        if stream.is_none() {
            match timeout(deadline, TcpStream::connect(&addr)).await {
                Ok(Ok(new_stream)) => {
                    let _ = new_stream.set_nodelay(true);
                    trace!(peer = %peer.id, %addr, "connected");
                    stream = Some(new_stream);
                }
                Ok(Err(err)) => {
                    trace!(peer = %peer.id, "dial failed, dropping message: {err}");
                    continue;
                }
                Err(_) => {
                    trace!(peer = %peer.id, "dial deadline exceeded, dropping message");
                    continue;
                }
            }
        }

        if let Some(open) = stream.as_mut() {
            match timeout(deadline, open.write_all(&frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    trace!(peer = %peer.id, "write failed, dropping connection: {err}");
                    stream = None;
                }
                Err(_) => {
                    trace!(peer = %peer.id, "write deadline exceeded, dropping connection");
                    stream = None;
                }
            }
        }
    }
}
