//! TCP RPC server: one listener per node, dispatching peer protocol
//! traffic, client requests, and the control surface.

use crate::codec::{read_frame, write_frame, CodecError, SubmitReply, WireRequest, WireResponse};
use crate::partition::PartitionFilter;
use consort_core::{event_for_message, Event, NodeStatus, SubmitOutcome};
use consort_kv::KvStore;
use consort_types::{Command, NodeId};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace};

/// Errors from the network layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("unexpected response frame")]
    UnexpectedResponse,
}

/// A client submission awaiting its outcome.
pub struct SubmitRequest {
    pub command: Command,
    pub reply: oneshot::Sender<SubmitOutcome>,
}

/// Shared state handed to every connection handler.
#[derive(Clone)]
pub struct ServerContext {
    pub node_id: NodeId,
    /// Inbound peer protocol messages → runner event loop.
    pub event_tx: mpsc::Sender<Event>,
    /// Client submissions → runner event loop, with reply correlation.
    pub submit_tx: mpsc::Sender<SubmitRequest>,
    /// Local store for direct reads.
    pub kv: Arc<KvStore>,
    /// Control surface target for `SetPartition`.
    pub partition: Arc<PartitionFilter>,
    /// Status snapshot maintained by the runner.
    pub status: Arc<RwLock<NodeStatus>>,
    /// How long a submitter may wait for commitment.
    pub client_deadline: Duration,
}

/// The node's RPC server.
pub struct RpcServer {
    listener: TcpListener,
    ctx: ServerContext,
}

impl RpcServer {
    /// Bind the listener.
    pub async fn bind(addr: &str, ctx: ServerContext) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr).await.map_err(NetworkError::Bind)?;
        info!(node = %ctx.node_id, addr = %listener.local_addr()?, "RPC server listening");
        Ok(Self { listener, ctx })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, remote)) => {
                        let _ = stream.set_nodelay(true);
                        trace!(%remote, "connection accepted");
                        let ctx = self.ctx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, ctx).await {
                                trace!(%remote, "connection closed: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        debug!("accept failed: {err}");
                    }
                }
            }
        })
    }
}

/// Serve one connection until it closes.
///
/// Peer frames are fire-and-forget; everything else gets a response frame
/// on the same stream.
async fn handle_connection(mut stream: TcpStream, ctx: ServerContext) -> Result<(), NetworkError> {
    loop {
        let request: WireRequest = read_frame(&mut stream).await?;
        match request {
            WireRequest::Peer { from, message } => {
                trace!(%from, msg = message.type_name(), "peer message");
                // If the event queue is gone we are shutting down.
                if ctx.event_tx.send(event_for_message(message)).await.is_err() {
                    return Ok(());
                }
            }
            WireRequest::Submit { command } => {
                let reply = submit(&ctx, command).await;
                write_frame(&mut stream, &WireResponse::Submit(reply)).await?;
            }
            WireRequest::Get { key } => {
                let value = ctx.kv.get(&key);
                write_frame(&mut stream, &WireResponse::Value { value }).await?;
            }
            WireRequest::SetPartition { blocked } => {
                ctx.partition.replace(blocked);
                write_frame(&mut stream, &WireResponse::Ack).await?;
            }
            WireRequest::Ping => {
                write_frame(
                    &mut stream,
                    &WireResponse::Pong {
                        node_id: ctx.node_id,
                    },
                )
                .await?;
            }
            WireRequest::Status => {
                let status = ctx.status.read().clone();
                write_frame(&mut stream, &WireResponse::Status(status)).await?;
            }
        }
    }
}

async fn submit(ctx: &ServerContext, command: Command) -> SubmitReply {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = SubmitRequest {
        command,
        reply: reply_tx,
    };
    if ctx.submit_tx.send(request).await.is_err() {
        return SubmitOutcome::Rejected {
            reason: "node shutting down".to_string(),
        }
        .into();
    }

    match timeout(ctx.client_deadline, reply_rx).await {
        Ok(Ok(outcome)) => outcome.into(),
        // Runner dropped the waiter (shutdown) or the deadline passed
        // without commitment.
        Ok(Err(_)) => SubmitOutcome::Rejected {
            reason: "node shutting down".to_string(),
        }
        .into(),
        Err(_) => SubmitOutcome::TimedOut.into(),
    }
}
