//! Client-side RPC wrapper for submitting commands and driving the
//! control surface. Used by operators, scripts and the integration tests.

use crate::codec::{read_frame, write_frame, SubmitReply, WireRequest, WireResponse};
use crate::server::NetworkError;
use consort_core::NodeStatus;
use consort_types::{Command, NodeId};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// One-shot request/response client.
///
/// Dials per call, like the cluster tooling does; connection reuse is not
/// worth the bookkeeping at control-surface rates.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    deadline: Duration,
}

impl Default for ClusterClient {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(2),
        }
    }
}

impl ClusterClient {
    /// Client with the default 2s per-call deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client with a custom per-call deadline.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }

    async fn call(&self, addr: &str, request: &WireRequest) -> Result<WireResponse, NetworkError> {
        let work = async {
            let mut stream = TcpStream::connect(addr).await?;
            write_frame(&mut stream, request).await?;
            let response: WireResponse = read_frame(&mut stream).await?;
            Ok::<_, NetworkError>(response)
        };
        timeout(self.deadline, work)
            .await
            .map_err(|_| NetworkError::Timeout)?
    }

    /// Submit a command for replication.
    pub async fn submit(&self, addr: &str, command: Command) -> Result<SubmitReply, NetworkError> {
        match self.call(addr, &WireRequest::Submit { command }).await? {
            WireResponse::Submit(reply) => Ok(reply),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Submit, following one `leader_hint` redirect if the target is not
    /// the leader. `resolve` maps a node id to its address.
    pub async fn submit_with_redirect(
        &self,
        addr: &str,
        command: Command,
        resolve: impl Fn(NodeId) -> Option<String>,
    ) -> Result<SubmitReply, NetworkError> {
        let reply = self.submit(addr, command.clone()).await?;
        if reply.ok {
            return Ok(reply);
        }
        match reply.leader_hint.and_then(resolve) {
            Some(leader_addr) => self.submit(&leader_addr, command).await,
            None => Ok(reply),
        }
    }

    /// Read a key from one node's local store.
    pub async fn get(&self, addr: &str, key: &str) -> Result<Option<String>, NetworkError> {
        match self
            .call(
                addr,
                &WireRequest::Get {
                    key: key.to_string(),
                },
            )
            .await?
        {
            WireResponse::Value { value } => Ok(value),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Replace a node's blocked-peers set.
    pub async fn set_partition(
        &self,
        addr: &str,
        blocked: Vec<NodeId>,
    ) -> Result<(), NetworkError> {
        match self.call(addr, &WireRequest::SetPartition { blocked }).await? {
            WireResponse::Ack => Ok(()),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Liveness probe.
    pub async fn ping(&self, addr: &str) -> Result<NodeId, NetworkError> {
        match self.call(addr, &WireRequest::Ping).await? {
            WireResponse::Pong { node_id } => Ok(node_id),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Protocol state snapshot.
    pub async fn status(&self, addr: &str) -> Result<NodeStatus, NetworkError> {
        match self.call(addr, &WireRequest::Status).await? {
            WireResponse::Status(status) => Ok(status),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }
}
