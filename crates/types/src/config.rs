//! Static cluster configuration.
//!
//! The cluster is statically configured from a JSON array of peer records:
//! `[{"id": 1, "ip": "127.0.0.1", "port": 7001}, ...]`. Membership never
//! changes at runtime.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// One node's address record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Cluster-unique node id.
    pub id: NodeId,
    /// Host to dial. The config file field is named `ip` for compatibility
    /// with existing cluster files, but any resolvable host works.
    #[serde(rename = "ip")]
    pub host: String,
    /// TCP port of the node's RPC server.
    pub port: u16,
}

impl Peer {
    /// `host:port` dial string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Errors raised while loading or validating a cluster configuration.
///
/// Any of these refuses node startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cluster configuration is empty")]
    Empty,

    #[error("duplicate node id {0} in cluster configuration")]
    DuplicateId(NodeId),

    #[error("{0} is not in the cluster configuration")]
    UnknownNode(NodeId),

    #[error("cluster of {nodes} nodes does not satisfy n = 3f+1 with f >= 1")]
    NotByzantineQuorum { nodes: usize },
}

/// The full, validated peer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    peers: Vec<Peer>,
}

impl ClusterConfig {
    /// Build from an explicit peer list, validating uniqueness.
    pub fn new(mut peers: Vec<Peer>) -> Result<Self, ConfigError> {
        if peers.is_empty() {
            return Err(ConfigError::Empty);
        }
        let mut seen = HashSet::new();
        for peer in &peers {
            if !seen.insert(peer.id) {
                return Err(ConfigError::DuplicateId(peer.id));
            }
        }
        // Deterministic ordering: primary selection and iteration order
        // must agree on every node.
        peers.sort_by_key(|p| p.id);
        Ok(Self { peers })
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let peers: Vec<Peer> = serde_json::from_str(&raw)?;
        Self::new(peers)
    }

    /// All peers, sorted by id.
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// All node ids, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.id).collect()
    }

    /// Look up a peer record.
    pub fn peer(&self, id: NodeId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }

    /// Peers other than `own_id`, erroring if `own_id` is not a member.
    pub fn others(&self, own_id: NodeId) -> Result<Vec<Peer>, ConfigError> {
        if self.peer(own_id).is_none() {
            return Err(ConfigError::UnknownNode(own_id));
        }
        Ok(self
            .peers
            .iter()
            .filter(|p| p.id != own_id)
            .cloned()
            .collect())
    }

    /// Cluster size.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if the cluster has no members (never after validation).
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Strict majority of the cluster, the CFT-Log quorum.
    pub fn majority(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// The fault budget `f` for BFT-3P, requiring `n = 3f+1`, `f >= 1`.
    pub fn byzantine_f(&self) -> Result<usize, ConfigError> {
        let n = self.peers.len();
        if n < 4 || (n - 1) % 3 != 0 {
            return Err(ConfigError::NotByzantineQuorum { nodes: n });
        }
        Ok((n - 1) / 3)
    }

    /// The BFT-3P quorum `2f+1`.
    pub fn byzantine_quorum(&self) -> Result<usize, ConfigError> {
        Ok(2 * self.byzantine_f()? + 1)
    }

    /// Primary of `view` under round-robin rotation over sorted ids.
    pub fn primary_for_view(&self, view: u64) -> NodeId {
        self.peers[(view % self.peers.len() as u64) as usize].id
    }
}
