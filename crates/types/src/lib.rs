//! Core types for the Consort consensus runtime.
//!
//! This crate provides the foundational types shared by both replication
//! protocols and the node substrate:
//!
//! - **Identifiers**: [`NodeId`]
//! - **Cluster configuration**: [`Peer`], [`ClusterConfig`]
//! - **Commands and digests**: [`Command`], [`Digest`]
//! - **Replicated log**: [`LogEntry`], [`HardState`], [`Role`]
//! - **Protocol messages**: [`message`]
//!
//! It is self-contained and depends on no other workspace crate, making it
//! the foundation layer.

mod command;
mod config;
mod digest;
mod log;

pub mod message;

pub use command::Command;
pub use config::{ClusterConfig, ConfigError, Peer};
pub use digest::Digest;
pub use log::{HardState, LogEntry, Role};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a cluster node.
///
/// Identity within the cluster is the id alone; host and port are transport
/// details carried by [`Peer`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}
