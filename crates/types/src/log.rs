//! Replicated log entries and durable role state.

use crate::{Command, NodeId};
use serde::{Deserialize, Serialize};

/// One entry of the CFT-Log replicated log.
///
/// Immutable once appended; `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term in which the entry was created by a leader.
    pub term: u64,
    /// 1-based position in the log.
    pub index: u64,
    /// The replicated command.
    pub command: Command,
}

/// The CFT-Log role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Role {
    /// Passive: grants votes, accepts entries, watches the election timer.
    #[default]
    Follower,
    /// Soliciting votes after an election timeout.
    Candidate,
    /// Replicating its log to the cluster.
    Leader,
}

/// The durable tuple that must survive crashes.
///
/// Saved to the WAL before any externally observable protocol step that
/// depends on it (granting a vote, appending an entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HardState {
    /// Monotonically non-decreasing election epoch.
    pub current_term: u64,
    /// Candidate granted this node's vote in `current_term`, if any.
    pub voted_for: Option<NodeId>,
    /// The full replicated log.
    pub log: Vec<LogEntry>,
}

impl HardState {
    /// Index of the last entry, 0 when the log is empty.
    pub fn last_log_index(&self) -> u64 {
        self.log.last().map(|e| e.index).unwrap_or(0)
    }

    /// Term of the last entry, 0 when the log is empty.
    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }
}
