//! Peer-to-peer protocol message payloads.
//!
//! These are the bodies carried by the wire frames between nodes. Vote and
//! append replies travel as messages in the reverse direction rather than
//! as RPC return values; they carry the same `(term, granted)` /
//! `(term, success)` data.

use crate::{Command, Digest, LogEntry, NodeId};
use serde::{Deserialize, Serialize};

// ─── CFT-Log ───

/// Candidate's vote solicitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// A peer's answer to [`RequestVoteArgs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
    /// Who is answering; quorum sets are indexed by voter id.
    pub voter: NodeId,
}

/// Leader's replication / heartbeat payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: NodeId,
    /// Index of the entry immediately preceding `entries`.
    pub prev_log_index: u64,
    /// Term of the entry at `prev_log_index`.
    pub prev_log_term: u64,
    /// Empty for pure heartbeats.
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

/// A follower's answer to [`AppendEntriesArgs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// On success, the highest index known to match the leader's log.
    /// Lets the leader advance `next_index`/`match_index` without
    /// correlating the reply to a specific request.
    pub match_index: u64,
    pub follower: NodeId,
}

// ─── BFT-3P ───

/// Primary's ordering proposal. The only phase that carries the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest,
    pub request: Command,
    pub primary: NodeId,
}

/// Replica's agreement to the ordering of a digest at `(view, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest,
    pub sender: NodeId,
}

/// Replica's commitment after collecting a prepare quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMsg {
    pub view: u64,
    pub seq: u64,
    pub digest: Digest,
    pub sender: NodeId,
}

/// Vote to abandon the current primary and move to `new_view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange {
    pub new_view: u64,
    /// Highest sequence the sender has seen, advisory only.
    pub last_seq: u64,
    pub sender: NodeId,
}
