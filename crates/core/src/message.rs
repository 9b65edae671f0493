//! Outbound peer messages.

use consort_types::message::{
    AppendEntriesArgs, AppendEntriesReply, CommitMsg, Prepare, PrePrepare, RequestVoteArgs,
    RequestVoteReply, ViewChange,
};
use serde::{Deserialize, Serialize};

/// A message a node sends to a peer.
///
/// The runner handles the actual network I/O; every variant maps 1:1 onto
/// an inbound [`crate::Event`] on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundMessage {
    // CFT-Log
    RequestVote(RequestVoteArgs),
    RequestVoteReply(RequestVoteReply),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesReply(AppendEntriesReply),

    // BFT-3P
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(CommitMsg),
    ViewChange(ViewChange),
}

impl OutboundMessage {
    /// Human-readable message type for logs and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::RequestVote(_) => "RequestVote",
            OutboundMessage::RequestVoteReply(_) => "RequestVoteReply",
            OutboundMessage::AppendEntries(_) => "AppendEntries",
            OutboundMessage::AppendEntriesReply(_) => "AppendEntriesReply",
            OutboundMessage::PrePrepare(_) => "PrePrepare",
            OutboundMessage::Prepare(_) => "Prepare",
            OutboundMessage::Commit(_) => "Commit",
            OutboundMessage::ViewChange(_) => "ViewChange",
        }
    }

    /// True for CFT-Log traffic.
    pub fn is_cft(&self) -> bool {
        matches!(
            self,
            OutboundMessage::RequestVote(_)
                | OutboundMessage::RequestVoteReply(_)
                | OutboundMessage::AppendEntries(_)
                | OutboundMessage::AppendEntriesReply(_)
        )
    }

    /// True for BFT-3P traffic.
    pub fn is_bft(&self) -> bool {
        !self.is_cft()
    }
}
