//! Event types for the deterministic state machines.

use crate::{OutboundMessage, RequestId};
use consort_types::message::{
    AppendEntriesArgs, AppendEntriesReply, CommitMsg, Prepare, PrePrepare, RequestVoteArgs,
    RequestVoteReply, ViewChange,
};
use consort_types::Command;

/// All possible inputs to a protocol state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ─── Timers ───
    /// The election timer elapsed without a heartbeat or granted vote.
    ElectionTimeout,
    /// The leader's heartbeat cadence fired.
    HeartbeatTick,
    /// The BFT-3P primary watchdog elapsed without protocol activity.
    ViewChangeTimeout,

    // ─── Inbound CFT-Log messages ───
    RequestVoteReceived(RequestVoteArgs),
    RequestVoteReplyReceived(RequestVoteReply),
    AppendEntriesReceived(AppendEntriesArgs),
    AppendEntriesReplyReceived(AppendEntriesReply),

    // ─── Inbound BFT-3P messages ───
    PrePrepareReceived(PrePrepare),
    PrepareReceived(Prepare),
    CommitReceived(CommitMsg),
    ViewChangeReceived(ViewChange),

    // ─── Client ───
    /// A client submitted a command for replication.
    SubmitCommand {
        command: Command,
        request_id: RequestId,
    },
}

impl Event {
    /// Human-readable event type for logs and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ElectionTimeout => "ElectionTimeout",
            Event::HeartbeatTick => "HeartbeatTick",
            Event::ViewChangeTimeout => "ViewChangeTimeout",
            Event::RequestVoteReceived(_) => "RequestVoteReceived",
            Event::RequestVoteReplyReceived(_) => "RequestVoteReplyReceived",
            Event::AppendEntriesReceived(_) => "AppendEntriesReceived",
            Event::AppendEntriesReplyReceived(_) => "AppendEntriesReplyReceived",
            Event::PrePrepareReceived(_) => "PrePrepareReceived",
            Event::PrepareReceived(_) => "PrepareReceived",
            Event::CommitReceived(_) => "CommitReceived",
            Event::ViewChangeReceived(_) => "ViewChangeReceived",
            Event::SubmitCommand { .. } => "SubmitCommand",
        }
    }
}

/// Map a delivered peer message onto the event the receiver handles.
///
/// Both the production server and the simulated network route inbound
/// traffic through this single dispatch point.
pub fn event_for_message(message: OutboundMessage) -> Event {
    match message {
        OutboundMessage::RequestVote(args) => Event::RequestVoteReceived(args),
        OutboundMessage::RequestVoteReply(reply) => Event::RequestVoteReplyReceived(reply),
        OutboundMessage::AppendEntries(args) => Event::AppendEntriesReceived(args),
        OutboundMessage::AppendEntriesReply(reply) => Event::AppendEntriesReplyReceived(reply),
        OutboundMessage::PrePrepare(msg) => Event::PrePrepareReceived(msg),
        OutboundMessage::Prepare(msg) => Event::PrepareReceived(msg),
        OutboundMessage::Commit(msg) => Event::CommitReceived(msg),
        OutboundMessage::ViewChange(msg) => Event::ViewChangeReceived(msg),
    }
}
