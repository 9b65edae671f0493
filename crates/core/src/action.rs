//! Action types for the deterministic state machines.

use crate::{OutboundMessage, RequestId, TimerId};
use consort_types::{Command, HardState, NodeId};
use std::time::Duration;

/// How a client submission ended, as reported back to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Replicated, committed and applied at `index` (log index for
    /// CFT-Log, sequence number for BFT-3P).
    Committed { index: u64 },
    /// This node cannot order commands; retry against `hint` if present.
    NotLeader { hint: Option<NodeId> },
    /// The submission could not be accepted at all.
    Rejected { reason: String },
    /// No commitment within the client deadline. Produced by the runner,
    /// never by a state machine.
    TimedOut,
}

/// Actions a state machine wants the runner to perform.
///
/// Actions are commands; the runner executes them **in order**. Two
/// ordering rules are load-bearing:
///
/// 1. [`Action::Persist`] must complete durably before any later
///    [`Action::Send`]/[`Action::Broadcast`] from the same batch reaches
///    the network: a vote or appended entry must survive a crash that
///    happens after the message is out.
/// 2. [`Action::ApplyCommand`] actions are emitted, and must be applied,
///    in strict index order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // ─── Network ───
    /// Send one message to one peer.
    Send {
        to: NodeId,
        message: OutboundMessage,
    },
    /// Send one message to every other cluster member.
    Broadcast { message: OutboundMessage },

    // ─── Timers ───
    /// Arm (or re-arm, replacing) a one-shot timer.
    SetTimer { id: TimerId, duration: Duration },
    /// Disarm a timer; no-op if not armed.
    CancelTimer { id: TimerId },

    // ─── Durability ───
    /// Save the CFT-Log hard state to the WAL. Failure poisons the node:
    /// the runner suppresses outbound protocol traffic until a save
    /// succeeds again.
    Persist { state: HardState },

    // ─── State machine application ───
    /// Hand a committed command to the key-value store.
    ApplyCommand { index: u64, command: Command },

    // ─── Client notifications ───
    /// Resolve a pending client submission.
    RespondSubmit {
        request_id: RequestId,
        outcome: SubmitOutcome,
    },
}

impl Action {
    /// Human-readable action type for logs and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::Persist { .. } => "Persist",
            Action::ApplyCommand { .. } => "ApplyCommand",
            Action::RespondSubmit { .. } => "RespondSubmit",
        }
    }

    /// True for actions that put bytes on the wire.
    pub fn is_outbound(&self) -> bool {
        matches!(self, Action::Send { .. } | Action::Broadcast { .. })
    }
}
