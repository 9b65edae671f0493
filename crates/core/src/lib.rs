//! Core event/action model for the Consort consensus runtime.
//!
//! Both replication protocols are synchronous, deterministic state
//! machines:
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: no async, no `.await`
//! - **Deterministic**: same state + event = same actions (timeouts come
//!   from an RNG seeded at construction)
//! - **Pure-ish**: mutates self, but performs no I/O and never reads a clock
//!
//! All I/O is handled by a runner (production or simulation) which delivers
//! events, executes the returned actions in order, and converts inbound
//! network traffic back into events. Ordering matters: a [`Action::Persist`]
//! must complete before any later [`Action::Send`]/[`Action::Broadcast`] in
//! the same batch is allowed onto the network.

mod action;
mod event;
mod message;

pub use action::{Action, SubmitOutcome};
pub use event::{event_for_message, Event};
pub use message::OutboundMessage;

use consort_types::{NodeId, Role};
use serde::{Deserialize, Serialize};

/// Correlates a client submission with its eventual outcome.
///
/// Allocated by the runner; the state machine treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Identifies a timer owned by a state machine.
///
/// Timers are one-shot: setting an id that is already armed replaces it,
/// firing delivers the matching timeout event exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// CFT-Log election timeout (randomized).
    Election,
    /// CFT-Log leader heartbeat cadence.
    Heartbeat,
    /// BFT-3P primary liveness watchdog.
    ViewChange,
}

/// A point-in-time summary of a protocol state machine, for the `Status`
/// endpoint and for test assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub role: Role,
    /// CFT-Log term, or BFT-3P view.
    pub term: u64,
    pub log_length: u64,
    pub commit_index: u64,
    pub last_applied: u64,
    /// Last known leader (CFT-Log) or current primary (BFT-3P).
    pub leader: Option<NodeId>,
}

/// The contract both protocol state machines implement.
pub trait StateMachine {
    /// Arm initial timers. Called once by the runner before any event.
    fn bootstrap(&mut self) -> Vec<Action>;

    /// Advance the machine by one event.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Snapshot for status reporting.
    fn status(&self) -> NodeStatus;
}
